use sea_orm_migration::prelude::*;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240301_000001_create_menu_items_table::Migration),
            Box::new(m20240301_000002_create_orders_tables::Migration),
            Box::new(m20240301_000003_create_promotion_tables::Migration),
            Box::new(m20240301_000004_create_referral_tables::Migration),
            Box::new(m20240301_000005_create_loyalty_tables::Migration),
        ]
    }
}

async fn create_index(
    manager: &SchemaManager<'_>,
    name: &str,
    table: impl IntoIden + 'static,
    cols: Vec<DynIden>,
) -> Result<(), DbErr> {
    let mut index = Index::create();
    index.if_not_exists().name(name).table(table);
    for col in cols {
        index.col(col);
    }
    manager.create_index(index.to_owned()).await
}

mod m20240301_000001_create_menu_items_table {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000001_create_menu_items_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(MenuItems::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(MenuItems::Id).uuid().not_null().primary_key())
                        .col(ColumnDef::new(MenuItems::Name).string().not_null())
                        .col(ColumnDef::new(MenuItems::Price).decimal().not_null())
                        .col(
                            ColumnDef::new(MenuItems::IsActive)
                                .boolean()
                                .not_null()
                                .default(true),
                        )
                        .col(ColumnDef::new(MenuItems::CreatedAt).timestamp_with_time_zone().not_null())
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(MenuItems::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum MenuItems {
        Table,
        Id,
        Name,
        Price,
        IsActive,
        CreatedAt,
    }
}

mod m20240301_000002_create_orders_tables {
    use super::create_index;
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000002_create_orders_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Orders::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Orders::Id).uuid().not_null().primary_key())
                        .col(ColumnDef::new(Orders::UserId).uuid().null())
                        .col(ColumnDef::new(Orders::Status).string_len(16).not_null())
                        .col(ColumnDef::new(Orders::Subtotal).decimal().not_null().default(0))
                        .col(
                            ColumnDef::new(Orders::PromoDiscount)
                                .decimal()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(Orders::DiscountTotal)
                                .decimal()
                                .not_null()
                                .default(0),
                        )
                        .col(ColumnDef::new(Orders::Total).decimal().not_null().default(0))
                        .col(ColumnDef::new(Orders::PromoCode).string_len(64).null())
                        .col(ColumnDef::new(Orders::CreatedAt).timestamp_with_time_zone().not_null())
                        .col(ColumnDef::new(Orders::ConfirmedAt).timestamp_with_time_zone().null())
                        .col(ColumnDef::new(Orders::PaidAt).timestamp_with_time_zone().null())
                        .col(ColumnDef::new(Orders::UpdatedAt).timestamp_with_time_zone().not_null())
                        .to_owned(),
                )
                .await?;

            create_index(
                manager,
                "idx_orders_user_status",
                Orders::Table,
                vec![Orders::UserId.into_iden(), Orders::Status.into_iden()],
            )
            .await?;

            manager
                .create_table(
                    Table::create()
                        .table(OrderItems::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(OrderItems::Id).uuid().not_null().primary_key())
                        .col(ColumnDef::new(OrderItems::OrderId).uuid().not_null())
                        .col(ColumnDef::new(OrderItems::MenuItemId).uuid().not_null())
                        .col(ColumnDef::new(OrderItems::Quantity).integer().not_null())
                        .col(ColumnDef::new(OrderItems::UnitPrice).decimal().not_null())
                        .col(ColumnDef::new(OrderItems::LineTotal).decimal().not_null())
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_order_items_order_id")
                                .from(OrderItems::Table, OrderItems::OrderId)
                                .to(Orders::Table, Orders::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            create_index(
                manager,
                "idx_order_items_order_id",
                OrderItems::Table,
                vec![OrderItems::OrderId.into_iden()],
            )
            .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(OrderItems::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Orders::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum Orders {
        Table,
        Id,
        UserId,
        Status,
        Subtotal,
        PromoDiscount,
        DiscountTotal,
        Total,
        PromoCode,
        CreatedAt,
        ConfirmedAt,
        PaidAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum OrderItems {
        Table,
        Id,
        OrderId,
        MenuItemId,
        Quantity,
        UnitPrice,
        LineTotal,
    }
}

mod m20240301_000003_create_promotion_tables {
    use super::create_index;
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000003_create_promotion_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Promotions::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Promotions::Id).uuid().not_null().primary_key())
                        .col(
                            ColumnDef::new(Promotions::Code)
                                .string_len(64)
                                .not_null()
                                .unique_key(),
                        )
                        .col(ColumnDef::new(Promotions::Name).string().not_null())
                        .col(ColumnDef::new(Promotions::PromoType).string_len(32).not_null())
                        .col(ColumnDef::new(Promotions::Value).decimal().not_null())
                        .col(ColumnDef::new(Promotions::MaxDiscountAmount).decimal().null())
                        .col(ColumnDef::new(Promotions::MinOrderAmount).decimal().null())
                        .col(ColumnDef::new(Promotions::Segment).string_len(32).not_null())
                        .col(ColumnDef::new(Promotions::StartAt).timestamp_with_time_zone().null())
                        .col(ColumnDef::new(Promotions::EndAt).timestamp_with_time_zone().null())
                        .col(
                            ColumnDef::new(Promotions::IsActive)
                                .boolean()
                                .not_null()
                                .default(true),
                        )
                        .col(ColumnDef::new(Promotions::UsageLimitTotal).integer().null())
                        .col(ColumnDef::new(Promotions::UsageLimitPerUser).integer().null())
                        .col(
                            ColumnDef::new(Promotions::NonCumulable)
                                .boolean()
                                .not_null()
                                .default(true),
                        )
                        .col(ColumnDef::new(Promotions::CreatedAt).timestamp_with_time_zone().not_null())
                        .to_owned(),
                )
                .await?;

            // Redemptions keep their promotion alive: no cascade.
            manager
                .create_table(
                    Table::create()
                        .table(PromotionRedemptions::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(PromotionRedemptions::Id)
                                .uuid()
                                .not_null()
                                .primary_key(),
                        )
                        .col(
                            ColumnDef::new(PromotionRedemptions::PromotionId)
                                .uuid()
                                .not_null(),
                        )
                        .col(ColumnDef::new(PromotionRedemptions::UserId).uuid().not_null())
                        .col(ColumnDef::new(PromotionRedemptions::OrderId).uuid().not_null())
                        .col(
                            ColumnDef::new(PromotionRedemptions::DiscountAmount)
                                .decimal()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(PromotionRedemptions::Status)
                                .string_len(16)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(PromotionRedemptions::DeviceId)
                                .string_len(128)
                                .null(),
                        )
                        .col(
                            ColumnDef::new(PromotionRedemptions::IpHash)
                                .string_len(128)
                                .null(),
                        )
                        .col(
                            ColumnDef::new(PromotionRedemptions::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_promotion_redemptions_promotion_id")
                                .from(PromotionRedemptions::Table, PromotionRedemptions::PromotionId)
                                .to(Promotions::Table, Promotions::Id)
                                .on_delete(ForeignKeyAction::Restrict),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_promotion_redemptions_order_id")
                                .from(PromotionRedemptions::Table, PromotionRedemptions::OrderId)
                                .to(Orders::Table, Orders::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            create_index(
                manager,
                "idx_promotion_redemptions_promotion_status",
                PromotionRedemptions::Table,
                vec![
                    PromotionRedemptions::PromotionId.into_iden(),
                    PromotionRedemptions::Status.into_iden(),
                ],
            )
            .await?;

            create_index(
                manager,
                "idx_promotion_redemptions_order_status",
                PromotionRedemptions::Table,
                vec![
                    PromotionRedemptions::OrderId.into_iden(),
                    PromotionRedemptions::Status.into_iden(),
                ],
            )
            .await?;

            create_index(
                manager,
                "idx_promotion_redemptions_user",
                PromotionRedemptions::Table,
                vec![
                    PromotionRedemptions::UserId.into_iden(),
                    PromotionRedemptions::PromotionId.into_iden(),
                ],
            )
            .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(PromotionRedemptions::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Promotions::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum Promotions {
        Table,
        Id,
        Code,
        Name,
        PromoType,
        Value,
        MaxDiscountAmount,
        MinOrderAmount,
        Segment,
        StartAt,
        EndAt,
        IsActive,
        UsageLimitTotal,
        UsageLimitPerUser,
        NonCumulable,
        CreatedAt,
    }

    #[derive(DeriveIden)]
    enum PromotionRedemptions {
        Table,
        Id,
        PromotionId,
        UserId,
        OrderId,
        DiscountAmount,
        Status,
        DeviceId,
        IpHash,
        CreatedAt,
    }

    #[derive(DeriveIden)]
    enum Orders {
        Table,
        Id,
    }
}

mod m20240301_000004_create_referral_tables {
    use super::create_index;
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000004_create_referral_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(ReferralCodes::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(ReferralCodes::Id).uuid().not_null().primary_key())
                        .col(
                            ColumnDef::new(ReferralCodes::UserId)
                                .uuid()
                                .not_null()
                                .unique_key(),
                        )
                        .col(
                            ColumnDef::new(ReferralCodes::Code)
                                .string_len(32)
                                .not_null()
                                .unique_key(),
                        )
                        .col(
                            ColumnDef::new(ReferralCodes::IsActive)
                                .boolean()
                                .not_null()
                                .default(true),
                        )
                        .col(ColumnDef::new(ReferralCodes::CreatedAt).timestamp_with_time_zone().not_null())
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(Referrals::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Referrals::Id).uuid().not_null().primary_key())
                        .col(ColumnDef::new(Referrals::ReferrerId).uuid().not_null())
                        .col(
                            ColumnDef::new(Referrals::ReferredUserId)
                                .uuid()
                                .not_null()
                                .unique_key(),
                        )
                        .col(ColumnDef::new(Referrals::CodeUsed).string_len(32).not_null())
                        .col(ColumnDef::new(Referrals::Status).string_len(16).not_null())
                        .col(ColumnDef::new(Referrals::QualifyingOrderId).uuid().null())
                        .col(ColumnDef::new(Referrals::QualifiedAt).timestamp_with_time_zone().null())
                        .col(ColumnDef::new(Referrals::RewardedAt).timestamp_with_time_zone().null())
                        .col(ColumnDef::new(Referrals::CreatedAt).timestamp_with_time_zone().not_null())
                        .to_owned(),
                )
                .await?;

            create_index(
                manager,
                "idx_referrals_status",
                Referrals::Table,
                vec![Referrals::Status.into_iden()],
            )
            .await?;

            manager
                .create_table(
                    Table::create()
                        .table(RewardLedger::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(RewardLedger::Id).uuid().not_null().primary_key())
                        .col(ColumnDef::new(RewardLedger::UserId).uuid().not_null())
                        .col(ColumnDef::new(RewardLedger::Amount).decimal().not_null())
                        .col(ColumnDef::new(RewardLedger::Source).string_len(32).not_null())
                        .col(ColumnDef::new(RewardLedger::SourceId).uuid().null())
                        .col(ColumnDef::new(RewardLedger::Status).string_len(16).not_null())
                        .col(ColumnDef::new(RewardLedger::ExpiresAt).timestamp_with_time_zone().null())
                        .col(ColumnDef::new(RewardLedger::CreatedAt).timestamp_with_time_zone().not_null())
                        .to_owned(),
                )
                .await?;

            create_index(
                manager,
                "idx_reward_ledger_user",
                RewardLedger::Table,
                vec![RewardLedger::UserId.into_iden()],
            )
            .await?;

            create_index(
                manager,
                "idx_reward_ledger_source",
                RewardLedger::Table,
                vec![RewardLedger::Source.into_iden(), RewardLedger::SourceId.into_iden()],
            )
            .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(RewardLedger::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Referrals::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(ReferralCodes::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum ReferralCodes {
        Table,
        Id,
        UserId,
        Code,
        IsActive,
        CreatedAt,
    }

    #[derive(DeriveIden)]
    enum Referrals {
        Table,
        Id,
        ReferrerId,
        ReferredUserId,
        CodeUsed,
        Status,
        QualifyingOrderId,
        QualifiedAt,
        RewardedAt,
        CreatedAt,
    }

    #[derive(DeriveIden)]
    enum RewardLedger {
        Table,
        Id,
        UserId,
        Amount,
        Source,
        SourceId,
        Status,
        ExpiresAt,
        CreatedAt,
    }
}

mod m20240301_000005_create_loyalty_tables {
    use super::create_index;
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000005_create_loyalty_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(LoyaltyAccounts::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(LoyaltyAccounts::Id)
                                .uuid()
                                .not_null()
                                .primary_key(),
                        )
                        .col(
                            ColumnDef::new(LoyaltyAccounts::UserId)
                                .uuid()
                                .not_null()
                                .unique_key(),
                        )
                        .col(
                            ColumnDef::new(LoyaltyAccounts::Stamps)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(LoyaltyAccounts::VouchersEarned)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(ColumnDef::new(LoyaltyAccounts::UpdatedAt).timestamp_with_time_zone().not_null())
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(FreeItemVouchers::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(FreeItemVouchers::Id)
                                .uuid()
                                .not_null()
                                .primary_key(),
                        )
                        .col(ColumnDef::new(FreeItemVouchers::UserId).uuid().not_null())
                        .col(
                            ColumnDef::new(FreeItemVouchers::MaxItemValue)
                                .decimal()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(FreeItemVouchers::Status)
                                .string_len(16)
                                .not_null(),
                        )
                        .col(ColumnDef::new(FreeItemVouchers::ExpiresAt).timestamp_with_time_zone().not_null())
                        .col(ColumnDef::new(FreeItemVouchers::UsedOrderId).uuid().null())
                        .col(ColumnDef::new(FreeItemVouchers::RedeemedAmount).decimal().null())
                        .col(ColumnDef::new(FreeItemVouchers::CreatedAt).timestamp_with_time_zone().not_null())
                        .col(ColumnDef::new(FreeItemVouchers::UsedAt).timestamp_with_time_zone().null())
                        .to_owned(),
                )
                .await?;

            create_index(
                manager,
                "idx_free_item_vouchers_user_status",
                FreeItemVouchers::Table,
                vec![
                    FreeItemVouchers::UserId.into_iden(),
                    FreeItemVouchers::Status.into_iden(),
                ],
            )
            .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(FreeItemVouchers::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(LoyaltyAccounts::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum LoyaltyAccounts {
        Table,
        Id,
        UserId,
        Stamps,
        VouchersEarned,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum FreeItemVouchers {
        Table,
        Id,
        UserId,
        MaxItemValue,
        Status,
        ExpiresAt,
        UsedOrderId,
        RedeemedAmount,
        CreatedAt,
        UsedAt,
    }
}
