pub mod free_item_voucher;
pub mod loyalty_account;
pub mod menu_item;
pub mod order;
pub mod order_item;
pub mod promotion;
pub mod promotion_redemption;
pub mod referral;
pub mod referral_code;
pub mod reward_ledger;
