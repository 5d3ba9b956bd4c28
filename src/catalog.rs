use async_trait::async_trait;
use dashmap::DashMap;
use rust_decimal::Decimal;
use sea_orm::{DatabaseConnection, EntityTrait};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::entities::menu_item;
use crate::errors::ServiceError;
use crate::money::round2;

/// Price and availability of a menu item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogItem {
    pub id: Uuid,
    pub name: String,
    pub price: Decimal,
    pub is_active: bool,
}

/// Resolves menu items. Prices are looked up on every read, never cached in
/// the cart.
#[async_trait]
pub trait Catalog: Send + Sync {
    async fn get_item(&self, id: Uuid) -> Result<Option<CatalogItem>, ServiceError>;
}

/// Catalog backed by the `menu_items` table.
#[derive(Clone)]
pub struct DbCatalog {
    db: Arc<DatabaseConnection>,
}

impl DbCatalog {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl Catalog for DbCatalog {
    async fn get_item(&self, id: Uuid) -> Result<Option<CatalogItem>, ServiceError> {
        let item = menu_item::Entity::find_by_id(id).one(&*self.db).await?;
        Ok(item.map(|m| CatalogItem {
            id: m.id,
            name: m.name,
            price: round2(m.price),
            is_active: m.is_active,
        }))
    }
}

#[derive(Default)]
pub struct InMemoryCatalog {
    items: DashMap<Uuid, CatalogItem>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&self, item: CatalogItem) {
        self.items.insert(item.id, item);
    }

    /// Adds an active item and returns its id.
    pub fn add_item(&self, name: &str, price: Decimal) -> Uuid {
        let id = Uuid::new_v4();
        self.upsert(CatalogItem {
            id,
            name: name.to_string(),
            price,
            is_active: true,
        });
        id
    }

    pub fn set_active(&self, id: Uuid, is_active: bool) {
        if let Some(mut item) = self.items.get_mut(&id) {
            item.is_active = is_active;
        }
    }
}

#[async_trait]
impl Catalog for InMemoryCatalog {
    async fn get_item(&self, id: Uuid) -> Result<Option<CatalogItem>, ServiceError> {
        Ok(self.items.get(&id).map(|entry| entry.value().clone()))
    }
}
