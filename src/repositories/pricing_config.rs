//! # Pricing Config Repository

use std::sync::Arc;

use sea_orm::{ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter, QueryOrder};

use crate::models::pricing_config::{Column, Entity};

pub struct PricingConfigRepository {
    db: Arc<DatabaseConnection>,
}

impl PricingConfigRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Approval window from the newest active pricing row, if one is set.
    pub async fn active_approval_window_hours(&self) -> Result<Option<i32>, DbErr> {
        let active = Entity::find()
            .filter(Column::IsActive.eq(true))
            .order_by_desc(Column::CreatedAt)
            .one(self.db.as_ref())
            .await?;
        Ok(active.and_then(|config| config.completion_auto_approval_hours))
    }
}
