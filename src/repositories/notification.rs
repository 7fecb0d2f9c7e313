//! # Notification Repository

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sea_orm::{ActiveModelTrait, DatabaseConnection, DbErr, Set};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use super::to_db_time;
use crate::models::notification::{ActiveModel, Model};

pub struct NotificationRepository {
    db: Arc<DatabaseConnection>,
}

impl NotificationRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    pub async fn insert(
        &self,
        user_id: Uuid,
        kind: &str,
        title: &str,
        body: &str,
        payload: Option<JsonValue>,
        now: DateTime<Utc>,
    ) -> Result<Model, DbErr> {
        ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(user_id),
            kind: Set(kind.to_string()),
            title: Set(title.to_string()),
            body: Set(body.to_string()),
            payload: Set(payload),
            read_at: Set(None),
            created_at: Set(to_db_time(now)),
        }
        .insert(self.db.as_ref())
        .await
    }
}
