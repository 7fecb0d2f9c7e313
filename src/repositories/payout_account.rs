//! # Payout Account Repository

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sea_orm::sea_query::OnConflict;
use sea_orm::{ConnectionTrait, DatabaseConnection, DbErr, EntityTrait, Set};
use uuid::Uuid;

use super::to_db_time;
use crate::models::payout_account::{ActiveModel, Column, Entity, Model};

pub struct PayoutAccountRepository {
    db: Arc<DatabaseConnection>,
}

impl PayoutAccountRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Destination for a user, only if the provider has enabled payouts on it.
    pub async fn find_verified<C: ConnectionTrait>(
        conn: &C,
        user_id: Uuid,
    ) -> Result<Option<Model>, DbErr> {
        Ok(Entity::find_by_id(user_id)
            .one(conn)
            .await?
            .filter(|account| account.payouts_enabled))
    }

    pub async fn upsert(
        &self,
        user_id: Uuid,
        destination_id: &str,
        payouts_enabled: bool,
        now: DateTime<Utc>,
    ) -> Result<(), DbErr> {
        let row = ActiveModel {
            user_id: Set(user_id),
            destination_id: Set(destination_id.to_string()),
            payouts_enabled: Set(payouts_enabled),
            created_at: Set(to_db_time(now)),
            updated_at: Set(to_db_time(now)),
        };
        Entity::insert(row)
            .on_conflict(
                OnConflict::column(Column::UserId)
                    .update_columns([
                        Column::DestinationId,
                        Column::PayoutsEnabled,
                        Column::UpdatedAt,
                    ])
                    .to_owned(),
            )
            .exec(self.db.as_ref())
            .await?;
        Ok(())
    }
}
