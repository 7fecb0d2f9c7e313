use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use sea_orm::DatabaseConnection;

use super::{Notification, Notifier};
use crate::repositories::NotificationRepository;

/// Persists notifications for the in-app inbox.
pub struct InAppNotifier {
    repo: NotificationRepository,
}

impl InAppNotifier {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self {
            repo: NotificationRepository::new(db),
        }
    }
}

#[async_trait]
impl Notifier for InAppNotifier {
    async fn notify(&self, notification: &Notification) -> anyhow::Result<()> {
        self.repo
            .insert(
                notification.user_id,
                notification.kind.as_str(),
                &notification.title,
                &notification.body,
                notification.payload.clone(),
                Utc::now(),
            )
            .await?;
        Ok(())
    }
}
