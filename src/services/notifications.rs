use serde::Serialize;
use std::sync::Arc;

use crate::models::*;
use crate::services::{ServiceError, ServiceResult};
use crate::store::{Store, StoreError};

/// How many notifications the full list shows
pub const LIST_LIMIT: i64 = 50;
/// How many unread notifications the dropdown feed shows
pub const UNREAD_FEED_LIMIT: i64 = 10;

#[derive(Debug, Clone, Serialize)]
pub struct NotificationView {
    #[serde(flatten)]
    pub notification: Notification,
    pub related_user: Option<UserSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UnreadFeed {
    pub notifications: Vec<NotificationView>,
    pub unread_count: i64,
}

#[derive(Clone)]
pub struct NotificationService {
    store: Arc<Store>,
}

impl NotificationService {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    fn view(&self, notification: Notification) -> ServiceResult<NotificationView> {
        let related_user = match &notification.related_user_id {
            Some(id) => match self.store.get_user_summary(id) {
                Ok(user) => Some(user),
                Err(StoreError::NotFound(_)) => None,
                Err(e) => return Err(e.into()),
            },
            None => None,
        };
        Ok(NotificationView {
            notification,
            related_user,
        })
    }

    /// The newest notifications as they were before this call; everything is
    /// marked read afterwards
    pub fn list_and_mark_read(&self, user_id: &str) -> ServiceResult<Vec<NotificationView>> {
        let views = self
            .store
            .list_notifications(user_id, LIST_LIMIT)?
            .into_iter()
            .map(|n| self.view(n))
            .collect::<ServiceResult<Vec<_>>>()?;

        let marked = self.store.mark_all_notifications_read(user_id)?;
        if marked > 0 {
            log::debug!("Marked {} notifications read for {}", marked, user_id);
        }
        Ok(views)
    }

    pub fn unread_feed(&self, user_id: &str) -> ServiceResult<UnreadFeed> {
        let notifications = self
            .store
            .list_unread_notifications(user_id, UNREAD_FEED_LIMIT)?
            .into_iter()
            .map(|n| self.view(n))
            .collect::<ServiceResult<Vec<_>>>()?;
        Ok(UnreadFeed {
            notifications,
            unread_count: self.store.count_unread_notifications(user_id)?,
        })
    }

    /// Mark one of the user's own notifications read
    pub fn mark_read(&self, user_id: &str, notification_id: &str) -> ServiceResult<()> {
        match self.store.mark_notification_read(notification_id, user_id) {
            Ok(()) => Ok(()),
            Err(StoreError::NotFound(_)) => Err(ServiceError::NotFound("Notification not found".to_string())),
            Err(e) => Err(e.into()),
        }
    }
}
