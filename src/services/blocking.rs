use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;

use crate::models::*;
use crate::services::{check_max_chars, validation, ServiceError, ServiceResult};
use crate::store::{Store, StoreError};

pub const MAX_BLOCK_REASON: usize = 200;

/// A block joined with the blocked user's card
#[derive(Debug, Clone, Serialize)]
pub struct BlockEntry {
    #[serde(flatten)]
    pub block: BlockedUser,
    pub user: UserSummary,
}

#[derive(Clone)]
pub struct BlockingService {
    store: Arc<Store>,
}

impl BlockingService {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    fn load_user(&self, id: &str) -> ServiceResult<User> {
        match self.store.get_user(id) {
            Ok(user) => Ok(user),
            Err(StoreError::NotFound(_)) => Err(ServiceError::NotFound("User not found".to_string())),
            Err(e) => Err(e.into()),
        }
    }

    /// Block `blocked_id`. Any friendship and every request between the two
    /// are removed in the same transaction.
    pub fn block(&self, blocker: &User, blocked_id: &str, reason: &str) -> ServiceResult<BlockedUser> {
        if blocker.id == blocked_id {
            return Err(validation("Cannot block yourself"));
        }
        let target = self.load_user(blocked_id)?;

        let reason = reason.trim();
        check_max_chars(reason, MAX_BLOCK_REASON, "Reason")?;

        let mut block = BlockedUser {
            id: String::new(),
            blocker_id: blocker.id.clone(),
            blocked_id: target.id.clone(),
            reason: reason.to_string(),
            created_at: Utc::now(),
        };
        self.store.create_block(&mut block)?;

        log::info!("{} blocked {}", blocker.username, target.username);
        Ok(block)
    }

    pub fn unblock(&self, blocker: &User, blocked_id: &str) -> ServiceResult<()> {
        let target = self.load_user(blocked_id)?;
        match self.store.delete_block(&blocker.id, &target.id) {
            Ok(()) => {
                log::info!("{} unblocked {}", blocker.username, target.username);
                Ok(())
            }
            Err(StoreError::NotFound(_)) => Err(validation("User is not blocked")),
            Err(e) => Err(e.into()),
        }
    }

    pub fn is_blocked(&self, blocker_id: &str, blocked_id: &str) -> ServiceResult<bool> {
        Ok(self.store.is_blocked(blocker_id, blocked_id)?)
    }

    /// True when either user has blocked the other
    pub fn is_blocked_either_way(&self, a: &str, b: &str) -> ServiceResult<bool> {
        Ok(self.store.is_blocked(a, b)? || self.store.is_blocked(b, a)?)
    }

    /// Users `blocker_id` has blocked, most recent first
    pub fn blocked_users(&self, blocker_id: &str) -> ServiceResult<Vec<BlockEntry>> {
        self.store
            .list_blocks(blocker_id)?
            .into_iter()
            .map(|block| {
                let user = self.store.get_user_summary(&block.blocked_id)?;
                Ok(BlockEntry { block, user })
            })
            .collect()
    }
}
