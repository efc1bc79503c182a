use chrono::Utc;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;

use crate::events::Event;
use crate::models::*;
use crate::services::{check_max_chars, validation, ServiceError, ServiceResult};
use crate::store::{Store, StoreError};

pub const MAX_REQUEST_MESSAGE: usize = 200;
pub const DEFAULT_SUGGESTION_LIMIT: i64 = 10;

#[derive(Debug, Clone, Serialize)]
pub struct FriendSuggestion {
    #[serde(flatten)]
    pub user: UserSummary,
    pub mutual_count: i64,
}

/// Friend requests and the symmetric friendship they produce
#[derive(Clone)]
pub struct FriendshipService {
    store: Arc<Store>,
}

impl FriendshipService {
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

    fn load_request(&self, id: &str) -> ServiceResult<FriendRequest> {
        match self.store.get_friend_request(id) {
            Ok(request) => Ok(request),
            Err(StoreError::NotFound(_)) => Err(request_not_found()),
            Err(e) => Err(e.into()),
        }
    }

    /// Ask `to_user_id` to be friends with `from`.
    ///
    /// When `to_user_id` already has a pending request out to `from`, that
    /// request is accepted rather than creating a second edge. The block,
    /// friendship and existing-request checks run inside the store's
    /// transaction so a concurrent block or crossed send cannot slip between
    /// check and insert.
    pub fn send_friend_request(&self, from: &User, to_user_id: &str, message: &str) -> ServiceResult<SendOutcome> {
        let to = self.load_user(to_user_id)?;

        if from.id == to.id {
            return Err(validation("Cannot send a friend request to yourself"));
        }

        let message = message.trim();
        check_max_chars(message, MAX_REQUEST_MESSAGE, "Message")?;

        let mut request = FriendRequest {
            id: String::new(),
            from_user_id: from.id.clone(),
            to_user_id: to.id.clone(),
            status: FriendRequestStatus::Pending,
            message: message.to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let sent = Event::FriendRequestSent { from, to: &to };
        // used only when `to` had already asked `from`
        let accepted = Event::FriendRequestAccepted { sender: &to, accepter: from };

        let outcome = match self.store.send_friend_request(
            &mut request,
            sent.to_notification().as_ref(),
            accepted.to_notification().as_ref(),
        ) {
            Ok(outcome) => outcome,
            Err(StoreError::Conflict(msg)) => {
                log::debug!("Friend request from {} to {} refused: {}", from.username, to.username, msg);
                return Err(ServiceError::Validation(msg));
            }
            Err(e) => return Err(e.into()),
        };

        match &outcome {
            SendOutcome::Sent(r) => {
                log::info!("Friend request {} sent from {} to {} ({})", r.id, from.username, to.username, sent.event_type());
            }
            SendOutcome::AutoAccepted(r) => {
                log::info!(
                    "Crossed friend requests between {} and {}: accepted {} ({})",
                    from.username, to.username, r.id, accepted.event_type()
                );
            }
        }
        Ok(outcome)
    }

    /// Accept a request addressed to `user`
    pub fn accept_request(&self, user: &User, request_id: &str) -> ServiceResult<FriendRequest> {
        let request = self.load_request(request_id)?;
        if request.to_user_id != user.id {
            return Err(request_not_found());
        }
        let sender = self.load_user(&request.from_user_id)?;
        if request.status != FriendRequestStatus::Pending {
            return Err(validation("Request already processed"));
        }
        let notification = Event::FriendRequestAccepted { sender: &sender, accepter: user }.to_notification();
        // the store re-checks the pending status inside its transaction
        let accepted = self.store.accept_friend_request(&request.id, notification.as_ref())?;
        log::info!("{} accepted friend request {} from {}", user.username, accepted.id, sender.username);
        Ok(accepted)
    }

    /// Reject a request addressed to `user`
    pub fn reject_request(&self, user: &User, request_id: &str) -> ServiceResult<FriendRequest> {
        let request = self.load_request(request_id)?;
        if request.to_user_id != user.id {
            return Err(request_not_found());
        }
        if request.status != FriendRequestStatus::Pending {
            return Err(validation("Request already processed"));
        }
        let rejected = self.store.reject_friend_request(&request.id)?;
        log::info!("{} rejected friend request {}", user.username, rejected.id);
        Ok(rejected)
    }

    /// Withdraw a pending request `user` sent
    pub fn cancel_request(&self, user: &User, request_id: &str) -> ServiceResult<()> {
        let request = self.load_request(request_id)?;
        if request.from_user_id != user.id {
            return Err(request_not_found());
        }
        if request.status != FriendRequestStatus::Pending {
            return Err(validation("Request already processed"));
        }
        self.store.delete_pending_friend_request(&request.id, &user.id)?;
        log::info!("{} cancelled friend request {}", user.username, request.id);
        Ok(())
    }

    /// Unfriend in both directions and clear every request between the two
    pub fn remove_friend(&self, user: &User, friend_id: &str) -> ServiceResult<()> {
        let friend = self.load_user(friend_id)?;
        if !self.store.are_friends(&user.id, &friend.id)? {
            return Err(validation("You are not friends"));
        }
        self.store.remove_friendship(&user.id, &friend.id)?;
        log::info!("{} removed {} from friends", user.username, friend.username);
        Ok(())
    }

    pub fn are_friends(&self, user_id: &str, other_id: &str) -> ServiceResult<bool> {
        Ok(self.store.are_friends(user_id, other_id)?)
    }

    /// Users who are friends with both, ordered by username
    pub fn mutual_friends(&self, user_id: &str, other_id: &str) -> ServiceResult<Vec<UserSummary>> {
        self.load_user(other_id)?;
        let mine: HashSet<String> = self.store.list_friend_ids(user_id)?.into_iter().collect();
        let theirs: HashSet<String> = self.store.list_friend_ids(other_id)?.into_iter().collect();

        let mut mutual = mine
            .intersection(&theirs)
            .map(|id| self.store.get_user_summary(id))
            .collect::<Result<Vec<_>, _>>()?;
        mutual.sort_by(|a, b| a.username.cmp(&b.username));
        Ok(mutual)
    }

    pub fn friend_suggestions(&self, user_id: &str, limit: i64) -> ServiceResult<Vec<FriendSuggestion>> {
        let suggestions = self
            .store
            .friend_suggestions(user_id, limit.max(0))?
            .into_iter()
            .map(|(user, mutual_count)| FriendSuggestion { user, mutual_count })
            .collect();
        Ok(suggestions)
    }

    pub fn incoming_requests(&self, user_id: &str) -> ServiceResult<Vec<FriendRequestView>> {
        Ok(self.store.list_incoming_requests(user_id)?)
    }

    pub fn outgoing_requests(&self, user_id: &str) -> ServiceResult<Vec<FriendRequestView>> {
        Ok(self.store.list_outgoing_requests(user_id)?)
    }

    pub fn incoming_count(&self, user_id: &str) -> ServiceResult<i64> {
        Ok(self.store.count_incoming_requests(user_id)?)
    }
}

fn request_not_found() -> ServiceError {
    ServiceError::NotFound("Friend request not found".to_string())
}
