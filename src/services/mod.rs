//! Business rules over the store.
//!
//! Handlers never mutate relationship tables directly: every check a request
//! must pass lives here, and every multi-row change is handed to a single
//! transactional store call.

pub mod blocking;
pub mod friendship;
pub mod notifications;
pub mod posts;
pub mod profiles;

use thiserror::Error;
use url::Url;

use crate::store::StoreError;

pub use blocking::{BlockEntry, BlockingService};
pub use friendship::{FriendSuggestion, FriendshipService};
pub use notifications::{NotificationService, NotificationView, UnreadFeed};
pub use posts::{CommentView, LikeOutcome, PostDetail, PostService, PostView};
pub use profiles::{ProfileService, ProfileView, SearchEntry, SearchResults};

#[derive(Error, Debug)]
pub enum ServiceError {
    /// A rule the caller broke; the message is shown to the user as is
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Forbidden(String),
    #[error(transparent)]
    Store(StoreError),
}

pub type ServiceResult<T> = Result<T, ServiceError>;

impl From<StoreError> for ServiceError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Conflict(msg) => ServiceError::Validation(msg),
            StoreError::NotFound(what) => ServiceError::NotFound(format!("{} not found", what)),
            other => ServiceError::Store(other),
        }
    }
}

pub(crate) fn validation(msg: impl Into<String>) -> ServiceError {
    let msg = msg.into();
    log::debug!("Rejected: {}", msg);
    ServiceError::Validation(msg)
}

pub(crate) fn check_max_chars(value: &str, max: usize, field: &str) -> ServiceResult<()> {
    if value.chars().count() > max {
        return Err(validation(format!("{} must be at most {} characters", field, max)));
    }
    Ok(())
}

/// Empty, or an absolute http(s) URL with a host
pub(crate) fn check_url(value: &str, max: usize, field: &str) -> ServiceResult<()> {
    check_max_chars(value, max, field)?;
    if value.is_empty() {
        return Ok(());
    }
    match Url::parse(value) {
        Ok(url) if matches!(url.scheme(), "http" | "https") && url.host_str().is_some_and(|h| !h.is_empty()) => Ok(()),
        _ => Err(validation(format!("{} must be a valid URL", field))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflict_becomes_validation() {
        let err: ServiceError = StoreError::Conflict("User is already blocked".to_string()).into();
        assert!(matches!(err, ServiceError::Validation(ref m) if m == "User is already blocked"));

        let err: ServiceError = StoreError::NotFound("Post p1".to_string()).into();
        assert_eq!(err.to_string(), "Post p1 not found");
    }

    #[test]
    fn test_check_url() {
        assert!(check_url("", 200, "Website").is_ok());
        assert!(check_url("https://example.com", 200, "Website").is_ok());
        assert!(check_url("http://example.com/me", 200, "Website").is_ok());
        assert!(check_url("example.com", 200, "Website").is_err());
        assert!(check_url("https://", 200, "Website").is_err());
        assert!(check_url("https://exa mple.com", 200, "Website").is_err());
        assert!(check_url("ftp://example.com/file", 200, "Website").is_err());
        assert!(check_url("javascript:alert(1)", 200, "Website").is_err());

        let long = format!("https://{}.com", "a".repeat(300));
        match check_url(&long, 200, "Website") {
            Err(ServiceError::Validation(m)) => assert_eq!(m, "Website must be at most 200 characters"),
            other => panic!("expected validation error, got {:?}", other),
        }
    }
}
