use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// A profile counts as online if it was seen within this window
pub const ONLINE_WINDOW_MINUTES: i64 = 5;

/// User is the core account identity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub username: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub display_name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Profile extends a User with public-facing details.
/// Exactly one Profile exists per User, keyed by the user id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    pub user_id: String,
    pub avatar_url: String,
    pub bio: String,
    pub birth_date: Option<NaiveDate>,
    pub location: String,
    pub website: String,
    pub is_private: bool,
    pub last_seen: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Profile {
    pub fn new(user_id: &str) -> Self {
        let now = Utc::now();
        Self {
            user_id: user_id.to_string(),
            avatar_url: String::new(),
            bio: String::new(),
            birth_date: None,
            location: String::new(),
            website: String::new(),
            is_private: false,
            last_seen: now,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_online(&self) -> bool {
        seen_recently(self.last_seen)
    }
}

pub fn seen_recently(last_seen: DateTime<Utc>) -> bool {
    Utc::now() - last_seen < Duration::minutes(ONLINE_WINDOW_MINUTES)
}

/// Compact user card used in lists (friends, search results, notifications)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserSummary {
    pub id: String,
    pub username: String,
    pub display_name: String,
    pub avatar_url: Option<String>,
    pub is_online: bool,
}

/// FriendRequest is a directed edge between two users
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FriendRequest {
    pub id: String,
    pub from_user_id: String,
    pub to_user_id: String,
    pub status: FriendRequestStatus,
    pub message: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FriendRequestStatus {
    Pending,
    Accepted,
    Rejected,
}

impl FriendRequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FriendRequestStatus::Pending => "pending",
            FriendRequestStatus::Accepted => "accepted",
            FriendRequestStatus::Rejected => "rejected",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(FriendRequestStatus::Pending),
            "accepted" => Some(FriendRequestStatus::Accepted),
            "rejected" => Some(FriendRequestStatus::Rejected),
            _ => None,
        }
    }
}

/// FriendRequest joined with the user on the other end, for request lists
#[derive(Debug, Clone, Serialize)]
pub struct FriendRequestView {
    #[serde(flatten)]
    pub request: FriendRequest,
    pub user: UserSummary,
}

/// What sending a friend request ended up doing
#[derive(Debug, Clone)]
pub enum SendOutcome {
    /// A new pending request was created
    Sent(FriendRequest),
    /// The other user had already asked; their request was accepted instead
    AutoAccepted(FriendRequest),
}

impl SendOutcome {
    pub fn request(&self) -> &FriendRequest {
        match self {
            SendOutcome::Sent(r) | SendOutcome::AutoAccepted(r) => r,
        }
    }
}

/// Notification is an entry in a user's activity feed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    pub user_id: String,
    #[serde(rename = "type")]
    pub notification_type: NotificationType,
    pub related_user_id: Option<String>,
    pub message: String,
    pub link: String,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    FriendRequest,
    FriendAccepted,
    PostLike,
    Comment,
    Mention,
}

impl NotificationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationType::FriendRequest => "friend_request",
            NotificationType::FriendAccepted => "friend_accepted",
            NotificationType::PostLike => "post_like",
            NotificationType::Comment => "comment",
            NotificationType::Mention => "mention",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "friend_request" => Some(NotificationType::FriendRequest),
            "friend_accepted" => Some(NotificationType::FriendAccepted),
            "post_like" => Some(NotificationType::PostLike),
            "comment" => Some(NotificationType::Comment),
            "mention" => Some(NotificationType::Mention),
            _ => None,
        }
    }
}

/// BlockedUser is a directed block edge
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockedUser {
    pub id: String,
    pub blocker_id: String,
    pub blocked_id: String,
    pub reason: String,
    pub created_at: DateTime<Utc>,
}

/// Post is a captioned image shared by a user
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Post {
    pub id: String,
    pub author_id: String,
    pub image_url: String,
    pub caption: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Comment {
    pub id: String,
    pub post_id: String,
    pub author_id: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

// Request/Response types for API

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
    pub password_confirm: Option<String>,
    pub display_name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    /// Username or email
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub user: User,
}

#[derive(Debug, Default, Deserialize)]
pub struct SendFriendRequestBody {
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct BlockRequest {
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateProfileRequest {
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
    pub bio: Option<String>,
    /// `YYYY-MM-DD`, or an empty string to clear
    pub birth_date: Option<String>,
    pub location: Option<String>,
    pub website: Option<String>,
    pub is_private: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct CreatePostRequest {
    #[serde(default)]
    pub image_url: String,
    #[serde(default)]
    pub caption: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdatePostRequest {
    pub image_url: Option<String>,
    pub caption: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateCommentRequest {
    pub text: String,
}

#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            message: None,
            data: Some(data),
            error: None,
        }
    }

    pub fn with_message(msg: impl Into<String>, data: T) -> Self {
        Self {
            success: true,
            message: Some(msg.into()),
            data: Some(data),
            error: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            message: None,
            data: None,
            error: Some(msg.into()),
        }
    }
}

impl ApiResponse<()> {
    pub fn ok(msg: impl Into<String>) -> Self {
        Self {
            success: true,
            message: Some(msg.into()),
            data: None,
            error: None,
        }
    }
}
