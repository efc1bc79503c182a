use chrono::{NaiveDate, Utc};
use serde::Serialize;
use std::sync::Arc;

use crate::models::*;
use crate::services::{check_max_chars, check_url, validation, ServiceError, ServiceResult};
use crate::store::{Store, StoreError, UserSort};

pub const MAX_BIO: usize = 500;
pub const MAX_LOCATION: usize = 100;
pub const MAX_WEBSITE: usize = 200;
pub const MAX_AVATAR_URL: usize = 500;
pub const MAX_DISPLAY_NAME: usize = 50;

/// Friends shown on a profile page
pub const PROFILE_FRIENDS: i64 = 12;
/// Posts shown on a profile page
pub const PROFILE_POSTS: i64 = 9;

pub const MIN_SEARCH_QUERY: usize = 2;
pub const MAX_SEARCH_RESULTS: i64 = 20;

/// A user's profile as seen by `viewer`
#[derive(Debug, Clone, Serialize)]
pub struct ProfileView {
    pub user: User,
    pub profile: Profile,
    pub is_self: bool,
    pub is_friend: bool,
    /// The viewer has a pending request out to this user
    pub request_sent: bool,
    /// This user's pending request to the viewer, if any
    pub incoming_request: Option<FriendRequest>,
    /// The viewer has blocked this user
    pub is_blocked: bool,
    pub is_online: bool,
    pub friends_count: i64,
    pub friends: Vec<UserSummary>,
    pub posts: Vec<Post>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchEntry {
    #[serde(flatten)]
    pub user: UserSummary,
    pub is_friend: bool,
    pub request_sent: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResults {
    pub query: String,
    pub results: Vec<SearchEntry>,
    /// Set when the query was too short to run
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

#[derive(Clone)]
pub struct ProfileService {
    store: Arc<Store>,
}

impl ProfileService {
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

    /// The account and profile of a signed-in user
    pub fn account(&self, user_id: &str) -> ServiceResult<(User, Profile)> {
        let user = self.load_user(user_id)?;
        let profile = self.store.get_profile(&user.id)?;
        Ok((user, profile))
    }

    pub fn profile_view(&self, viewer_id: &str, user_id: &str) -> ServiceResult<ProfileView> {
        let user = self.load_user(user_id)?;
        let profile = self.store.get_profile(&user.id)?;
        let is_self = viewer_id == user.id;

        let (is_friend, request_sent, incoming_request, is_blocked) = if is_self {
            (false, false, None, false)
        } else {
            let sent = self.store.find_friend_request(viewer_id, &user.id)?;
            let incoming = self
                .store
                .find_friend_request(&user.id, viewer_id)?
                .filter(|r| r.status == FriendRequestStatus::Pending);
            (
                self.store.are_friends(viewer_id, &user.id)?,
                matches!(sent, Some(r) if r.status == FriendRequestStatus::Pending),
                incoming,
                self.store.is_blocked(viewer_id, &user.id)?,
            )
        };

        Ok(ProfileView {
            is_online: profile.is_online(),
            friends_count: self.store.count_friends(&user.id)?,
            friends: self.store.list_friends(&user.id, Some(PROFILE_FRIENDS))?,
            posts: self.store.list_posts_by_author(&user.id, PROFILE_POSTS)?,
            user,
            profile,
            is_self,
            is_friend,
            request_sent,
            incoming_request,
            is_blocked,
        })
    }

    /// Apply a partial update to the user's own profile. Every field is
    /// validated before anything is written.
    pub fn update_profile(&self, user_id: &str, req: &UpdateProfileRequest) -> ServiceResult<(User, Profile)> {
        let (mut user, mut profile) = self.account(user_id)?;

        if let Some(display_name) = &req.display_name {
            let display_name = display_name.trim();
            check_max_chars(display_name, MAX_DISPLAY_NAME, "Display name")?;
            user.display_name = if display_name.is_empty() {
                user.username.clone()
            } else {
                display_name.to_string()
            };
        }
        if let Some(avatar_url) = &req.avatar_url {
            let avatar_url = avatar_url.trim();
            check_url(avatar_url, MAX_AVATAR_URL, "Avatar URL")?;
            profile.avatar_url = avatar_url.to_string();
        }
        if let Some(bio) = &req.bio {
            let bio = bio.trim();
            check_max_chars(bio, MAX_BIO, "Bio")?;
            profile.bio = bio.to_string();
        }
        if let Some(birth_date) = &req.birth_date {
            profile.birth_date = parse_birth_date(birth_date.trim())?;
        }
        if let Some(location) = &req.location {
            let location = location.trim();
            check_max_chars(location, MAX_LOCATION, "Location")?;
            profile.location = location.to_string();
        }
        if let Some(website) = &req.website {
            let website = website.trim();
            check_url(website, MAX_WEBSITE, "Website")?;
            profile.website = website.to_string();
        }
        if let Some(is_private) = req.is_private {
            profile.is_private = is_private;
        }

        if req.display_name.is_some() {
            self.store.update_user(&mut user)?;
        }
        self.store.update_profile(&mut profile)?;

        log::info!("Updated profile for {}", user.username);
        Ok((user, profile))
    }

    /// A user's friends, ordered by username
    pub fn friends_of(&self, user_id: &str) -> ServiceResult<Vec<UserSummary>> {
        let user = self.load_user(user_id)?;
        Ok(self.store.list_friends(&user.id, None)?)
    }

    /// Everyone but the viewer and the people they blocked
    pub fn list_users(&self, viewer_id: &str, sort: UserSort) -> ServiceResult<Vec<UserSummary>> {
        Ok(self.store.list_users(viewer_id, sort)?)
    }

    pub fn search_users(&self, viewer_id: &str, query: &str) -> ServiceResult<SearchResults> {
        let query = query.trim();
        if query.chars().count() < MIN_SEARCH_QUERY {
            return Ok(SearchResults {
                query: query.to_string(),
                results: Vec::new(),
                hint: Some(format!("Enter at least {} characters to search", MIN_SEARCH_QUERY)),
            });
        }

        let results = self
            .store
            .search_users(viewer_id, query, MAX_SEARCH_RESULTS)?
            .into_iter()
            .map(|user| {
                let is_friend = self.store.are_friends(viewer_id, &user.id)?;
                let request_sent = matches!(
                    self.store.find_friend_request(viewer_id, &user.id)?,
                    Some(r) if r.status == FriendRequestStatus::Pending
                );
                Ok(SearchEntry { user, is_friend, request_sent })
            })
            .collect::<ServiceResult<Vec<_>>>()?;

        Ok(SearchResults {
            query: query.to_string(),
            results,
            hint: None,
        })
    }
}

/// Empty clears the date; otherwise `YYYY-MM-DD`, not in the future
fn parse_birth_date(value: &str) -> ServiceResult<Option<NaiveDate>> {
    if value.is_empty() {
        return Ok(None);
    }
    let date = NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|_| validation("Birth date must be in YYYY-MM-DD format"))?;
    if date > Utc::now().date_naive() {
        return Err(validation("Birth date cannot be in the future"));
    }
    Ok(Some(date))
}

impl std::str::FromStr for UserSort {
    type Err = ServiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" | "username" => Ok(UserSort::Username),
            "date_joined" => Ok(UserSort::DateJoined),
            other => Err(validation(format!("Unknown sort order: {}", other))),
        }
    }
}
