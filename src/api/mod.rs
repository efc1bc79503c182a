use actix_web::error::InternalError;
use actix_web::{web, HttpResponse, Responder};
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::sync::Arc;

use crate::auth::{AuthError, AuthService, AuthUser};
use crate::models::*;
use crate::services::*;
use crate::store::{Store, StoreError, UserSort};

pub struct AppState {
    pub store: Arc<Store>,
    pub auth_service: Arc<AuthService>,
    pub friendships: FriendshipService,
    pub blocking: BlockingService,
    pub profiles: ProfileService,
    pub posts: PostService,
    pub notifications: NotificationService,
}

impl AppState {
    pub fn new(store: Arc<Store>, auth_service: Arc<AuthService>) -> Self {
        Self {
            friendships: FriendshipService::new(store.clone()),
            blocking: BlockingService::new(store.clone()),
            profiles: ProfileService::new(store.clone()),
            posts: PostService::new(store.clone()),
            notifications: NotificationService::new(store.clone()),
            store,
            auth_service,
        }
    }
}

/// Map a service failure onto a status code and the error envelope
pub fn service_error_response(e: ServiceError) -> HttpResponse {
    match e {
        ServiceError::Validation(msg) => HttpResponse::BadRequest().json(ApiResponse::<()>::error(msg)),
        ServiceError::NotFound(msg) => HttpResponse::NotFound().json(ApiResponse::<()>::error(msg)),
        ServiceError::Forbidden(msg) => HttpResponse::Forbidden().json(ApiResponse::<()>::error(msg)),
        ServiceError::Store(e) => {
            log::error!("Store failure: {}", e);
            HttpResponse::InternalServerError().json(ApiResponse::<()>::error("An error occurred"))
        }
    }
}

fn auth_error_response(e: AuthError) -> HttpResponse {
    match e {
        AuthError::InvalidCredentials => {
            HttpResponse::Unauthorized().json(ApiResponse::<()>::error("Invalid credentials"))
        }
        AuthError::Service(e) => service_error_response(e),
        other => {
            log::error!("Auth failure: {}", other);
            HttpResponse::InternalServerError().json(ApiResponse::<()>::error("An error occurred"))
        }
    }
}

/// Load the caller's account. A token for a deleted account is rejected.
/// Every authenticated request refreshes the caller's last-seen time.
fn current_user(state: &AppState, auth_user: &AuthUser) -> Result<User, HttpResponse> {
    match state.store.get_user(&auth_user.user_id) {
        Ok(user) => {
            if let Err(e) = state.store.touch_last_seen(&user.id) {
                log::warn!("Failed to update last seen for {}: {}", user.id, e);
            }
            Ok(user)
        }
        Err(StoreError::NotFound(_)) => {
            Err(HttpResponse::Unauthorized().json(ApiResponse::<()>::error("User not found")))
        }
        Err(e) => Err(service_error_response(e.into())),
    }
}

/// A JSON body that may be left out entirely. An empty body yields the
/// defaults; anything else has to parse.
fn optional_json<T: DeserializeOwned + Default>(body: &web::Bytes) -> Result<T, HttpResponse> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|e| {
        log::debug!("Rejected request body: {}", e);
        HttpResponse::BadRequest().json(ApiResponse::<()>::error(format!("Json deserialize error: {}", e)))
    })
}

// ==================== Health Check ====================

pub async fn health() -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "ok",
        "timestamp": Utc::now().to_rfc3339()
    }))
}

// ==================== Auth Endpoints ====================

pub async fn register(
    state: web::Data<AppState>,
    body: web::Json<RegisterRequest>,
) -> impl Responder {
    let user = match state.auth_service.register(&body) {
        Ok(u) => u,
        Err(e) => return auth_error_response(e),
    };

    let token = match state.auth_service.generate_token(&user.id) {
        Ok(t) => t,
        Err(e) => return auth_error_response(e.into()),
    };

    HttpResponse::Created().json(ApiResponse::success(LoginResponse { token, user }))
}

pub async fn login(
    state: web::Data<AppState>,
    body: web::Json<LoginRequest>,
) -> impl Responder {
    let user = match state.auth_service.authenticate(&body.username, &body.password) {
        Ok(u) => u,
        Err(e) => return auth_error_response(e),
    };

    let token = match state.auth_service.generate_token(&user.id) {
        Ok(t) => t,
        Err(e) => return auth_error_response(e.into()),
    };

    HttpResponse::Ok().json(ApiResponse::success(LoginResponse { token, user }))
}

pub async fn get_current_user(state: web::Data<AppState>, auth_user: AuthUser) -> impl Responder {
    let user = match current_user(&state, &auth_user) {
        Ok(u) => u,
        Err(resp) => return resp,
    };

    match state.profiles.account(&user.id) {
        Ok((user, profile)) => HttpResponse::Ok().json(ApiResponse::success(serde_json::json!({
            "user": user,
            "profile": profile,
        }))),
        Err(e) => service_error_response(e),
    }
}

pub async fn delete_current_user(state: web::Data<AppState>, auth_user: AuthUser) -> impl Responder {
    let user = match current_user(&state, &auth_user) {
        Ok(u) => u,
        Err(resp) => return resp,
    };

    match state.auth_service.delete_account(&user.id) {
        Ok(()) => HttpResponse::Ok().json(ApiResponse::ok("Account deleted")),
        Err(e) => auth_error_response(e),
    }
}

// ==================== User & Profile Endpoints ====================

#[derive(Deserialize)]
pub struct ListUsersQuery {
    #[serde(default)]
    sort: String,
}

pub async fn list_users(
    state: web::Data<AppState>,
    auth_user: AuthUser,
    query: web::Query<ListUsersQuery>,
) -> impl Responder {
    let user = match current_user(&state, &auth_user) {
        Ok(u) => u,
        Err(resp) => return resp,
    };

    let sort: UserSort = match query.sort.parse() {
        Ok(s) => s,
        Err(e) => return service_error_response(e),
    };

    match state.profiles.list_users(&user.id, sort) {
        Ok(users) => HttpResponse::Ok().json(ApiResponse::success(users)),
        Err(e) => service_error_response(e),
    }
}

#[derive(Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    q: String,
}

pub async fn search_users(
    state: web::Data<AppState>,
    auth_user: AuthUser,
    query: web::Query<SearchQuery>,
) -> impl Responder {
    let user = match current_user(&state, &auth_user) {
        Ok(u) => u,
        Err(resp) => return resp,
    };

    match state.profiles.search_users(&user.id, &query.q) {
        Ok(results) => HttpResponse::Ok().json(ApiResponse::success(results)),
        Err(e) => service_error_response(e),
    }
}

pub async fn get_profile(
    state: web::Data<AppState>,
    auth_user: AuthUser,
    path: web::Path<String>,
) -> impl Responder {
    let user = match current_user(&state, &auth_user) {
        Ok(u) => u,
        Err(resp) => return resp,
    };

    match state.profiles.profile_view(&user.id, &path.into_inner()) {
        Ok(view) => HttpResponse::Ok().json(ApiResponse::success(view)),
        Err(e) => service_error_response(e),
    }
}

pub async fn update_profile(
    state: web::Data<AppState>,
    auth_user: AuthUser,
    body: web::Json<UpdateProfileRequest>,
) -> impl Responder {
    let user = match current_user(&state, &auth_user) {
        Ok(u) => u,
        Err(resp) => return resp,
    };

    match state.profiles.update_profile(&user.id, &body) {
        Ok((user, profile)) => HttpResponse::Ok().json(ApiResponse::with_message(
            "Profile updated",
            serde_json::json!({ "user": user, "profile": profile }),
        )),
        Err(e) => service_error_response(e),
    }
}

pub async fn list_friends(
    state: web::Data<AppState>,
    auth_user: AuthUser,
    path: web::Path<String>,
) -> impl Responder {
    if let Err(resp) = current_user(&state, &auth_user) {
        return resp;
    }

    match state.profiles.friends_of(&path.into_inner()) {
        Ok(friends) => HttpResponse::Ok().json(ApiResponse::success(friends)),
        Err(e) => service_error_response(e),
    }
}

// ==================== Friend Request Endpoints ====================

pub async fn send_friend_request(
    state: web::Data<AppState>,
    auth_user: AuthUser,
    path: web::Path<String>,
    body: web::Bytes,
) -> impl Responder {
    let user = match current_user(&state, &auth_user) {
        Ok(u) => u,
        Err(resp) => return resp,
    };

    let message = match optional_json::<SendFriendRequestBody>(&body) {
        Ok(b) => b.message,
        Err(resp) => return resp,
    };
    match state.friendships.send_friend_request(&user, &path.into_inner(), &message) {
        Ok(SendOutcome::Sent(request)) => {
            HttpResponse::Created().json(ApiResponse::with_message("Friend request sent", request))
        }
        Ok(SendOutcome::AutoAccepted(request)) => {
            HttpResponse::Ok().json(ApiResponse::with_message("You are now friends", request))
        }
        Err(e) => service_error_response(e),
    }
}

pub async fn list_friend_requests(state: web::Data<AppState>, auth_user: AuthUser) -> impl Responder {
    let user = match current_user(&state, &auth_user) {
        Ok(u) => u,
        Err(resp) => return resp,
    };

    let incoming = match state.friendships.incoming_requests(&user.id) {
        Ok(r) => r,
        Err(e) => return service_error_response(e),
    };
    let outgoing = match state.friendships.outgoing_requests(&user.id) {
        Ok(r) => r,
        Err(e) => return service_error_response(e),
    };

    HttpResponse::Ok().json(ApiResponse::success(serde_json::json!({
        "incoming": incoming,
        "outgoing": outgoing,
    })))
}

pub async fn count_friend_requests(state: web::Data<AppState>, auth_user: AuthUser) -> impl Responder {
    let user = match current_user(&state, &auth_user) {
        Ok(u) => u,
        Err(resp) => return resp,
    };

    match state.friendships.incoming_count(&user.id) {
        Ok(count) => HttpResponse::Ok().json(ApiResponse::success(serde_json::json!({ "count": count }))),
        Err(e) => service_error_response(e),
    }
}

pub async fn accept_friend_request(
    state: web::Data<AppState>,
    auth_user: AuthUser,
    path: web::Path<String>,
) -> impl Responder {
    let user = match current_user(&state, &auth_user) {
        Ok(u) => u,
        Err(resp) => return resp,
    };

    match state.friendships.accept_request(&user, &path.into_inner()) {
        Ok(request) => HttpResponse::Ok().json(ApiResponse::with_message("Friend request accepted", request)),
        Err(e) => service_error_response(e),
    }
}

pub async fn reject_friend_request(
    state: web::Data<AppState>,
    auth_user: AuthUser,
    path: web::Path<String>,
) -> impl Responder {
    let user = match current_user(&state, &auth_user) {
        Ok(u) => u,
        Err(resp) => return resp,
    };

    match state.friendships.reject_request(&user, &path.into_inner()) {
        Ok(request) => HttpResponse::Ok().json(ApiResponse::with_message("Friend request rejected", request)),
        Err(e) => service_error_response(e),
    }
}

pub async fn cancel_friend_request(
    state: web::Data<AppState>,
    auth_user: AuthUser,
    path: web::Path<String>,
) -> impl Responder {
    let user = match current_user(&state, &auth_user) {
        Ok(u) => u,
        Err(resp) => return resp,
    };

    match state.friendships.cancel_request(&user, &path.into_inner()) {
        Ok(()) => HttpResponse::Ok().json(ApiResponse::ok("Friend request cancelled")),
        Err(e) => service_error_response(e),
    }
}

// ==================== Friends Endpoints ====================

pub async fn remove_friend(
    state: web::Data<AppState>,
    auth_user: AuthUser,
    path: web::Path<String>,
) -> impl Responder {
    let user = match current_user(&state, &auth_user) {
        Ok(u) => u,
        Err(resp) => return resp,
    };

    match state.friendships.remove_friend(&user, &path.into_inner()) {
        Ok(()) => HttpResponse::Ok().json(ApiResponse::ok("Friend removed")),
        Err(e) => service_error_response(e),
    }
}

pub async fn mutual_friends(
    state: web::Data<AppState>,
    auth_user: AuthUser,
    path: web::Path<String>,
) -> impl Responder {
    let user = match current_user(&state, &auth_user) {
        Ok(u) => u,
        Err(resp) => return resp,
    };

    match state.friendships.mutual_friends(&user.id, &path.into_inner()) {
        Ok(mutual) => HttpResponse::Ok().json(ApiResponse::success(mutual)),
        Err(e) => service_error_response(e),
    }
}

#[derive(Deserialize)]
pub struct SuggestionsQuery {
    limit: Option<i64>,
}

pub async fn friend_suggestions(
    state: web::Data<AppState>,
    auth_user: AuthUser,
    query: web::Query<SuggestionsQuery>,
) -> impl Responder {
    let user = match current_user(&state, &auth_user) {
        Ok(u) => u,
        Err(resp) => return resp,
    };

    let limit = query
        .limit
        .unwrap_or(friendship::DEFAULT_SUGGESTION_LIMIT)
        .clamp(0, 50);
    match state.friendships.friend_suggestions(&user.id, limit) {
        Ok(suggestions) => HttpResponse::Ok().json(ApiResponse::success(suggestions)),
        Err(e) => service_error_response(e),
    }
}

// ==================== Block Endpoints ====================

pub async fn list_blocks(state: web::Data<AppState>, auth_user: AuthUser) -> impl Responder {
    let user = match current_user(&state, &auth_user) {
        Ok(u) => u,
        Err(resp) => return resp,
    };

    match state.blocking.blocked_users(&user.id) {
        Ok(blocks) => HttpResponse::Ok().json(ApiResponse::success(blocks)),
        Err(e) => service_error_response(e),
    }
}

pub async fn block_user(
    state: web::Data<AppState>,
    auth_user: AuthUser,
    path: web::Path<String>,
    body: web::Bytes,
) -> impl Responder {
    let user = match current_user(&state, &auth_user) {
        Ok(u) => u,
        Err(resp) => return resp,
    };

    let reason = match optional_json::<BlockRequest>(&body) {
        Ok(b) => b.reason,
        Err(resp) => return resp,
    };
    match state.blocking.block(&user, &path.into_inner(), &reason) {
        Ok(block) => HttpResponse::Created().json(ApiResponse::with_message("User blocked", block)),
        Err(e) => service_error_response(e),
    }
}

pub async fn unblock_user(
    state: web::Data<AppState>,
    auth_user: AuthUser,
    path: web::Path<String>,
) -> impl Responder {
    let user = match current_user(&state, &auth_user) {
        Ok(u) => u,
        Err(resp) => return resp,
    };

    match state.blocking.unblock(&user, &path.into_inner()) {
        Ok(()) => HttpResponse::Ok().json(ApiResponse::ok("User unblocked")),
        Err(e) => service_error_response(e),
    }
}

// ==================== Notification Endpoints ====================

pub async fn list_notifications(state: web::Data<AppState>, auth_user: AuthUser) -> impl Responder {
    let user = match current_user(&state, &auth_user) {
        Ok(u) => u,
        Err(resp) => return resp,
    };

    match state.notifications.list_and_mark_read(&user.id) {
        Ok(notifications) => HttpResponse::Ok().json(ApiResponse::success(notifications)),
        Err(e) => service_error_response(e),
    }
}

pub async fn unread_notifications(state: web::Data<AppState>, auth_user: AuthUser) -> impl Responder {
    let user = match current_user(&state, &auth_user) {
        Ok(u) => u,
        Err(resp) => return resp,
    };

    match state.notifications.unread_feed(&user.id) {
        Ok(feed) => HttpResponse::Ok().json(ApiResponse::success(feed)),
        Err(e) => service_error_response(e),
    }
}

pub async fn mark_notification_read(
    state: web::Data<AppState>,
    auth_user: AuthUser,
    path: web::Path<String>,
) -> impl Responder {
    let user = match current_user(&state, &auth_user) {
        Ok(u) => u,
        Err(resp) => return resp,
    };

    match state.notifications.mark_read(&user.id, &path.into_inner()) {
        Ok(()) => HttpResponse::Ok().json(ApiResponse::ok("Notification marked as read")),
        Err(e) => service_error_response(e),
    }
}

// ==================== Post Endpoints ====================

pub async fn list_posts(state: web::Data<AppState>, auth_user: AuthUser) -> impl Responder {
    let user = match current_user(&state, &auth_user) {
        Ok(u) => u,
        Err(resp) => return resp,
    };

    match state.posts.feed(&user.id) {
        Ok(posts) => HttpResponse::Ok().json(ApiResponse::success(posts)),
        Err(e) => service_error_response(e),
    }
}

pub async fn create_post(
    state: web::Data<AppState>,
    auth_user: AuthUser,
    body: web::Json<CreatePostRequest>,
) -> impl Responder {
    let user = match current_user(&state, &auth_user) {
        Ok(u) => u,
        Err(resp) => return resp,
    };

    match state.posts.create(&user, &body) {
        Ok(post) => HttpResponse::Created().json(ApiResponse::success(post)),
        Err(e) => service_error_response(e),
    }
}

pub async fn get_post(
    state: web::Data<AppState>,
    auth_user: AuthUser,
    path: web::Path<String>,
) -> impl Responder {
    let user = match current_user(&state, &auth_user) {
        Ok(u) => u,
        Err(resp) => return resp,
    };

    match state.posts.detail(&user.id, &path.into_inner()) {
        Ok(detail) => HttpResponse::Ok().json(ApiResponse::success(detail)),
        Err(e) => service_error_response(e),
    }
}

pub async fn update_post(
    state: web::Data<AppState>,
    auth_user: AuthUser,
    path: web::Path<String>,
    body: web::Json<UpdatePostRequest>,
) -> impl Responder {
    let user = match current_user(&state, &auth_user) {
        Ok(u) => u,
        Err(resp) => return resp,
    };

    match state.posts.update(&user, &path.into_inner(), &body) {
        Ok(post) => HttpResponse::Ok().json(ApiResponse::success(post)),
        Err(e) => service_error_response(e),
    }
}

pub async fn delete_post(
    state: web::Data<AppState>,
    auth_user: AuthUser,
    path: web::Path<String>,
) -> impl Responder {
    let user = match current_user(&state, &auth_user) {
        Ok(u) => u,
        Err(resp) => return resp,
    };

    match state.posts.delete(&user, &path.into_inner()) {
        Ok(()) => HttpResponse::Ok().json(ApiResponse::ok("Post deleted")),
        Err(e) => service_error_response(e),
    }
}

pub async fn like_post(
    state: web::Data<AppState>,
    auth_user: AuthUser,
    path: web::Path<String>,
) -> impl Responder {
    let user = match current_user(&state, &auth_user) {
        Ok(u) => u,
        Err(resp) => return resp,
    };

    match state.posts.toggle_like(&user, &path.into_inner()) {
        Ok(outcome) => HttpResponse::Ok().json(ApiResponse::success(outcome)),
        Err(e) => service_error_response(e),
    }
}

pub async fn add_comment(
    state: web::Data<AppState>,
    auth_user: AuthUser,
    path: web::Path<String>,
    body: web::Json<CreateCommentRequest>,
) -> impl Responder {
    let user = match current_user(&state, &auth_user) {
        Ok(u) => u,
        Err(resp) => return resp,
    };

    match state.posts.add_comment(&user, &path.into_inner(), &body.text) {
        Ok(comment) => HttpResponse::Created().json(ApiResponse::success(comment)),
        Err(e) => service_error_response(e),
    }
}

// ==================== Route Configuration ====================

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    // Malformed bodies and query strings get the same envelope as every other error
    let json_config = web::JsonConfig::default().error_handler(|err, _req| {
        let msg = err.to_string();
        InternalError::from_response(err, HttpResponse::BadRequest().json(ApiResponse::<()>::error(msg))).into()
    });
    let query_config = web::QueryConfig::default().error_handler(|err, _req| {
        let msg = err.to_string();
        InternalError::from_response(err, HttpResponse::BadRequest().json(ApiResponse::<()>::error(msg))).into()
    });

    cfg
        .app_data(json_config)
        .app_data(query_config)
        // Health check
        .route("/health", web::get().to(health))

        // Auth routes (no auth required)
        .route("/api/auth/register", web::post().to(register))
        .route("/api/auth/login", web::post().to(login))

        // Current account
        .route("/api/auth/me", web::get().to(get_current_user))
        .route("/api/auth/me", web::delete().to(delete_current_user))

        // Users & profiles
        .route("/api/users", web::get().to(list_users))
        .route("/api/users/search", web::get().to(search_users))
        .route("/api/profile", web::put().to(update_profile))
        .route("/api/profiles/{user_id}", web::get().to(get_profile))
        .route("/api/profiles/{user_id}/friends", web::get().to(list_friends))

        // Friend requests
        .route("/api/friend-requests", web::get().to(list_friend_requests))
        .route("/api/friend-requests/count", web::get().to(count_friend_requests))
        .route("/api/friend-requests/send/{user_id}", web::post().to(send_friend_request))
        .route("/api/friend-requests/{id}/accept", web::post().to(accept_friend_request))
        .route("/api/friend-requests/{id}/reject", web::post().to(reject_friend_request))
        .route("/api/friend-requests/{id}/cancel", web::post().to(cancel_friend_request))

        // Friends
        .route("/api/friends/suggestions", web::get().to(friend_suggestions))
        .route("/api/friends/{user_id}/remove", web::post().to(remove_friend))
        .route("/api/friends/{user_id}/mutual", web::get().to(mutual_friends))

        // Blocks
        .route("/api/blocks", web::get().to(list_blocks))
        .route("/api/blocks/{user_id}", web::post().to(block_user))
        .route("/api/blocks/{user_id}", web::delete().to(unblock_user))

        // Notifications
        .route("/api/notifications", web::get().to(list_notifications))
        .route("/api/notifications/unread", web::get().to(unread_notifications))
        .route("/api/notifications/{id}/read", web::post().to(mark_notification_read))

        // Posts
        .route("/api/posts", web::get().to(list_posts))
        .route("/api/posts", web::post().to(create_post))
        .route("/api/posts/{id}", web::get().to(get_post))
        .route("/api/posts/{id}", web::put().to(update_post))
        .route("/api/posts/{id}", web::delete().to(delete_post))
        .route("/api/posts/{id}/like", web::post().to(like_post))
        .route("/api/posts/{id}/comments", web::post().to(add_comment));
}
