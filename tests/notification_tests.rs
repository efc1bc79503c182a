use actix_web::{test, web, App};
use std::sync::Arc;

use socialnet::api::{self, AppState};
use socialnet::auth::AuthService;
use socialnet::models::{RegisterRequest, User};
use socialnet::store::Store;

macro_rules! init_app {
    () => {{
        let store = Arc::new(Store::new(":memory:").unwrap());
        let auth_service = Arc::new(AuthService::new("test_secret".to_string(), store.clone()));
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(auth_service.clone()))
                .app_data(web::Data::new(AppState::new(store.clone(), auth_service.clone())))
                .configure(api::configure_routes),
        )
        .await;
        (app, store, auth_service)
    }};
}

fn create_test_user_with_token(auth_service: &AuthService, username: &str) -> (User, String) {
    let user = auth_service
        .register(&RegisterRequest {
            username: username.to_string(),
            email: format!("{}@test.com", username),
            password: "testpass123".to_string(),
            password_confirm: None,
            display_name: None,
        })
        .unwrap();
    let token = auth_service.generate_token(&user.id).unwrap();
    (user, token)
}

fn bearer(token: &str) -> (&'static str, String) {
    ("Authorization", format!("Bearer {}", token))
}

#[actix_web::test]
async fn test_friend_request_notification_flow() {
    let (app, store, auth_service) = init_app!();
    let (alice, alice_token) = create_test_user_with_token(&auth_service, "alice");
    let (bob, bob_token) = create_test_user_with_token(&auth_service, "bob");

    let req = test::TestRequest::post()
        .uri(&format!("/api/friend-requests/send/{}", bob.id))
        .insert_header(bearer(&alice_token))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 201);

    let req = test::TestRequest::get()
        .uri("/api/notifications/unread")
        .insert_header(bearer(&bob_token))
        .to_request();
    let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["data"]["unread_count"], 1);
    let first = &body["data"]["notifications"][0];
    assert_eq!(first["type"], "friend_request");
    assert_eq!(first["message"], "alice sent you a friend request");
    assert_eq!(first["link"], "/friend-requests");
    assert_eq!(first["related_user"]["id"], alice.id);
    assert_eq!(first["is_read"], false);

    // Listing shows the entries as they were, then marks them read
    let req = test::TestRequest::get()
        .uri("/api/notifications")
        .insert_header(bearer(&bob_token))
        .to_request();
    let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["data"].as_array().unwrap().len(), 1);
    assert_eq!(body["data"][0]["is_read"], false);

    assert_eq!(store.count_unread_notifications(&bob.id).unwrap(), 0);
}

#[actix_web::test]
async fn test_mark_single_notification_read() {
    let (app, store, auth_service) = init_app!();
    let (_alice, alice_token) = create_test_user_with_token(&auth_service, "alice");
    let (bob, bob_token) = create_test_user_with_token(&auth_service, "bob");

    let req = test::TestRequest::post()
        .uri(&format!("/api/friend-requests/send/{}", bob.id))
        .insert_header(bearer(&alice_token))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 201);

    let notification_id = store.list_notifications(&bob.id, 1).unwrap()[0].id.clone();

    // Someone else's notification looks missing
    let req = test::TestRequest::post()
        .uri(&format!("/api/notifications/{}/read", notification_id))
        .insert_header(bearer(&alice_token))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 404);

    let req = test::TestRequest::post()
        .uri(&format!("/api/notifications/{}/read", notification_id))
        .insert_header(bearer(&bob_token))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 200);
    assert_eq!(store.count_unread_notifications(&bob.id).unwrap(), 0);
}

#[actix_web::test]
async fn test_notifications_require_auth() {
    let (app, _store, _auth_service) = init_app!();

    let req = test::TestRequest::get().uri("/api/notifications/unread").to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 401);
}
