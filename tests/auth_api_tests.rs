use actix_web::{test, web, App};
use serde_json::json;
use std::sync::Arc;

use socialnet::api::{self, AppState};
use socialnet::auth::AuthService;
use socialnet::store::Store;

/// Build the app with an in-memory store
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
        (app, store)
    }};
}

/// Helper macro to register a user and get their token
macro_rules! register_and_get_token {
    ($app:expr, $username:expr) => {{
        let req = test::TestRequest::post()
            .uri("/api/auth/register")
            .set_json(json!({
                "username": $username,
                "email": format!("{}@example.com", $username),
                "password": "password123"
            }))
            .to_request();

        let resp: serde_json::Value = test::call_and_read_body_json(&$app, req).await;
        resp["data"]["token"].as_str().unwrap().to_string()
    }};
}

// ==================== Registration Tests ====================

#[actix_web::test]
async fn test_register_success() {
    let (app, store) = init_app!();

    let req = test::TestRequest::post()
        .uri("/api/auth/register")
        .set_json(json!({
            "username": "testuser",
            "email": "test@example.com",
            "password": "securepassword123",
            "password_confirm": "securepassword123"
        }))
        .to_request();

    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 201);
    let body: serde_json::Value = test::read_body_json(resp).await;

    assert_eq!(body["success"], true);
    assert!(body["data"]["token"].is_string());
    assert_eq!(body["data"]["user"]["username"], "testuser");
    assert_eq!(body["data"]["user"]["display_name"], "testuser");
    // Password should not be in response
    assert!(body["data"]["user"]["password_hash"].is_null());

    // The profile is created with the user
    let user_id = body["data"]["user"]["id"].as_str().unwrap();
    assert!(store.get_profile(user_id).is_ok());
}

#[actix_web::test]
async fn test_register_validation() {
    let (app, _store) = init_app!();

    let cases = [
        (json!({"username": "ab", "email": "a@example.com", "password": "password123"}),
         "Username must be between 3 and 30 characters"),
        (json!({"username": "abc", "email": "a@example.com", "password": "short"}),
         "Password must be at least 8 characters"),
        (json!({"username": "abc", "email": "a@example.com", "password": "password123", "password_confirm": "password321"}),
         "Passwords do not match"),
    ];

    for (payload, expected) in cases {
        let req = test::TestRequest::post()
            .uri("/api/auth/register")
            .set_json(payload)
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 400);
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["success"], false);
        assert_eq!(body["error"], expected);
    }
}

#[actix_web::test]
async fn test_register_duplicate_username_and_email() {
    let (app, _store) = init_app!();
    register_and_get_token!(app, "taken");

    let req = test::TestRequest::post()
        .uri("/api/auth/register")
        .set_json(json!({"username": "Taken", "email": "other@example.com", "password": "password123"}))
        .to_request();
    let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["error"], "Username already taken");

    let req = test::TestRequest::post()
        .uri("/api/auth/register")
        .set_json(json!({"username": "fresh", "email": "taken@example.com", "password": "password123"}))
        .to_request();
    let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["error"], "Email already registered");
}

#[actix_web::test]
async fn test_register_malformed_json() {
    let (app, _store) = init_app!();

    // Missing password
    let req = test::TestRequest::post()
        .uri("/api/auth/register")
        .set_json(json!({"username": "testuser", "email": "test@example.com"}))
        .to_request();

    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);
    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["success"], false);
    assert!(body["error"].is_string());
}

// ==================== Login Tests ====================

#[actix_web::test]
async fn test_login_with_username_or_email() {
    let (app, _store) = init_app!();
    register_and_get_token!(app, "loginuser");

    for login in ["loginuser", "loginuser@example.com"] {
        let req = test::TestRequest::post()
            .uri("/api/auth/login")
            .set_json(json!({"username": login, "password": "password123"}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 200);
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert!(body["data"]["token"].is_string());
        assert_eq!(body["data"]["user"]["username"], "loginuser");
    }
}

#[actix_web::test]
async fn test_login_wrong_password() {
    let (app, _store) = init_app!();
    register_and_get_token!(app, "loginuser");

    let req = test::TestRequest::post()
        .uri("/api/auth/login")
        .set_json(json!({"username": "loginuser", "password": "wrongpassword"}))
        .to_request();

    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 401);
    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "Invalid credentials");
}

// ==================== Current User Tests ====================

#[actix_web::test]
async fn test_me_requires_token() {
    let (app, _store) = init_app!();

    let req = test::TestRequest::get().uri("/api/auth/me").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 401);

    let req = test::TestRequest::get()
        .uri("/api/auth/me")
        .insert_header(("Authorization", "Bearer not-a-jwt"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 401);
    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["success"], false);
}

#[actix_web::test]
async fn test_me_returns_user_and_profile() {
    let (app, _store) = init_app!();
    let token = register_and_get_token!(app, "meuser");

    let req = test::TestRequest::get()
        .uri("/api/auth/me")
        .insert_header(("Authorization", format!("Bearer {}", token)))
        .to_request();
    let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;

    assert_eq!(body["data"]["user"]["username"], "meuser");
    assert_eq!(body["data"]["profile"]["bio"], "");
    assert_eq!(body["data"]["profile"]["user_id"], body["data"]["user"]["id"]);
}

#[actix_web::test]
async fn test_delete_account() {
    let (app, store) = init_app!();
    let token = register_and_get_token!(app, "leaving");
    assert_eq!(store.count_users().unwrap(), 1);

    let req = test::TestRequest::delete()
        .uri("/api/auth/me")
        .insert_header(("Authorization", format!("Bearer {}", token)))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    assert_eq!(store.count_users().unwrap(), 0);

    // The token no longer maps to anyone
    let req = test::TestRequest::get()
        .uri("/api/auth/me")
        .insert_header(("Authorization", format!("Bearer {}", token)))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 401);
}

#[actix_web::test]
async fn test_health() {
    let (app, _store) = init_app!();

    let req = test::TestRequest::get().uri("/health").to_request();
    let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["status"], "ok");
}
