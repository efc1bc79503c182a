use actix_web::{test, web, App};
use serde_json::json;
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
async fn test_view_profile_flags() {
    let (app, _store, auth_service) = init_app!();
    let (alice, alice_token) = create_test_user_with_token(&auth_service, "alice");
    let (bob, bob_token) = create_test_user_with_token(&auth_service, "bob");

    let req = test::TestRequest::get()
        .uri(&format!("/api/profiles/{}", alice.id))
        .insert_header(bearer(&alice_token))
        .to_request();
    let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["data"]["is_self"], true);
    assert_eq!(body["data"]["is_online"], true);
    assert_eq!(body["data"]["friends_count"], 0);

    let req = test::TestRequest::post()
        .uri(&format!("/api/friend-requests/send/{}", bob.id))
        .insert_header(bearer(&alice_token))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 201);

    let req = test::TestRequest::get()
        .uri(&format!("/api/profiles/{}", bob.id))
        .insert_header(bearer(&alice_token))
        .to_request();
    let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["data"]["is_self"], false);
    assert_eq!(body["data"]["request_sent"], true);
    assert!(body["data"]["incoming_request"].is_null());

    let req = test::TestRequest::get()
        .uri(&format!("/api/profiles/{}", alice.id))
        .insert_header(bearer(&bob_token))
        .to_request();
    let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["data"]["incoming_request"]["status"], "pending");
    assert_eq!(body["data"]["user"]["username"], "alice");
}

#[actix_web::test]
async fn test_view_missing_profile_is_404() {
    let (app, _store, auth_service) = init_app!();
    let (_alice, alice_token) = create_test_user_with_token(&auth_service, "alice");

    let req = test::TestRequest::get()
        .uri("/api/profiles/missing")
        .insert_header(bearer(&alice_token))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 404);
}

#[actix_web::test]
async fn test_update_profile() {
    let (app, store, auth_service) = init_app!();
    let (alice, alice_token) = create_test_user_with_token(&auth_service, "alice");

    let req = test::TestRequest::put()
        .uri("/api/profile")
        .insert_header(bearer(&alice_token))
        .set_json(json!({
            "display_name": "Alice Liddell",
            "bio": "Down the rabbit hole",
            "location": "Oxford",
            "website": "https://wonderland.example",
            "birth_date": "1852-05-04"
        }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["data"]["user"]["display_name"], "Alice Liddell");
    assert_eq!(body["data"]["profile"]["birth_date"], "1852-05-04");

    let profile = store.get_profile(&alice.id).unwrap();
    assert_eq!(profile.location, "Oxford");

    let req = test::TestRequest::put()
        .uri("/api/profile")
        .insert_header(bearer(&alice_token))
        .set_json(json!({ "website": "wonderland" }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);
    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "Website must be a valid URL");
}

#[actix_web::test]
async fn test_search_users() {
    let (app, _store, auth_service) = init_app!();
    let (_alice, alice_token) = create_test_user_with_token(&auth_service, "alice");
    create_test_user_with_token(&auth_service, "maxwell");
    create_test_user_with_token(&auth_service, "maxine");

    let req = test::TestRequest::get()
        .uri("/api/users/search?q=m")
        .insert_header(bearer(&alice_token))
        .to_request();
    let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
    assert!(body["data"]["results"].as_array().unwrap().is_empty());
    assert!(body["data"]["hint"].is_string());

    let req = test::TestRequest::get()
        .uri("/api/users/search?q=MAX")
        .insert_header(bearer(&alice_token))
        .to_request();
    let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
    let names: Vec<&str> = body["data"]["results"]
        .as_array()
        .unwrap()
        .iter()
        .map(|u| u["username"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["maxine", "maxwell"]);
    assert_eq!(body["data"]["results"][0]["is_friend"], false);
    assert_eq!(body["data"]["results"][0]["request_sent"], false);
}

#[actix_web::test]
async fn test_list_users_sort() {
    let (app, _store, auth_service) = init_app!();
    let (_zed, zed_token) = create_test_user_with_token(&auth_service, "zed");
    create_test_user_with_token(&auth_service, "bravo");
    create_test_user_with_token(&auth_service, "alpha");

    let req = test::TestRequest::get()
        .uri("/api/users?sort=username")
        .insert_header(bearer(&zed_token))
        .to_request();
    let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["data"][0]["username"], "alpha");
    assert_eq!(body["data"].as_array().unwrap().len(), 2);

    let req = test::TestRequest::get()
        .uri("/api/users?sort=date_joined")
        .insert_header(bearer(&zed_token))
        .to_request();
    let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["data"][0]["username"], "alpha");
    assert_eq!(body["data"][1]["username"], "bravo");

    let req = test::TestRequest::get()
        .uri("/api/users?sort=karma")
        .insert_header(bearer(&zed_token))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 400);
}
