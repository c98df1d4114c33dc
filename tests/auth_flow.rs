//! End-to-end tests for the session lifecycle, driven through the router.

use axum::{
    body::Body,
    http::{header, Request, Response, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use tower::ServiceExt;
use vidtube::{app::build_app, state::AppState};

const BOUNDARY: &str = "----vidtube-test-boundary";

fn spawn_app() -> Router {
    build_app(AppState::fake()).expect("router builds")
}

fn multipart_body(texts: &[(&str, &str)], files: &[(&str, &str)]) -> Body {
    let mut body = String::new();
    for (name, value) in texts {
        body.push_str(&format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
        ));
    }
    for (name, file_name) in files {
        body.push_str(&format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"; filename=\"{file_name}\"\r\nContent-Type: image/png\r\n\r\nfake-png-bytes\r\n"
        ));
    }
    body.push_str(&format!("--{BOUNDARY}--\r\n"));
    Body::from(body)
}

fn register_request(username: &str, email: &str, with_avatar: bool) -> Request<Body> {
    let texts = [
        ("username", username),
        ("email", email),
        ("fullName", "Alice Liddell"),
        ("password", "wonderland"),
    ];
    let files: &[(&str, &str)] = if with_avatar {
        &[("avatar", "me.png")]
    } else {
        &[]
    };
    Request::builder()
        .method("POST")
        .uri("/api/v1/users/register")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(multipart_body(&texts, files))
        .unwrap()
}

fn json_request(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn login_request(username: &str, password: &str) -> Request<Body> {
    json_request(
        "POST",
        "/api/v1/users/login",
        serde_json::json!({ "username": username, "password": password }),
    )
}

fn bearer(method: &str, uri: &str, token: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap()
}

fn set_cookies(res: &Response<Body>) -> Vec<String> {
    res.headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .map(|v| v.to_str().unwrap().to_string())
        .collect()
}

async fn json_body(res: Response<Body>) -> serde_json::Value {
    let bytes = res.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

async fn register_and_login(app: &Router) -> (String, String) {
    let res = app
        .clone()
        .oneshot(register_request("alice", "alice@x.com", true))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);

    let res = app
        .clone()
        .oneshot(login_request("alice", "wonderland"))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body = json_body(res).await;
    (
        body["data"]["accessToken"].as_str().unwrap().to_string(),
        body["data"]["refreshToken"].as_str().unwrap().to_string(),
    )
}

#[tokio::test]
async fn test_register_returns_sanitized_user() {
    let app = spawn_app();
    let res = app
        .clone()
        .oneshot(register_request(" Alice ", "alice@x.com", true))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);

    let body = json_body(res).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["statusCode"], 201);
    let user = &body["data"];
    assert_eq!(user["username"], "alice");
    assert_eq!(user["email"], "alice@x.com");
    assert!(user["avatar"].as_str().unwrap().starts_with("https://fake.local/"));
    assert!(user.get("password").is_none());
    assert!(user.get("passwordHash").is_none());
    assert!(user.get("refreshToken").is_none());
}

#[tokio::test]
async fn test_register_without_avatar_is_rejected() {
    let app = spawn_app();
    let res = app
        .clone()
        .oneshot(register_request("alice", "alice@x.com", false))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body = json_body(res).await;
    assert_eq!(body["success"], false);
    assert_eq!(body["statusCode"], 400);
}

#[tokio::test]
async fn test_register_duplicates_conflict() {
    let app = spawn_app();
    let first = app
        .clone()
        .oneshot(register_request("alice", "alice@x.com", true))
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::CREATED);

    let same_name = app
        .clone()
        .oneshot(register_request("alice", "other@x.com", true))
        .await
        .unwrap();
    assert_eq!(same_name.status(), StatusCode::CONFLICT);

    let same_email = app
        .clone()
        .oneshot(register_request("bob", "alice@x.com", true))
        .await
        .unwrap();
    assert_eq!(same_email.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_login_sets_cookies_and_returns_tokens() {
    let app = spawn_app();
    app.clone()
        .oneshot(register_request("alice", "alice@x.com", true))
        .await
        .unwrap();

    let res = app
        .clone()
        .oneshot(login_request("alice", "wonderland"))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let cookies = set_cookies(&res);
    assert_eq!(cookies.len(), 2);
    assert!(cookies.iter().any(|c| c.starts_with("accessToken=")));
    assert!(cookies.iter().any(|c| c.starts_with("refreshToken=")));
    assert!(cookies.iter().all(|c| c.contains("HttpOnly") && c.contains("Secure")));

    let body = json_body(res).await;
    assert!(body["data"]["accessToken"].is_string());
    assert!(body["data"]["refreshToken"].is_string());
    assert_eq!(body["data"]["user"]["username"], "alice");
}

#[tokio::test]
async fn test_login_wrong_password_sets_no_cookies() {
    let app = spawn_app();
    app.clone()
        .oneshot(register_request("alice", "alice@x.com", true))
        .await
        .unwrap();

    let res = app
        .clone()
        .oneshot(login_request("alice", "looking-glass"))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    assert!(set_cookies(&res).is_empty());
    let body = json_body(res).await;
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn test_login_rejects_unknown_fields() {
    let app = spawn_app();
    let res = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/v1/users/login",
            serde_json::json!({ "username": "alice", "password": "x", "role": "admin" }),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(res).await["success"], false);
}

#[tokio::test]
async fn test_current_user_via_bearer_and_cookie() {
    let app = spawn_app();
    let (access, _) = register_and_login(&app).await;

    let res = app
        .clone()
        .oneshot(bearer("GET", "/api/v1/users/current-user", &access))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(json_body(res).await["data"]["username"], "alice");

    let res = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/v1/users/current-user")
                .header(header::COOKIE, format!("accessToken={access}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_current_user_requires_token() {
    let app = spawn_app();
    let res = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/v1/users/current-user")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let res = app
        .clone()
        .oneshot(bearer("GET", "/api/v1/users/current-user", "not.a.token"))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_refresh_rotates_and_old_token_fails() {
    let app = spawn_app();
    let (_, refresh) = register_and_login(&app).await;

    let res = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/v1/users/refresh-access-token")
                .header(header::COOKIE, format!("refreshToken={refresh}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(set_cookies(&res).len(), 2);
    let body = json_body(res).await;
    let rotated = body["data"]["refreshToken"].as_str().unwrap().to_string();
    assert_ne!(rotated, refresh);
    assert!(body["data"]["accessToken"].is_string());

    let replay = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/v1/users/refresh-access-token",
            serde_json::json!({ "refreshToken": refresh }),
        ))
        .await
        .unwrap();
    assert_eq!(replay.status(), StatusCode::UNAUTHORIZED);

    let next = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/v1/users/refresh-access-token",
            serde_json::json!({ "refreshToken": rotated }),
        ))
        .await
        .unwrap();
    assert_eq!(next.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_refresh_without_token_is_unauthorized() {
    let app = spawn_app();
    let res = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/v1/users/refresh-access-token")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_refresh_rejects_malformed_body() {
    let app = spawn_app();
    let res = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/v1/users/refresh-access-token",
            serde_json::json!({ "refreshToken": "x", "admin": true }),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body = json_body(res).await;
    assert_eq!(body["success"], false);

    let res = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/v1/users/refresh-access-token")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from("{not json"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_logout_is_idempotent_and_guard_is_stateless() {
    let app = spawn_app();
    let (access, refresh) = register_and_login(&app).await;

    for _ in 0..2 {
        let res = app
            .clone()
            .oneshot(bearer("POST", "/api/v1/users/logout", &access))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let cookies = set_cookies(&res);
        assert_eq!(cookies.len(), 2);
        assert!(cookies.iter().all(|c| c.contains("Max-Age=0")));
    }

    // Access token stays valid until its own expiry.
    let res = app
        .clone()
        .oneshot(bearer("GET", "/api/v1/users/current-user", &access))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let res = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/v1/users/refresh-access-token",
            serde_json::json!({ "refreshToken": refresh }),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_update_password_flow() {
    let app = spawn_app();
    let (access, _) = register_and_login(&app).await;

    let mut req = json_request(
        "POST",
        "/api/v1/users/update-password",
        serde_json::json!({ "oldPassword": "wrong", "newPassword": "through-the-glass" }),
    );
    req.headers_mut().insert(
        header::AUTHORIZATION,
        format!("Bearer {access}").parse().unwrap(),
    );
    let res = app.clone().oneshot(req).await.unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let mut req = json_request(
        "POST",
        "/api/v1/users/update-password",
        serde_json::json!({ "oldPassword": "wonderland", "newPassword": "through-the-glass" }),
    );
    req.headers_mut().insert(
        header::AUTHORIZATION,
        format!("Bearer {access}").parse().unwrap(),
    );
    let res = app.clone().oneshot(req).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let res = app
        .clone()
        .oneshot(login_request("alice", "through-the-glass"))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}
