//! End-to-end HTTP flow over the in-memory stores.
//!
//! Drives the real router with `tower::ServiceExt::oneshot`, so every request goes
//! through extraction, the service and the session cookie round trip.

use anyhow::{Context, Result};
use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request, Response, StatusCode},
    Router,
};
use gatehouse::gatehouse::{
    password::Hasher,
    router,
    store::{MemoryCredentialStore, MemorySessionStore},
    AuthConfig, AuthService,
};
use secrecy::SecretString;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

const SECRET: &str = "integration-secret-0123456789abcdef";

fn app() -> Result<(Router, Arc<MemorySessionStore>)> {
    let sessions = Arc::new(MemorySessionStore::new());
    let auth = AuthService::new(
        AuthConfig::new(),
        Arc::new(MemoryCredentialStore::new()),
        sessions.clone(),
        SecretString::from(SECRET),
    )
    .with_hasher(Hasher::with_params(8, 1, 1)?);
    Ok((router(Arc::new(auth)), sessions))
}

fn json_request(method: Method, uri: &str, body: &Value, cookie: Option<&str>) -> Result<Request<Body>> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }
    Ok(builder.body(Body::from(body.to_string()))?)
}

fn empty_request(method: Method, uri: &str, cookie: Option<&str>) -> Result<Request<Body>> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }
    Ok(builder.body(Body::empty())?)
}

async fn body_json(response: Response<Body>) -> Result<Value> {
    let bytes = to_bytes(response.into_body(), usize::MAX).await?;
    Ok(serde_json::from_slice(&bytes)?)
}

fn set_cookie(response: &Response<Body>) -> Result<String> {
    Ok(response
        .headers()
        .get(header::SET_COOKIE)
        .context("missing Set-Cookie")?
        .to_str()?
        .to_string())
}

/// `name=value` part of a `Set-Cookie` header.
fn cookie_pair(set_cookie: &str) -> Result<String> {
    set_cookie
        .split(';')
        .next()
        .map(str::to_string)
        .context("empty Set-Cookie")
}

#[tokio::test]
async fn register_login_logout_scenario() -> Result<()> {
    let (app, sessions) = app()?;

    let alice_pw1 = json!({"username": "alice", "password": "pw1"});
    let alice_pw2 = json!({"username": "alice", "password": "pw2"});

    let response = app
        .clone()
        .oneshot(json_request(Method::POST, "/register", &alice_pw1, None)?)
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        body_json(response).await?,
        json!({"message": "Registration successful"})
    );

    let response = app
        .clone()
        .oneshot(json_request(Method::POST, "/register", &alice_pw2, None)?)
        .await?;
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let response = app
        .clone()
        .oneshot(json_request(Method::POST, "/login", &alice_pw2, None)?)
        .await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(response.headers().get(header::SET_COOKIE).is_none());
    assert_eq!(sessions.active().await, 0);

    let response = app
        .clone()
        .oneshot(json_request(Method::POST, "/login", &alice_pw1, None)?)
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let login_cookie = set_cookie(&response)?;
    assert!(login_cookie.starts_with("session="));
    assert!(login_cookie.contains("HttpOnly"));
    assert!(login_cookie.contains("Max-Age=604800"));
    assert_eq!(
        body_json(response).await?,
        json!({"message": "Login successful"})
    );
    let cookie = cookie_pair(&login_cookie)?;

    let response = app
        .clone()
        .oneshot(empty_request(Method::GET, "/session", Some(&cookie))?)
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await?, json!({"username": "alice"}));

    let response = app
        .clone()
        .oneshot(empty_request(Method::POST, "/logout", Some(&cookie))?)
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(set_cookie(&response)?.contains("Max-Age=0"));
    assert_eq!(
        body_json(response).await?,
        json!({"message": "Logout successful"})
    );
    assert_eq!(sessions.active().await, 0);

    // The old cookie no longer resolves to a session.
    let response = app
        .oneshot(empty_request(Method::GET, "/session", Some(&cookie))?)
        .await?;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    Ok(())
}

#[tokio::test]
async fn malformed_bodies_are_bad_request() -> Result<()> {
    let (app, _) = app()?;

    for uri in ["/register", "/login"] {
        let request = Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{not json"))?;
        let response = app.clone().oneshot(request).await?;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{uri}");

        let response = app.clone().oneshot(empty_request(Method::POST, uri, None)?).await?;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{uri}");

        let empty = json!({"username": "", "password": "pw"});
        let response = app
            .clone()
            .oneshot(json_request(Method::POST, uri, &empty, None)?)
            .await?;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{uri}");
        assert_eq!(
            body_json(response).await?,
            json!({"message": "Username and password are required"})
        );
    }

    Ok(())
}

#[tokio::test]
async fn logout_without_session_succeeds() -> Result<()> {
    let (app, sessions) = app()?;

    let response = app
        .oneshot(empty_request(Method::POST, "/logout", None)?)
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(set_cookie(&response)?.contains("Max-Age=0"));
    assert_eq!(sessions.active().await, 0);

    Ok(())
}

#[tokio::test]
async fn forged_cookie_is_anonymous() -> Result<()> {
    let (app, _) = app()?;

    let response = app
        .oneshot(empty_request(
            Method::GET,
            "/session",
            Some("session=not-a-real-session-id"),
        )?)
        .await?;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    Ok(())
}

#[tokio::test]
async fn health_reports_store_status() -> Result<()> {
    let (app, _) = app()?;

    let response = app
        .clone()
        .oneshot(empty_request(Method::GET, "/health", None)?)
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().get("x-app").is_some());
    assert!(response.headers().get("x-request-id").is_some());
    let body = body_json(response).await?;
    assert_eq!(body["name"], "gatehouse");
    assert_eq!(body["database"], "ok");

    let response = app
        .oneshot(empty_request(Method::GET, "/openapi.json", None)?)
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let doc = body_json(response).await?;
    assert!(doc["paths"]["/login"].is_object());

    Ok(())
}
