//! End-to-end tests against a running server.
//!
//! Each test binds the router to an ephemeral port and drives it with a
//! `reqwest` client whose cookie store plays the role of the admin's browser.

use std::net::SocketAddr;
use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use tokio::net::TcpListener;

use cashdelhi_server::auth::hash_password;
use cashdelhi_server::config::Config;
use cashdelhi_server::db;
use cashdelhi_server::routes::{create_router, AppState};
use cashdelhi_server::session::{SessionStore, SessionStoreConfig};
use cashdelhi_server::users::UserRepository;

const USERNAME: &str = "admin";
const PASSWORD: &str = "s3cret-for-tests";

/// Starts a server over a fresh in-memory database and returns its address.
async fn spawn_server(session_ttl: Duration) -> SocketAddr {
    let pool = db::connect_in_memory().await.unwrap();
    let hash = hash_password(PASSWORD).unwrap();
    UserRepository::new(pool.clone())
        .create(USERNAME, &hash)
        .await
        .unwrap();

    let sessions = SessionStore::database(
        pool.clone(),
        SessionStoreConfig {
            ttl: session_ttl,
            ..SessionStoreConfig::default()
        },
    );
    let state = AppState::with_components(Config::default(), pool, sessions);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, create_router(state)).await.unwrap();
    });
    addr
}

fn browser() -> Client {
    Client::builder().cookie_store(true).build().unwrap()
}

async fn login(client: &Client, base: &str) -> reqwest::Response {
    client
        .post(format!("{base}/api/login"))
        .json(&json!({"username": USERNAME, "password": PASSWORD}))
        .send()
        .await
        .unwrap()
}

#[tokio::test]
async fn admin_session_lifecycle() {
    let addr = spawn_server(Duration::from_secs(3600)).await;
    let base = format!("http://{addr}");
    let client = browser();

    // Anonymous visitor
    let me: Value = client
        .get(format!("{base}/api/user"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(me, json!({"user": null}));

    let response = client
        .post(format!("{base}/api/events"))
        .json(&json!({"title": "Lohri Bonfire", "venue": "Lodhi Garden", "date": "2026-01-13"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    // Log in
    let response = login(&client, &base).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["success"], true);
    assert_eq!(body["user"]["username"], USERNAME);

    let me: Value = client
        .get(format!("{base}/api/user"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(me["user"]["username"], USERNAME);

    // Create, read, update, delete
    let response = client
        .post(format!("{base}/api/events"))
        .json(&json!({"title": "Lohri Bonfire", "venue": "Lodhi Garden", "date": "2026-01-13"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let created: Value = response.json().await.unwrap();
    let id = created["id"].as_str().unwrap().to_string();
    assert_eq!(created["description"], Value::Null);

    let listed: Vec<Value> = client
        .get(format!("{base}/api/events"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(listed, vec![created.clone()]);

    let response = client
        .patch(format!("{base}/api/events/{id}"))
        .json(&json!({"description": "Bring marshmallows"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let updated: Value = response.json().await.unwrap();
    assert_eq!(updated["description"], "Bring marshmallows");
    assert_eq!(updated["title"], "Lohri Bonfire");

    let response = client
        .delete(format!("{base}/api/events/{id}"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = client
        .get(format!("{base}/api/events/{id}"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    // Log out
    let response = client
        .get(format!("{base}/api/logout"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let me: Value = client
        .get(format!("{base}/api/user"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(me, json!({"user": null}));

    let response = client
        .delete(format!("{base}/api/events/{id}"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn sessions_are_isolated_between_clients() {
    let addr = spawn_server(Duration::from_secs(3600)).await;
    let base = format!("http://{addr}");
    let admin = browser();
    let visitor = browser();

    assert_eq!(login(&admin, &base).await.status(), StatusCode::OK);

    let response = visitor
        .post(format!("{base}/api/events"))
        .json(&json!({"title": "Open Mic", "venue": "Champa Gali", "date": "2026-02-01"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = admin
        .post(format!("{base}/api/events"))
        .json(&json!({"title": "Open Mic", "venue": "Champa Gali", "date": "2026-02-01"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
}

#[tokio::test]
async fn expired_session_is_rejected() {
    let addr = spawn_server(Duration::from_secs(1)).await;
    let base = format!("http://{addr}");
    let client = browser();

    assert_eq!(login(&client, &base).await.status(), StatusCode::OK);
    tokio::time::sleep(Duration::from_millis(1500)).await;

    let me: Value = client
        .get(format!("{base}/api/user"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(me, json!({"user": null}));
}

#[tokio::test]
async fn wrong_password_sets_no_session() {
    let addr = spawn_server(Duration::from_secs(3600)).await;
    let base = format!("http://{addr}");
    let client = browser();

    let response = client
        .post(format!("{base}/api/login"))
        .json(&json!({"username": USERNAME, "password": "nope"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(response.headers().get("set-cookie").is_none());

    let me: Value = client
        .get(format!("{base}/api/user"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(me, json!({"user": null}));
}
