//! Integration tests for the admin client against a mock admin API

use axum::routing::{post, MethodRouter};
use axum::{Form, Json, Router};
use bridgeup_admin::{auth_key, AdminClient, AdminError, ControlPlane};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

type Seen = Arc<Mutex<Vec<HashMap<String, String>>>>;

/// Route that records every submitted form and answers with `body`
fn respond_with(body: Value, seen: Seen) -> MethodRouter {
    post(move |Form(form): Form<HashMap<String, String>>| async move {
        seen.lock().unwrap().push(form);
        Json(body)
    })
}

/// Serve `router` on an ephemeral port and return its address
async fn spawn_admin(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr.to_string()
}

#[tokio::test]
async fn test_add_client_sends_defaults_and_auth() {
    let seen = Seen::default();
    let router = Router::new().route(
        "/client/add",
        respond_with(json!({"status": 1, "msg": "add success"}), seen.clone()),
    );
    let client = AdminClient::new(spawn_admin(router).await).unwrap();

    client.add_client("vk-123").await.unwrap();

    let forms = seen.lock().unwrap();
    assert_eq!(forms.len(), 1);
    let form = &forms[0];
    assert_eq!(form["vkey"], "vk-123");
    assert_eq!(form["config_conn_allow"], "1");
    assert_eq!(form["compress"], "1");
    assert_eq!(form["crypt"], "0");

    let timestamp: i64 = form["timestamp"].parse().unwrap();
    assert_eq!(form["auth_key"], auth_key(timestamp));
}

#[tokio::test]
async fn test_add_client_duplicate_key() {
    let router = Router::new().route(
        "/client/add",
        respond_with(
            json!({"status": 0, "msg": "Vkey duplicate, please reset"}),
            Seen::default(),
        ),
    );
    let client = AdminClient::new(spawn_admin(router).await).unwrap();

    let err = client.add_client("vk").await.unwrap_err();
    assert!(err.is_duplicate_key(), "unexpected error: {err}");
}

#[tokio::test]
async fn test_add_client_other_failure() {
    let router = Router::new().route(
        "/client/add",
        respond_with(json!({"status": 0, "msg": "other failure"}), Seen::default()),
    );
    let client = AdminClient::new(spawn_admin(router).await).unwrap();

    match client.add_client("vk").await {
        Err(AdminError::Rpc { msg }) => assert_eq!(msg, "other failure"),
        other => panic!("expected Rpc error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_bridge_port_uses_empty_search() {
    let seen = Seen::default();
    let router = Router::new().route(
        "/client/list",
        respond_with(json!({"bridgePort": 8024, "rows": []}), seen.clone()),
    );
    let client = AdminClient::new(spawn_admin(router).await).unwrap();

    assert_eq!(client.bridge_port().await.unwrap(), 8024);

    let forms = seen.lock().unwrap();
    assert_eq!(forms[0]["search"], "");
    assert_eq!(forms[0]["order"], "asc");
    assert_eq!(forms[0]["limit"], "10");
}

#[tokio::test]
async fn test_bridge_port_missing() {
    let router = Router::new().route(
        "/client/list",
        respond_with(json!({"rows": []}), Seen::default()),
    );
    let client = AdminClient::new(spawn_admin(router).await).unwrap();

    assert!(matches!(
        client.bridge_port().await,
        Err(AdminError::InvalidResponse(_))
    ));
}

#[tokio::test]
async fn test_client_id_not_found_when_rows_empty() {
    let router = Router::new().route(
        "/client/list",
        respond_with(json!({"bridgePort": 8024, "rows": []}), Seen::default()),
    );
    let client = AdminClient::new(spawn_admin(router).await).unwrap();

    assert!(matches!(
        client.client_id_by_verify_key("vk").await,
        Err(AdminError::NotFound(key)) if key == "vk"
    ));
}

#[tokio::test]
async fn test_client_id_exact_match() {
    let seen = Seen::default();
    let router = Router::new().route(
        "/client/list",
        respond_with(
            json!({
                "bridgePort": 8024,
                "rows": [
                    {"Id": 4, "VerifyKey": "vk-1234"},
                    {"Id": 9, "VerifyKey": "vk"},
                ]
            }),
            seen.clone(),
        ),
    );
    let client = AdminClient::new(spawn_admin(router).await).unwrap();

    assert_eq!(client.client_id_by_verify_key("vk").await.unwrap(), 9);
    assert_eq!(seen.lock().unwrap()[0]["search"], "vk");
}

#[tokio::test]
async fn test_client_id_no_exact_match() {
    let router = Router::new().route(
        "/client/list",
        respond_with(
            json!({"rows": [{"Id": 4, "VerifyKey": "vk-1234"}]}),
            Seen::default(),
        ),
    );
    let client = AdminClient::new(spawn_admin(router).await).unwrap();

    assert!(matches!(
        client.client_id_by_verify_key("vk").await,
        Err(AdminError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_delete_client() {
    let seen = Seen::default();
    let router = Router::new().route(
        "/client/del",
        respond_with(json!({"status": 1, "msg": "delete success"}), seen.clone()),
    );
    let client = AdminClient::new(spawn_admin(router).await).unwrap();

    client.delete_client(42).await.unwrap();
    assert_eq!(seen.lock().unwrap()[0]["id"], "42");
}

#[tokio::test]
async fn test_delete_client_failure() {
    let router = Router::new().route(
        "/client/del",
        respond_with(json!({"status": 0, "msg": "delete error"}), Seen::default()),
    );
    let client = AdminClient::new(spawn_admin(router).await).unwrap();

    assert!(matches!(
        client.delete_client(42).await,
        Err(AdminError::Rpc { .. })
    ));
}

#[tokio::test]
async fn test_unreachable_admin_api() {
    // Grab a free port, then close it
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    drop(listener);

    let client = AdminClient::new(addr).unwrap();
    assert!(matches!(
        client.add_client("vk").await,
        Err(AdminError::Http(_))
    ));
}
