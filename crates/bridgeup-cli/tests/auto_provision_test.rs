//! Auto-provisioned run against a mock admin API: select, provision, start
//! and stop with deregistration

use axum::routing::{post, MethodRouter};
use axum::{Form, Json, Router};
use bridgeup_cli::bootstrap::{self, derive_verify_key, BootstrapMode, BootstrapPlan};
use bridgeup_cli::config::BootstrapConfig;
use bridgeup_cli::lifecycle::{HostEnvironment, LifecycleState, ServiceLifecycleManager};
use bridgeup_cli::provision::{self, Launch};
use bridgeup_proto::{AgentFileConfig, TunnelMode};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

type Seen = Arc<Mutex<Vec<HashMap<String, String>>>>;

fn respond_with(body: Value, seen: Seen) -> MethodRouter {
    post(move |Form(form): Form<HashMap<String, String>>| async move {
        seen.lock().unwrap().push(form);
        Json(body)
    })
}

async fn spawn_admin(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr.to_string()
}

struct MockAdmin {
    addr: String,
    added: Seen,
    listed: Seen,
    deleted: Seen,
}

async fn mock_admin(add_response: Value, rows: Value) -> MockAdmin {
    let added = Seen::default();
    let listed = Seen::default();
    let deleted = Seen::default();

    let router = Router::new()
        .route("/client/add", respond_with(add_response, added.clone()))
        .route(
            "/client/list",
            respond_with(
                json!({"bridgePort": 8024, "rows": rows, "total": 1}),
                listed.clone(),
            ),
        )
        .route(
            "/client/del",
            respond_with(json!({"status": 1, "msg": "delete success"}), deleted.clone()),
        );

    MockAdmin {
        addr: spawn_admin(router).await,
        added,
        listed,
        deleted,
    }
}

fn config(api_addr: &str, dir: &TempDir) -> BootstrapConfig {
    BootstrapConfig {
        api_addr: api_addr.to_string(),
        tcp_tunnel: "8080->127.0.0.1:80，2222->127.0.0.1:22".to_string(),
        udp_tunnel: "5353->127.0.0.1:53".to_string(),
        hostname: Some("test-host".to_string()),
        runtime_dir: dir.path().to_path_buf(),
        ..BootstrapConfig::default()
    }
}

#[tokio::test]
async fn test_auto_provision_lifecycle() {
    let dir = TempDir::new().unwrap();
    let key = derive_verify_key(
        "test-host",
        "8080->127.0.0.1:80，2222->127.0.0.1:22",
        "5353->127.0.0.1:53",
    );
    let admin = mock_admin(
        json!({"status": 1, "msg": "add success"}),
        json!([{"Id": 4, "VerifyKey": "someone-else"}, {"Id": 11, "VerifyKey": key}]),
    )
    .await;

    let plan = bootstrap::select(&config(&admin.addr, &dir)).unwrap();
    assert_eq!(plan.mode(), BootstrapMode::AutoProvision);

    let prepared = provision::prepare(plan).await.unwrap();
    let generated = dir.path().join(bootstrap::generated_config_file(&key));
    assert_eq!(prepared.launch, Launch::ConfigFile(generated.clone()));
    assert_eq!(admin.added.lock().unwrap()[0]["vkey"], key);

    let file = AgentFileConfig::load(&generated).unwrap();
    assert_eq!(file.common.server_addr, "127.0.0.1:8024");
    assert_eq!(file.common.verify_key, key);
    assert_eq!(file.tunnels.len(), 3);
    assert_eq!(file.tunnels[2].mode, TunnelMode::Udp);

    let mut manager = ServiceLifecycleManager::new(HostEnvironment::ServiceManager);
    if let Some((control_plane, verify_key)) = prepared.deregistration {
        manager = manager.with_deregistration(control_plane, verify_key);
    }
    let runner = prepared.launch.into_task(manager.exit_signal()).unwrap();
    manager.start(runner).unwrap();
    manager.stop().await;
    assert_eq!(manager.state(), LifecycleState::Stopped);

    let deleted = admin.deleted.lock().unwrap();
    assert_eq!(deleted.len(), 1);
    assert_eq!(deleted[0]["id"], "11");

    let listed = admin.listed.lock().unwrap();
    assert!(listed.iter().any(|form| form["search"] == key));
}

#[tokio::test]
async fn test_duplicate_key_still_provisions() {
    let dir = TempDir::new().unwrap();
    let admin = mock_admin(
        json!({"status": 0, "msg": "Vkey duplicate, please reset"}),
        json!([]),
    )
    .await;

    let plan = bootstrap::select(&config(&admin.addr, &dir)).unwrap();
    let prepared = provision::prepare(plan).await.unwrap();
    assert!(prepared.deregistration.is_some());
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
}

#[tokio::test]
async fn test_other_add_failure_is_fatal() {
    let dir = TempDir::new().unwrap();
    let admin = mock_admin(json!({"status": 0, "msg": "other failure"}), json!([])).await;

    let plan = bootstrap::select(&config(&admin.addr, &dir)).unwrap();
    let err = provision::prepare(plan).await.unwrap_err();
    assert!(err.to_string().contains("other failure"));
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn test_stop_without_matching_record_completes() {
    let dir = TempDir::new().unwrap();
    let admin = mock_admin(json!({"status": 1}), json!([])).await;

    let plan = bootstrap::select(&config(&admin.addr, &dir)).unwrap();
    let BootstrapPlan::AutoProvision(params) = plan.clone() else {
        panic!("expected auto-provision");
    };
    assert!(params.key_derived);

    let prepared = provision::prepare(plan).await.unwrap();
    let mut manager = ServiceLifecycleManager::new(HostEnvironment::ServiceManager);
    if let Some((control_plane, verify_key)) = prepared.deregistration {
        manager = manager.with_deregistration(control_plane, verify_key);
    }
    manager.start(async {}).unwrap();
    manager.stop().await;

    assert_eq!(manager.state(), LifecycleState::Stopped);
    assert!(admin.deleted.lock().unwrap().is_empty());
}
