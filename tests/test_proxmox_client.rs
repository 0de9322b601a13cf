//! Proxmox VE API client tests against a wiremock server

use serde_json::json;
use system2mqtt::config::{HardwareSection, HypervisorSection, StorageSection};
use system2mqtt::metrics::{MetricError, MetricSource, Mount, ProxmoxMetrics, SystemMetrics};
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const STORAGE_PATH: &str = "/api2/json/nodes/pve1/storage";
const STATUS_PATH: &str = "/api2/json/nodes/pve1/status";
const TICKET_PATH: &str = "/api2/json/access/ticket";

fn client(server: &MockServer, password: Option<&str>, storage: StorageSection) -> ProxmoxMetrics {
    let section = HypervisorSection {
        url: server.uri(),
        node: "pve1".to_string(),
        username: "root@pam".to_string(),
        password_env: None,
        verify_tls: false,
    };
    let local = SystemMetrics::new(storage.clone(), &HardwareSection::default());
    ProxmoxMetrics::new(&section, password.map(str::to_string), storage, local).unwrap()
}

fn ticket(value: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({ "data": { "ticket": value } }))
}

fn storage_list() -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "data": [
            { "storage": "local", "active": 1, "used_fraction": 0.5 },
            { "storage": "local-zfs", "active": 1, "used": 25, "total": 100 },
            { "storage": "nas", "active": 0 },
            { "storage": "iso", "active": 1, "used_fraction": 0.9 }
        ]
    }))
}

#[tokio::test]
async fn test_login_then_storage_with_cookie() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(TICKET_PATH))
        .and(body_string_contains("username=root%40pam"))
        .respond_with(ticket("ticket1"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(STORAGE_PATH))
        .and(header("cookie", "PVEAuthCookie=ticket1"))
        .respond_with(storage_list())
        .mount(&server)
        .await;

    let storage = StorageSection {
        include: vec![],
        exclude: vec!["iso".to_string()],
    };
    let proxmox = client(&server, Some("secret"), storage);

    let disks = proxmox.sample_disks().await.unwrap();
    let labels: Vec<&str> = disks.iter().map(|m| m.label.as_str()).collect();
    assert_eq!(labels, vec!["local", "local-zfs", "nas"]);
    assert!(disks[0].mounted);
    assert!(!disks[2].mounted);

    // The ticket is reused: the login mock expects exactly one call
    assert_eq!(proxmox.disk_usage(&disks[0]).await.unwrap(), 50.0);
    assert_eq!(proxmox.disk_usage(&disks[1]).await.unwrap(), 25.0);
}

#[tokio::test]
async fn test_one_storage_request_serves_a_whole_cycle() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(STORAGE_PATH))
        .respond_with(storage_list())
        .expect(1)
        .mount(&server)
        .await;

    let proxmox = client(&server, None, StorageSection::default());

    // Mount state job, then disk space job with one usage query per mount
    let disks = proxmox.sample_disks().await.unwrap();
    let again = proxmox.sample_disks().await.unwrap();
    assert_eq!(disks, again);
    for mount in disks.iter().filter(|m| m.mounted) {
        assert!(proxmox.disk_usage(mount).await.is_ok());
    }
}

#[tokio::test]
async fn test_usage_missing_for_inactive_storage_is_unavailable() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(STORAGE_PATH))
        .respond_with(storage_list())
        .mount(&server)
        .await;

    let proxmox = client(&server, None, StorageSection::default());
    let result = proxmox.disk_usage(&Mount::mounted("nas", "nas")).await;
    assert!(matches!(result, Err(MetricError::Unavailable { .. })));
}

#[tokio::test]
async fn test_node_status_cpu_and_memory() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(STATUS_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": {
                "cpu": 0.125,
                "memory": { "used": 4096, "total": 16384, "free": 12288 },
                "uptime": 3600
            }
        })))
        .mount(&server)
        .await;

    let proxmox = client(&server, None, StorageSection::default());
    assert_eq!(proxmox.cpu_usage().await.unwrap(), 12.5);
    assert_eq!(proxmox.memory_usage().await.unwrap(), 25.0);
}

#[tokio::test]
async fn test_expired_ticket_triggers_one_relogin() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(TICKET_PATH))
        .respond_with(ticket("ticket1"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(TICKET_PATH))
        .respond_with(ticket("ticket2"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(STATUS_PATH))
        .and(header("cookie", "PVEAuthCookie=ticket1"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(STATUS_PATH))
        .and(header("cookie", "PVEAuthCookie=ticket2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": { "cpu": 0.5, "memory": { "used": 1, "total": 4 } }
        })))
        .mount(&server)
        .await;

    let proxmox = client(&server, Some("secret"), StorageSection::default());
    assert_eq!(proxmox.cpu_usage().await.unwrap(), 50.0);
}

#[tokio::test]
async fn test_error_status_is_reported_with_endpoint() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(STATUS_PATH))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let proxmox = client(&server, None, StorageSection::default());
    match proxmox.cpu_usage().await {
        Err(MetricError::HttpStatus { endpoint, status }) => {
            assert_eq!(status, 500);
            assert!(endpoint.ends_with(STATUS_PATH));
        }
        other => panic!("expected HttpStatus, got {other:?}"),
    }
}

#[tokio::test]
async fn test_failed_login_is_reported() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(TICKET_PATH))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let proxmox = client(&server, Some("wrong"), StorageSection::default());
    let result = proxmox.sample_disks().await;
    assert!(matches!(
        result,
        Err(MetricError::HttpStatus { status: 401, .. })
    ));
}
