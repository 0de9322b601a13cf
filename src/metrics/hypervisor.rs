//! Proxmox VE node metrics over the HTTP API
//!
//! Storage, CPU and memory come from the node's API. Temperatures and the
//! optional hardware extras are read locally, since the API does not expose
//! them.

use super::system::SystemMetrics;
use super::{MetricError, MetricResult, MetricSource, Mount};
use crate::config::{HypervisorSection, StorageSection};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// A publish cycle asks for the storage list once per job and once per mount;
/// answers younger than this come from the last response
const STORAGE_CACHE_TTL: Duration = Duration::from_secs(2);

/// Every API response wraps its payload in `data`
#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
struct TicketData {
    ticket: String,
}

#[derive(Debug, Clone, Deserialize)]
struct StorageEntry {
    storage: String,
    #[serde(default)]
    active: u8,
    used_fraction: Option<f64>,
    used: Option<u64>,
    total: Option<u64>,
}

impl StorageEntry {
    fn used_percent(&self) -> Option<f64> {
        if let Some(fraction) = self.used_fraction {
            return Some(fraction * 100.0);
        }
        match (self.used, self.total) {
            (Some(used), Some(total)) => super::percent(used as f64, total as f64),
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct NodeStatus {
    cpu: f64,
    memory: MemoryStatus,
}

#[derive(Debug, Deserialize)]
struct MemoryStatus {
    used: u64,
    total: u64,
}

/// Metrics of a Proxmox VE node
pub struct ProxmoxMetrics {
    client: Client,
    base_url: String,
    node: String,
    username: String,
    password: Option<String>,
    storage: StorageSection,
    ticket: Mutex<Option<String>>,
    storage_cache: Mutex<Option<(Instant, Vec<StorageEntry>)>>,
    local: SystemMetrics,
}

impl ProxmoxMetrics {
    pub fn new(
        section: &HypervisorSection,
        password: Option<String>,
        storage: StorageSection,
        local: SystemMetrics,
    ) -> MetricResult<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .danger_accept_invalid_certs(!section.verify_tls)
            .build()?;

        Ok(Self {
            client,
            base_url: section.url.trim_end_matches('/').to_string(),
            node: section.node.clone(),
            username: section.username.clone(),
            password,
            storage,
            ticket: Mutex::new(None),
            storage_cache: Mutex::new(None),
            local,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/api2/json{}", self.base_url, path)
    }

    async fn login(&self) -> MetricResult<Option<String>> {
        let Some(password) = &self.password else {
            return Ok(None);
        };

        let endpoint = self.endpoint("/access/ticket");
        debug!("Requesting API ticket for {}", self.username);
        let response = self
            .client
            .post(&endpoint)
            .form(&[("username", self.username.as_str()), ("password", password.as_str())])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(MetricError::HttpStatus {
                endpoint,
                status: response.status().as_u16(),
            });
        }

        let body: ApiResponse<TicketData> = response.json().await?;
        Ok(Some(body.data.ticket))
    }

    async fn send_get(
        &self,
        endpoint: &str,
        ticket: Option<&str>,
    ) -> MetricResult<reqwest::Response> {
        let mut request = self.client.get(endpoint);
        if let Some(ticket) = ticket {
            request = request.header(reqwest::header::COOKIE, format!("PVEAuthCookie={ticket}"));
        }
        Ok(request.send().await?)
    }

    /// GET an API path, logging in first and once more if the ticket expired
    async fn get<T: DeserializeOwned>(&self, path: &str) -> MetricResult<T> {
        let endpoint = self.endpoint(path);
        let mut ticket = self.ticket.lock().await;

        if ticket.is_none() {
            *ticket = self.login().await?;
        }

        let mut response = self.send_get(&endpoint, ticket.as_deref()).await?;
        if response.status() == StatusCode::UNAUTHORIZED && self.password.is_some() {
            warn!("API ticket rejected, logging in again");
            *ticket = self.login().await?;
            response = self.send_get(&endpoint, ticket.as_deref()).await?;
        }

        if !response.status().is_success() {
            return Err(MetricError::HttpStatus {
                endpoint,
                status: response.status().as_u16(),
            });
        }

        let body: ApiResponse<T> = response.json().await?;
        Ok(body.data)
    }

    async fn storages(&self) -> MetricResult<Vec<StorageEntry>> {
        let mut cache = self.storage_cache.lock().await;
        if let Some((fetched, entries)) = cache.as_ref() {
            if fetched.elapsed() < STORAGE_CACHE_TTL {
                return Ok(entries.clone());
            }
        }

        let entries: Vec<StorageEntry> = self
            .get::<Vec<StorageEntry>>(&format!("/nodes/{}/storage", self.node))
            .await?
            .into_iter()
            .filter(|entry| is_selected(&self.storage, &entry.storage))
            .collect();
        *cache = Some((Instant::now(), entries.clone()));
        Ok(entries)
    }

    async fn node_status(&self) -> MetricResult<NodeStatus> {
        self.get(&format!("/nodes/{}/status", self.node)).await
    }
}

fn is_selected(storage: &StorageSection, id: &str) -> bool {
    let included = storage.include.is_empty() || storage.include.iter().any(|s| s == id);
    included && !storage.exclude.iter().any(|s| s == id)
}

#[async_trait]
impl MetricSource for ProxmoxMetrics {
    async fn sample_disks(&self) -> MetricResult<Vec<Mount>> {
        Ok(self
            .storages()
            .await?
            .into_iter()
            .map(|entry| Mount {
                label: entry.storage.clone(),
                target: entry.storage,
                mounted: entry.active == 1,
            })
            .collect())
    }

    async fn disk_usage(&self, mount: &Mount) -> MetricResult<f64> {
        self.storages()
            .await?
            .iter()
            .find(|entry| entry.storage == mount.target)
            .and_then(StorageEntry::used_percent)
            .ok_or_else(|| MetricError::unavailable(format!("disk usage of {}", mount.label)))
    }

    async fn cpu_usage(&self) -> MetricResult<f64> {
        Ok(self.node_status().await?.cpu * 100.0)
    }

    async fn cpu_temperature(&self) -> MetricResult<f64> {
        self.local.cpu_temperature().await
    }

    async fn memory_usage(&self) -> MetricResult<f64> {
        let memory = self.node_status().await?.memory;
        super::percent(memory.used as f64, memory.total as f64)
            .ok_or_else(|| MetricError::unavailable("memory usage"))
    }

    async fn fan_speed(&self) -> MetricResult<Option<f64>> {
        self.local.fan_speed().await
    }

    async fn disk_temperatures(&self) -> MetricResult<BTreeMap<String, f64>> {
        self.local.disk_temperatures().await
    }
}
