//! Tool registry service
//!
//! Tool servers register on startup and heartbeat every 30 seconds. The
//! service probes each endpoint's `/health` on its own 30s tick: one failure
//! marks the entry unhealthy (kept), two consecutive failures mark it
//! errored. Entries not seen for an hour are swept out.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::types::{RegisterRequest, ToolDescriptor, ToolHealth};

/// How often the prober and sweeper tick
pub const TICK_INTERVAL: Duration = Duration::from_secs(30);

/// Entries older than this are deleted by the sweeper
fn stale_after() -> chrono::Duration {
    chrono::Duration::hours(1)
}

/// In-memory registry of tool servers, keyed by role
pub struct RegistryService {
    entries: Arc<RwLock<HashMap<String, Vec<ToolDescriptor>>>>,
    http: reqwest::Client,
}

impl RegistryService {
    /// Create an empty registry
    pub fn new() -> Self {
        RegistryService {
            entries: Arc::new(RwLock::new(HashMap::new())),
            http: reqwest::Client::new(),
        }
    }

    /// Register or refresh a tool server
    ///
    /// A heartbeat resets health: the server just proved it is alive.
    pub async fn register(&self, request: RegisterRequest) {
        let mut entries = self.entries.write().await;
        let servers = entries.entry(request.role.clone()).or_default();

        if let Some(existing) = servers.iter_mut().find(|d| d.endpoint == request.endpoint) {
            existing.last_seen = Utc::now();
            existing.status = ToolHealth::Healthy;
            existing.consecutive_failures = 0;
            existing.capabilities = request.capabilities;
            debug!("Heartbeat from {} ({})", existing.endpoint, existing.role);
        } else {
            info!("Registered {} for role '{}'", request.endpoint, request.role);
            servers.push(ToolDescriptor::new(
                request.role,
                request.endpoint,
                request.capabilities,
            ));
        }
    }

    /// List descriptors, optionally filtered by role
    pub async fn servers(&self, role: Option<&str>) -> Vec<ToolDescriptor> {
        let entries = self.entries.read().await;
        match role {
            Some(role) => entries.get(role).cloned().unwrap_or_default(),
            None => entries.values().flatten().cloned().collect(),
        }
    }

    /// Probe every endpoint's `/health` and update statuses
    pub async fn probe_all(&self) {
        let targets: Vec<(String, String)> = {
            let entries = self.entries.read().await;
            entries
                .values()
                .flatten()
                .map(|d| (d.role.clone(), d.endpoint.clone()))
                .collect()
        };

        for (role, endpoint) in targets {
            let url = format!("{}/health", endpoint.trim_end_matches('/'));
            let probe = self
                .http
                .get(&url)
                .timeout(Duration::from_secs(5))
                .send()
                .await;
            let alive = match probe {
                Ok(response) => response.status().is_success(),
                Err(_) => false,
            };

            let mut entries = self.entries.write().await;
            let Some(descriptor) = entries
                .get_mut(&role)
                .and_then(|servers| servers.iter_mut().find(|d| d.endpoint == endpoint))
            else {
                continue;
            };

            if alive {
                descriptor.status = ToolHealth::Healthy;
                descriptor.consecutive_failures = 0;
            } else {
                descriptor.consecutive_failures += 1;
                descriptor.status = if descriptor.consecutive_failures >= 2 {
                    ToolHealth::Error
                } else {
                    ToolHealth::Unhealthy
                };
                warn!(
                    "Probe failed for {} ({}): {} consecutive failures",
                    descriptor.endpoint, descriptor.role, descriptor.consecutive_failures
                );
            }
        }
    }

    /// Delete entries not seen within the staleness window (1h)
    pub async fn sweep(&self) -> usize {
        let cutoff = Utc::now() - stale_after();
        let mut entries = self.entries.write().await;

        let mut removed = 0;
        for servers in entries.values_mut() {
            let before = servers.len();
            servers.retain(|d| d.last_seen >= cutoff);
            removed += before - servers.len();
        }
        entries.retain(|_, servers| !servers.is_empty());

        if removed > 0 {
            info!("Swept {} stale registry entries", removed);
        }
        removed
    }

    /// Run the probe + sweep tick loop
    pub async fn run(self: Arc<Self>) {
        let mut interval = tokio::time::interval(TICK_INTERVAL);
        interval.tick().await; // skip the immediate first tick

        loop {
            interval.tick().await;
            self.probe_all().await;
            self.sweep().await;
        }
    }

    /// Build the HTTP surface: `POST /register`, `GET /servers`, `GET /health`
    pub fn router(self: Arc<Self>) -> Router {
        Router::new()
            .route("/register", post(register_handler))
            .route("/servers", get(servers_handler))
            .route("/health", get(health_handler))
            .with_state(self)
    }
}

impl Default for RegistryService {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Deserialize)]
struct ServersQuery {
    role: Option<String>,
}

async fn register_handler(
    State(service): State<Arc<RegistryService>>,
    Json(request): Json<RegisterRequest>,
) -> Json<serde_json::Value> {
    service.register(request).await;
    Json(serde_json::json!({"status": "registered"}))
}

async fn servers_handler(
    State(service): State<Arc<RegistryService>>,
    Query(query): Query<ServersQuery>,
) -> Json<Vec<ToolDescriptor>> {
    Json(service.servers(query.role.as_deref()).await)
}

async fn health_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}
