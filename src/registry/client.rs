//! Tool registry client
//!
//! Stage workers resolve a role to a live endpoint on every stage entry; no
//! sticky sessions. Resolution round-robins across healthy entries, newest
//! heartbeat first. Tool servers use the same client to register themselves
//! and keep a 30s heartbeat.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::types::{RegisterRequest, ToolDescriptor, ToolHealth};
use crate::error::{Error, Result};

/// Heartbeat / re-registration interval for tool servers
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// HTTP client for the registry service
pub struct RegistryClient {
    base_url: String,
    http: reqwest::Client,
    /// Per-role round-robin cursors
    cursors: Mutex<HashMap<String, usize>>,
}

impl RegistryClient {
    /// Create a client for the registry at `base_url`
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(RegistryClient {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http,
            cursors: Mutex::new(HashMap::new()),
        })
    }

    /// Fetch all descriptors for a role
    pub async fn servers(&self, role: &str) -> Result<Vec<ToolDescriptor>> {
        let url = format!("{}/servers?role={}", self.base_url, role);
        let servers: Vec<ToolDescriptor> = self
            .http
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(servers)
    }

    /// Resolve a role to a healthy endpoint
    ///
    /// Round-robin over healthy entries ordered by most recent heartbeat;
    /// fails with `NoLiveTool` when none qualify.
    pub async fn resolve(&self, role: &str) -> Result<String> {
        let mut healthy: Vec<ToolDescriptor> = self
            .servers(role)
            .await?
            .into_iter()
            .filter(|d| d.status == ToolHealth::Healthy)
            .collect();

        if healthy.is_empty() {
            warn!("No live tool server for role '{}'", role);
            return Err(Error::NoLiveTool(role.to_string()));
        }

        healthy.sort_by(|a, b| b.last_seen.cmp(&a.last_seen));

        let mut cursors = self.cursors.lock().await;
        let cursor = cursors.entry(role.to_string()).or_insert(0);
        let picked = &healthy[*cursor % healthy.len()];
        *cursor = cursor.wrapping_add(1);

        debug!("Resolved role '{}' to {}", role, picked.endpoint);
        Ok(picked.endpoint.clone())
    }

    /// Register a tool server (also used as the heartbeat)
    pub async fn register(
        &self,
        role: &str,
        endpoint: &str,
        capabilities: Vec<String>,
    ) -> Result<()> {
        let url = format!("{}/register", self.base_url);
        self.http
            .post(&url)
            .json(&RegisterRequest {
                role: role.to_string(),
                endpoint: endpoint.to_string(),
                capabilities,
            })
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    /// Re-register on a fixed interval, forever
    ///
    /// Tool servers spawn this on startup; a missed heartbeat eventually gets
    /// the entry swept from the registry.
    pub async fn heartbeat_loop(
        self: Arc<Self>,
        role: String,
        endpoint: String,
        capabilities: Vec<String>,
    ) {
        let mut interval = tokio::time::interval(HEARTBEAT_INTERVAL);

        loop {
            interval.tick().await;
            if let Err(e) = self
                .register(&role, &endpoint, capabilities.clone())
                .await
            {
                warn!("Heartbeat to registry failed: {}", e);
            }
        }
    }
}
