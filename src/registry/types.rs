//! Tool registry descriptor types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Health of a registered tool server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolHealth {
    /// Last probe succeeded
    Healthy,
    /// One probe failed; the entry stays resolvable-adjacent but is skipped
    Unhealthy,
    /// Two consecutive probes failed
    Error,
}

/// A registered tool server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescriptor {
    /// Role the server fills (e.g. `database`, `knowledge-base`)
    pub role: String,
    /// Base URL of the server
    pub endpoint: String,
    /// Tool names the server advertises
    #[serde(default)]
    pub capabilities: Vec<String>,
    /// Last registration or heartbeat
    pub last_seen: DateTime<Utc>,
    /// Current probe status
    pub status: ToolHealth,
    /// Consecutive probe failures
    #[serde(default)]
    pub consecutive_failures: u32,
}

impl ToolDescriptor {
    /// Create a freshly-registered descriptor
    pub fn new(
        role: impl Into<String>,
        endpoint: impl Into<String>,
        capabilities: Vec<String>,
    ) -> Self {
        ToolDescriptor {
            role: role.into(),
            endpoint: endpoint.into(),
            capabilities,
            last_seen: Utc::now(),
            status: ToolHealth::Healthy,
            consecutive_failures: 0,
        }
    }
}

/// Registration / heartbeat request body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub role: String,
    pub endpoint: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
}
