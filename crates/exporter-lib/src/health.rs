//! Health reporting for liveness probes
//!
//! The exporter holds no state between requests, so health is a static
//! report of the process configuration rather than per-component tracking.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub in_cluster: bool,
    pub checked_at: i64,
}

impl HealthResponse {
    pub fn ok(version: &str, in_cluster: bool) -> Self {
        Self {
            status: "ok".to_string(),
            version: version.to_string(),
            in_cluster,
            checked_at: chrono::Utc::now().timestamp(),
        }
    }
}
