use std::fmt::{self, Display};

use serde::Serialize;

/// Error rate above which the bus reports itself degraded
pub const DEGRADED_ERROR_RATE: f64 = 0.1;
/// Error rate above which the bus reports itself unhealthy
pub const UNHEALTHY_ERROR_RATE: f64 = 0.5;

/// Status of a health check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Bus is healthy
    Healthy,
    /// Bus is degraded but functional
    Degraded,
    /// Bus is unhealthy
    Unhealthy,
    /// Bus health is unknown
    Unknown,
}

impl Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Degraded => write!(f, "degraded"),
            HealthStatus::Unhealthy => write!(f, "unhealthy"),
            HealthStatus::Unknown => write!(f, "unknown"),
        }
    }
}

impl HealthStatus {
    /// Classify an observed error rate
    pub fn from_error_rate(error_rate: f64) -> Self {
        if !error_rate.is_finite() {
            HealthStatus::Unknown
        } else if error_rate > UNHEALTHY_ERROR_RATE {
            HealthStatus::Unhealthy
        } else if error_rate > DEGRADED_ERROR_RATE {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        }
    }
}

/// Health details reported by `EventBus::get_health_status`
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    /// Detailed message about the health status
    pub message: Option<String>,
    pub total_listeners: usize,
    pub event_names: usize,
    pub middleware_count: usize,
    pub log_size: usize,
    pub max_log_size: usize,
    pub total_events: u64,
    pub error_rate: f64,
    pub uptime_seconds: f64,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }
}
