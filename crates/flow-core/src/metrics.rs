//! Per-flow execution counters.

use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;

/// Counters for one registered flow.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlowMetrics {
    pub flow_id: String,
    /// Executions that passed the trigger filters while the flow was enabled.
    pub triggered_count: u64,
    pub success_count: u64,
    pub error_count: u64,
    /// Mean duration of successful executions in milliseconds.
    pub average_processing_time: f64,
    pub last_triggered: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl FlowMetrics {
    pub fn new(flow_id: impl Into<String>) -> Self {
        FlowMetrics {
            flow_id: flow_id.into(),
            triggered_count: 0,
            success_count: 0,
            error_count: 0,
            average_processing_time: 0.0,
            last_triggered: None,
            last_error: None,
        }
    }
}

/// Tracks [`FlowMetrics`] for every registered flow.
#[derive(Debug, Default)]
pub struct FlowMetricsTracker {
    flows: DashMap<String, FlowMetrics>,
}

impl FlowMetricsTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking `flow_id` with zeroed counters.
    pub fn register(&self, flow_id: &str) {
        self.flows.insert(flow_id.to_string(), FlowMetrics::new(flow_id));
    }

    pub fn remove(&self, flow_id: &str) -> bool {
        self.flows.remove(flow_id).is_some()
    }

    pub fn record_trigger(&self, flow_id: &str) {
        if let Some(mut metrics) = self.flows.get_mut(flow_id) {
            metrics.triggered_count += 1;
            metrics.last_triggered = Some(Utc::now());
        }
    }

    /// Count a successful execution and fold its duration into the running mean.
    pub fn record_success(&self, flow_id: &str, elapsed: Duration) {
        if let Some(mut metrics) = self.flows.get_mut(flow_id) {
            metrics.success_count += 1;
            let n = metrics.success_count as f64;
            let sample = elapsed.as_secs_f64() * 1000.0;
            metrics.average_processing_time =
                (metrics.average_processing_time * (n - 1.0) + sample) / n;
        }
    }

    pub fn record_error(&self, flow_id: &str, error: impl Into<String>) {
        if let Some(mut metrics) = self.flows.get_mut(flow_id) {
            metrics.error_count += 1;
            metrics.last_error = Some(error.into());
        }
    }

    pub fn get(&self, flow_id: &str) -> Option<FlowMetrics> {
        self.flows.get(flow_id).map(|m| m.clone())
    }

    /// Metrics of every tracked flow, ordered by flow id.
    pub fn all(&self) -> Vec<FlowMetrics> {
        let mut all: Vec<FlowMetrics> = self.flows.iter().map(|m| m.clone()).collect();
        all.sort_by(|a, b| a.flow_id.cmp(&b.flow_id));
        all
    }

    pub fn clear(&self) {
        self.flows.clear();
    }
}
