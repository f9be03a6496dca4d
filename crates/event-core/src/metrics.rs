//! Aggregate and per-event counters derived from bus activity.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;

/// Number of entries reported in [`BusMetrics::top_events`].
pub const TOP_EVENTS_LIMIT: usize = 10;

/// Timing summary for one event name.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EventPerformance {
    pub count: u64,
    /// Total dispatch time in milliseconds.
    pub total_time: f64,
    /// Mean dispatch time in milliseconds.
    pub avg_time: f64,
}

/// Snapshot returned by `EventBus::get_metrics`.
#[derive(Debug, Clone, Serialize)]
pub struct BusMetrics {
    pub total_events: u64,
    pub events_per_second: f64,
    /// Mean `emit` duration in milliseconds.
    pub average_processing_time: f64,
    pub error_count: u64,
    /// `error_count / total_events` (0 when nothing was emitted).
    pub error_rate: f64,
    pub top_events: Vec<(String, u64)>,
    pub performance_by_event: HashMap<String, EventPerformance>,
    pub uptime_seconds: f64,
}

#[derive(Debug, Default)]
struct EventCounter {
    first_seen: u64,
    count: u64,
    timed: u64,
    total_time: Duration,
}

#[derive(Debug, Default)]
struct MetricsState {
    total_events: u64,
    error_count: u64,
    timed_emits: u64,
    total_processing: Duration,
    next_ordinal: u64,
    events: HashMap<String, EventCounter>,
}

/// Collects bus metrics. Cheap to update from concurrent emits.
#[derive(Debug)]
pub struct MetricsCollector {
    started: Mutex<Instant>,
    timings_enabled: bool,
    state: Mutex<MetricsState>,
}

impl MetricsCollector {
    pub fn new(timings_enabled: bool) -> Self {
        MetricsCollector {
            started: Mutex::new(Instant::now()),
            timings_enabled,
            state: Mutex::new(MetricsState::default()),
        }
    }

    /// Record one validated emission and how long its dispatch took.
    pub fn record_event(&self, name: &str, elapsed: Duration) {
        let mut state = self.state.lock();
        state.total_events += 1;
        if self.timings_enabled {
            state.timed_emits += 1;
            state.total_processing += elapsed;
        }

        let ordinal = state.next_ordinal;
        let counter = state.events.entry(name.to_string()).or_insert_with(|| EventCounter {
            first_seen: ordinal,
            ..Default::default()
        });
        counter.count += 1;
        if self.timings_enabled {
            counter.timed += 1;
            counter.total_time += elapsed;
        }
        if counter.count == 1 {
            state.next_ordinal += 1;
        }
    }

    /// Record a rejected publication or a failed listener.
    pub fn record_error(&self) {
        self.state.lock().error_count += 1;
    }

    pub fn total_events(&self) -> u64 {
        self.state.lock().total_events
    }

    pub fn error_rate(&self) -> f64 {
        let state = self.state.lock();
        error_rate(state.error_count, state.total_events)
    }

    pub fn uptime(&self) -> Duration {
        self.started.lock().elapsed()
    }

    pub fn snapshot(&self) -> BusMetrics {
        let uptime = self.uptime().as_secs_f64();
        let state = self.state.lock();

        let mut ranked: Vec<(&String, &EventCounter)> = state.events.iter().collect();
        ranked.sort_by(|(_, a), (_, b)| b.count.cmp(&a.count).then(a.first_seen.cmp(&b.first_seen)));
        let top_events = ranked
            .iter()
            .take(TOP_EVENTS_LIMIT)
            .map(|(name, counter)| ((*name).clone(), counter.count))
            .collect();

        let performance_by_event = state
            .events
            .iter()
            .map(|(name, counter)| {
                let total_time = millis(counter.total_time);
                let avg_time = if counter.timed == 0 {
                    0.0
                } else {
                    total_time / counter.timed as f64
                };
                (
                    name.clone(),
                    EventPerformance {
                        count: counter.count,
                        total_time,
                        avg_time,
                    },
                )
            })
            .collect();

        BusMetrics {
            total_events: state.total_events,
            events_per_second: if uptime > 0.0 {
                state.total_events as f64 / uptime
            } else {
                0.0
            },
            average_processing_time: if state.timed_emits == 0 {
                0.0
            } else {
                millis(state.total_processing) / state.timed_emits as f64
            },
            error_count: state.error_count,
            error_rate: error_rate(state.error_count, state.total_events),
            top_events,
            performance_by_event,
            uptime_seconds: uptime,
        }
    }

    /// Clear every counter and restart the uptime clock.
    pub fn reset(&self) {
        *self.state.lock() = MetricsState::default();
        *self.started.lock() = Instant::now();
    }
}

fn millis(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

fn error_rate(errors: u64, total: u64) -> f64 {
    if total == 0 {
        if errors == 0 { 0.0 } else { 1.0 }
    } else {
        errors as f64 / total as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_top_events_ties_keep_first_seen_order() {
        let metrics = MetricsCollector::new(true);
        for name in ["b", "a", "c", "a", "b", "c", "d"] {
            metrics.record_event(name, Duration::from_millis(1));
        }
        let snapshot = metrics.snapshot();
        let names: Vec<&str> = snapshot.top_events.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["b", "a", "c", "d"]);
        assert_eq!(snapshot.total_events, 7);
    }

    #[test]
    fn test_top_events_limited_to_ten() {
        let metrics = MetricsCollector::new(true);
        for i in 0..15 {
            metrics.record_event(&format!("event.{i}"), Duration::ZERO);
        }
        assert_eq!(metrics.snapshot().top_events.len(), TOP_EVENTS_LIMIT);
    }

    #[test]
    fn test_average_processing_time() {
        let metrics = MetricsCollector::new(true);
        metrics.record_event("x", Duration::from_millis(10));
        metrics.record_event("x", Duration::from_millis(30));
        let snapshot = metrics.snapshot();
        assert!((snapshot.average_processing_time - 20.0).abs() < 1e-6);
        let perf = &snapshot.performance_by_event["x"];
        assert_eq!(perf.count, 2);
        assert!((perf.total_time - 40.0).abs() < 1e-6);
        assert!((perf.avg_time - 20.0).abs() < 1e-6);
    }

    #[test]
    fn test_timings_disabled_still_counts() {
        let metrics = MetricsCollector::new(false);
        metrics.record_event("x", Duration::from_millis(10));
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.total_events, 1);
        assert_eq!(snapshot.average_processing_time, 0.0);
    }

    #[test]
    fn test_error_rate_and_reset() {
        let metrics = MetricsCollector::new(true);
        metrics.record_event("x", Duration::ZERO);
        metrics.record_event("x", Duration::ZERO);
        metrics.record_error();
        assert!((metrics.error_rate() - 0.5).abs() < 1e-9);
        metrics.reset();
        assert_eq!(metrics.total_events(), 0);
        assert_eq!(metrics.error_rate(), 0.0);
    }
}
