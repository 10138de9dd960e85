//! Rolling per-source health derived from call outcomes.
//!
//! Status rules, applied after every reported outcome:
//! - `unhealthy_after_failures` consecutive failures => Unhealthy
//! - at least one consecutive failure => Degraded
//! - success slower than `degraded_latency` => Degraded
//! - otherwise Healthy
//!
//! Ranking keeps unhealthy sources in the list, at the back, so a recovered
//! source is rediscovered by ordinary traffic.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::{Deserialize, Serialize};

use super::source_map::SourceMap;

const DEFAULT_PRIORITY: u8 = 10;

/// Health status, ordered from most to least preferred.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    #[default]
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Unhealthy => "unhealthy",
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Health record for one source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceHealth {
    pub status: HealthStatus,
    /// Latency of the last successful call or probe.
    pub response_time_ms: Option<u64>,
    pub consecutive_failures: u32,
    pub last_checked_at: Option<DateTime<Utc>>,
}

/// Thresholds used to derive [`HealthStatus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthConfig {
    pub unhealthy_after_failures: u32,
    pub degraded_latency: Duration,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            unhealthy_after_failures: 3,
            degraded_latency: Duration::from_secs(5),
        }
    }
}

/// Tracks health and configured priority per source.
pub struct HealthTracker {
    records: SourceMap<SourceHealth>,
    priorities: SourceMap<u8>,
    config: HealthConfig,
}

impl HealthTracker {
    pub fn new(config: HealthConfig) -> Self {
        Self {
            records: SourceMap::new("Health tracker"),
            priorities: SourceMap::new("Health tracker priority"),
            config,
        }
    }

    /// Set the tie-break priority of a source (lower = preferred).
    pub fn set_priority(&self, source: &str, priority: u8) {
        let slot = self.priorities.entry(source, || priority);
        *self.priorities.lock(&slot) = priority;
    }

    pub fn priority(&self, source: &str) -> u8 {
        self.priorities
            .get(source)
            .map(|slot| *self.priorities.lock(&slot))
            .unwrap_or(DEFAULT_PRIORITY)
    }

    /// Fold one call outcome into the source's record.
    pub fn report_outcome(&self, source: &str, success: bool, response_time: Option<Duration>) {
        let slot = self.records.entry(source, SourceHealth::default);
        let mut record = self.records.lock(&slot);
        let previous = record.status;

        if let Some(elapsed) = response_time {
            record.response_time_ms = Some(u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX));
        }
        record.last_checked_at = Some(Utc::now());

        if success {
            record.consecutive_failures = 0;
            let slow = response_time.is_some_and(|elapsed| elapsed > self.config.degraded_latency);
            record.status = if slow {
                HealthStatus::Degraded
            } else {
                HealthStatus::Healthy
            };
        } else {
            record.consecutive_failures += 1;
            record.status = if record.consecutive_failures >= self.config.unhealthy_after_failures {
                HealthStatus::Unhealthy
            } else {
                HealthStatus::Degraded
            };
        }

        if record.status != previous {
            match record.status {
                HealthStatus::Unhealthy => warn!(
                    "Source '{}' is unhealthy after {} consecutive failures",
                    source, record.consecutive_failures
                ),
                status => info!("Source '{}' health: {} -> {}", source, previous, status),
            }
        }
    }

    /// Current record; unseen sources are healthy.
    pub fn health(&self, source: &str) -> SourceHealth {
        self.records
            .get(source)
            .map(|slot| self.records.lock(&slot).clone())
            .unwrap_or_default()
    }

    pub fn all_health(&self) -> BTreeMap<String, SourceHealth> {
        self.records
            .snapshot()
            .into_iter()
            .map(|(source, slot)| {
                let record = self.records.lock(&slot).clone();
                (source, record)
            })
            .collect()
    }

    /// Order candidates by status, then priority. Duplicates are dropped;
    /// equal candidates keep their given order.
    pub fn ranked_sources(&self, candidates: &[String]) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut ranked: Vec<(HealthStatus, u8, &String)> = candidates
            .iter()
            .filter(|source| seen.insert(source.as_str()))
            .map(|source| (self.health(source).status, self.priority(source), source))
            .collect();

        ranked.sort_by_key(|(status, priority, _)| (*status, *priority));
        ranked.into_iter().map(|(_, _, source)| source.clone()).collect()
    }

    /// Forget a source's history; it is healthy again.
    pub fn reset(&self, source: &str) {
        if self.records.remove(source).is_some() {
            info!("Health tracker: reset '{}'", source);
        }
    }
}

impl Default for HealthTracker {
    fn default() -> Self {
        Self::new(HealthConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn test_unseen_source_is_healthy() {
        let tracker = HealthTracker::default();
        let health = tracker.health("NEW");
        assert_eq!(health.status, HealthStatus::Healthy);
        assert_eq!(health.consecutive_failures, 0);
        assert!(health.last_checked_at.is_none());
    }

    #[test]
    fn test_failures_degrade_then_mark_unhealthy() {
        let tracker = HealthTracker::default();

        tracker.report_outcome("A", false, None);
        assert_eq!(tracker.health("A").status, HealthStatus::Degraded);

        tracker.report_outcome("A", false, None);
        assert_eq!(tracker.health("A").status, HealthStatus::Degraded);

        tracker.report_outcome("A", false, None);
        let health = tracker.health("A");
        assert_eq!(health.status, HealthStatus::Unhealthy);
        assert_eq!(health.consecutive_failures, 3);
    }

    #[test]
    fn test_success_recovers() {
        let tracker = HealthTracker::default();
        tracker.report_outcome("A", false, None);
        tracker.report_outcome("A", false, None);
        tracker.report_outcome("A", false, None);

        tracker.report_outcome("A", true, Some(Duration::from_millis(120)));
        let health = tracker.health("A");
        assert_eq!(health.status, HealthStatus::Healthy);
        assert_eq!(health.consecutive_failures, 0);
        assert_eq!(health.response_time_ms, Some(120));
    }

    #[test]
    fn test_slow_success_is_degraded() {
        let tracker = HealthTracker::new(HealthConfig {
            unhealthy_after_failures: 3,
            degraded_latency: Duration::from_millis(500),
        });

        tracker.report_outcome("SLOW", true, Some(Duration::from_millis(800)));
        assert_eq!(tracker.health("SLOW").status, HealthStatus::Degraded);

        tracker.report_outcome("SLOW", true, Some(Duration::from_millis(500)));
        assert_eq!(tracker.health("SLOW").status, HealthStatus::Healthy);
    }

    #[test]
    fn test_ranking_by_status_then_priority() {
        let tracker = HealthTracker::default();
        tracker.set_priority("A", 1);
        tracker.set_priority("B", 2);
        tracker.set_priority("C", 3);
        tracker.set_priority("D", 0);

        // A degraded, D unhealthy, B and C healthy
        tracker.report_outcome("A", false, None);
        for _ in 0..3 {
            tracker.report_outcome("D", false, None);
        }

        let ranked = tracker.ranked_sources(&ids(&["A", "B", "C", "D"]));
        assert_eq!(ranked, ids(&["B", "C", "A", "D"]));
    }

    #[test]
    fn test_ranking_is_stable_for_ties() {
        let tracker = HealthTracker::default();
        let ranked = tracker.ranked_sources(&ids(&["Z", "Y", "X", "Y"]));
        assert_eq!(ranked, ids(&["Z", "Y", "X"]));
    }

    #[test]
    fn test_reset() {
        let tracker = HealthTracker::default();
        tracker.report_outcome("A", false, None);
        tracker.reset("A");
        assert_eq!(tracker.health("A").status, HealthStatus::Healthy);
        assert!(tracker.all_health().is_empty());
    }

    #[test]
    fn test_status_serialization() {
        assert_eq!(
            serde_json::to_string(&HealthStatus::Degraded).unwrap(),
            "\"degraded\""
        );
        let health = SourceHealth::default();
        let json = serde_json::to_value(&health).unwrap();
        assert!(json.get("consecutiveFailures").is_some());
    }
}
