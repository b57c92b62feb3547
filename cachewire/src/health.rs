//! Health checks
//!
//! A health check measures PING latency, reads the server's memory figures
//! from `INFO memory`, and combines them with the client's own counters:
//!
//! | check | issue when |
//! |---|---|
//! | latency | PING round-trip above `latency` |
//! | memory | `used_memory / maxmemory` above `memory_usage` |
//! | hit rate | below `min_hit_rate`, once reads have happened |
//! | errors | any error since the previous check |
//!
//! No issues is `Healthy`. Three or more issues, latency above
//! `critical_latency`, or a failed PING is `Unhealthy`. Anything in between
//! is `Degraded`.
//!
//! [`HealthMonitor`] runs the check on an interval and publishes
//! [`CacheEvent::HealthDegraded`] whenever the result is `Unhealthy`. It
//! never tries to fix anything.

use crate::commands::{server::parse_info, InfoCommand, PingCommand};
use crate::events::{CacheEvent, EventBus};
use crate::metrics::{CacheMetrics, MetricsSnapshot};
use crate::pool::{ConnectionPool, PoolStatus};
use cachewire_core::{config::HealthThresholds, error::CacheResult};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const ISSUES_FOR_UNHEALTHY: usize = 3;

/// Overall grade of a health check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    /// No issues
    Healthy,
    /// Some issues
    Degraded,
    /// Many issues, critical latency, or unreachable
    Unhealthy,
}

/// Result of one health check
#[derive(Debug, Clone)]
pub struct HealthReport {
    /// Overall grade
    pub status: HealthStatus,
    /// PING round-trip; `None` when the PING failed
    pub latency: Option<Duration>,
    /// `used_memory` from INFO
    pub used_memory: Option<u64>,
    /// `maxmemory` from INFO; 0 means unlimited
    pub max_memory: Option<u64>,
    /// `used_memory / maxmemory` when a limit is set
    pub memory_usage: Option<f64>,
    /// Client counters at check time
    pub metrics: MetricsSnapshot,
    /// Errors since the previous check
    pub recent_errors: u64,
    /// Pool occupancy at check time
    pub pool: PoolStatus,
    /// Human-readable list of what is wrong
    pub issues: Vec<String>,
    /// When the check ran
    pub checked_at: SystemTime,
}

impl HealthReport {
    /// Whether the status is `Healthy`
    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }
}

/// Grade a set of observations against thresholds
///
/// `latency` is `None` when the server could not be reached.
pub fn grade(
    latency: Option<Duration>,
    memory_usage: Option<f64>,
    metrics: &MetricsSnapshot,
    recent_errors: u64,
    thresholds: &HealthThresholds,
) -> (HealthStatus, Vec<String>) {
    let mut issues = Vec::new();

    let Some(latency) = latency else {
        issues.push("server did not answer PING".to_string());
        return (HealthStatus::Unhealthy, issues);
    };

    if latency > thresholds.latency {
        issues.push(format!(
            "latency {:?} above {:?}",
            latency, thresholds.latency
        ));
    }
    if let Some(usage) = memory_usage {
        if usage > thresholds.memory_usage {
            issues.push(format!(
                "memory usage {:.1}% above {:.1}%",
                usage * 100.0,
                thresholds.memory_usage * 100.0
            ));
        }
    }
    if metrics.hits + metrics.misses > 0 && metrics.hit_rate < thresholds.min_hit_rate {
        issues.push(format!(
            "hit rate {:.1}% below {:.1}%",
            metrics.hit_rate * 100.0,
            thresholds.min_hit_rate * 100.0
        ));
    }
    if recent_errors > 0 {
        issues.push(format!("{} errors since last check", recent_errors));
    }

    let status = if latency > thresholds.critical_latency || issues.len() >= ISSUES_FOR_UNHEALTHY
    {
        HealthStatus::Unhealthy
    } else if issues.is_empty() {
        HealthStatus::Healthy
    } else {
        HealthStatus::Degraded
    };
    (status, issues)
}

/// Memory figures from an `INFO memory` reply
fn memory_figures(info: &str) -> (Option<u64>, Option<u64>) {
    let mut used = None;
    let mut max = None;
    for (field, value) in parse_info(info) {
        match field {
            "used_memory" => used = value.parse().ok(),
            "maxmemory" => max = value.parse().ok(),
            _ => {}
        }
    }
    (used, max)
}

/// Everything a health check needs, shared by a client and its monitor
#[derive(Debug)]
pub(crate) struct HealthProbe {
    pool: ConnectionPool,
    metrics: Arc<CacheMetrics>,
    thresholds: HealthThresholds,
    errors_at_last_check: AtomicU64,
}

impl HealthProbe {
    pub(crate) fn new(
        pool: ConnectionPool,
        metrics: Arc<CacheMetrics>,
        thresholds: HealthThresholds,
    ) -> Self {
        Self {
            pool,
            metrics,
            thresholds,
            errors_at_last_check: AtomicU64::new(0),
        }
    }

    async fn ping_and_info(&self) -> CacheResult<(Duration, String)> {
        let conn = self.pool.acquire().await?;
        let started = Instant::now();
        conn.execute(&PingCommand::new()).await?;
        let latency = started.elapsed();
        let info = conn.execute(&InfoCommand::section("memory")).await?;
        Ok((latency, info))
    }

    pub(crate) async fn check(&self) -> HealthReport {
        let errors = self.metrics.errors();
        let previous = self.errors_at_last_check.swap(errors, Ordering::Relaxed);
        let recent_errors = errors.saturating_sub(previous);

        let (latency, used_memory, max_memory) = match self.ping_and_info().await {
            Ok((latency, info)) => {
                let (used, max) = memory_figures(&info);
                (Some(latency), used, max)
            }
            Err(e) => {
                warn!("Health probe failed: {}", e);
                (None, None, None)
            }
        };
        let memory_usage = match (used_memory, max_memory) {
            (Some(used), Some(max)) if max > 0 => Some(used as f64 / max as f64),
            _ => None,
        };

        let metrics = self.metrics.snapshot();
        let (status, issues) = grade(
            latency,
            memory_usage,
            &metrics,
            recent_errors,
            &self.thresholds,
        );
        debug!("Health check: {:?} ({} issues)", status, issues.len());

        HealthReport {
            status,
            latency,
            used_memory,
            max_memory,
            memory_usage,
            metrics,
            recent_errors,
            pool: self.pool.status(),
            issues,
            checked_at: SystemTime::now(),
        }
    }
}

/// Periodic health checks in a background task
#[derive(Debug)]
pub struct HealthMonitor {
    handle: Option<JoinHandle<()>>,
}

impl HealthMonitor {
    pub(crate) fn spawn(probe: Arc<HealthProbe>, events: EventBus, interval: Duration) -> Self {
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            let mut last_status = HealthStatus::Healthy;

            loop {
                ticker.tick().await;
                let report = probe.check().await;

                if report.status != last_status {
                    info!(
                        "Cache health changed from {:?} to {:?}",
                        last_status, report.status
                    );
                    last_status = report.status;
                }
                if report.status == HealthStatus::Unhealthy {
                    warn!("Cache unhealthy: {}", report.issues.join("; "));
                    events.emit(CacheEvent::HealthDegraded(report));
                }
            }
        });
        Self {
            handle: Some(handle),
        }
    }

    /// Whether the background task is still running
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stop the background task
    pub fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
            debug!("Health monitor stopped");
        }
    }
}

impl Drop for HealthMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(hits: u64, misses: u64) -> MetricsSnapshot {
        let metrics = CacheMetrics::new();
        for _ in 0..hits {
            metrics.record_hit(Duration::ZERO);
        }
        for _ in 0..misses {
            metrics.record_miss(Duration::ZERO);
        }
        metrics.snapshot()
    }

    #[test]
    fn test_healthy_without_traffic() {
        let (status, issues) = grade(
            Some(Duration::from_millis(1)),
            Some(0.2),
            &snapshot(0, 0),
            0,
            &HealthThresholds::default(),
        );
        assert_eq!(status, HealthStatus::Healthy);
        assert!(issues.is_empty());
    }

    #[test]
    fn test_slow_ping_degrades() {
        let (status, issues) = grade(
            Some(Duration::from_millis(250)),
            None,
            &snapshot(10, 0),
            0,
            &HealthThresholds::default(),
        );
        assert_eq!(status, HealthStatus::Degraded);
        assert_eq!(issues.len(), 1);
    }

    #[test]
    fn test_critical_latency_is_unhealthy() {
        let (status, _) = grade(
            Some(Duration::from_secs(2)),
            None,
            &snapshot(0, 0),
            0,
            &HealthThresholds::default(),
        );
        assert_eq!(status, HealthStatus::Unhealthy);
    }

    #[test]
    fn test_three_issues_is_unhealthy() {
        let (status, issues) = grade(
            Some(Duration::from_millis(200)),
            Some(0.95),
            &snapshot(1, 9),
            0,
            &HealthThresholds::default(),
        );
        assert_eq!(issues.len(), 3);
        assert_eq!(status, HealthStatus::Unhealthy);
    }

    #[test]
    fn test_errors_and_unreachable() {
        let (status, _) = grade(
            Some(Duration::from_millis(1)),
            None,
            &snapshot(0, 0),
            2,
            &HealthThresholds::default(),
        );
        assert_eq!(status, HealthStatus::Degraded);

        let (status, issues) = grade(None, None, &snapshot(0, 0), 0, &HealthThresholds::default());
        assert_eq!(status, HealthStatus::Unhealthy);
        assert_eq!(issues.len(), 1);
    }

    #[test]
    fn test_memory_figures() {
        let info = "# Memory\r\nused_memory:900\r\nused_memory_human:900B\r\nmaxmemory:1000\r\n";
        assert_eq!(memory_figures(info), (Some(900), Some(1000)));
        assert_eq!(memory_figures(""), (None, None));
    }
}
