//! Tunnel monitor (§4.E): periodic health probing of the externally managed
//! ingress proxy, with consecutive-failure escalation, throttled restart,
//! and time-weighted uptime accounting.

use std::time::Duration;

use parking_lot::Mutex;
use tracing::{error, warn};

use crate::config::TunnelConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IncidentSeverity {
    Warning,
    Critical,
}

#[derive(Debug, Clone)]
pub struct Incident {
    pub severity: IncidentSeverity,
    pub reason: String,
}

/// The platform operation a restart attempt issues, in order. A real
/// binding drives an OS service manager; tests use a fake that just
/// records the sequence.
#[async_trait::async_trait]
pub trait TunnelRestarter: Send + Sync {
    async fn query_service(&self) -> anyhow::Result<()>;
    async fn stop_service(&self) -> anyhow::Result<()>;
    async fn start_service(&self) -> anyhow::Result<()>;
}

/// The health probe itself: an HTTPS GET with a short timeout against
/// `TunnelConfig::url`. A real binding uses `reqwest`; tests use a fake
/// that returns canned results.
#[async_trait::async_trait]
pub trait TunnelProbe: Send + Sync {
    async fn probe(&self) -> Result<Duration, String>;
}

struct UptimeLedger {
    process_start: std::time::Instant,
    connected_since: Option<std::time::Instant>,
    accumulated_connected: Duration,
    last_update: std::time::Instant,
}

impl UptimeLedger {
    fn new(now: std::time::Instant) -> Self {
        Self {
            process_start: now,
            connected_since: None,
            accumulated_connected: Duration::ZERO,
            last_update: now,
        }
    }

    fn mark_connected(&mut self, now: std::time::Instant) {
        if self.connected_since.is_none() {
            self.connected_since = Some(now);
        }
        self.last_update = now;
    }

    fn mark_disconnected(&mut self, now: std::time::Instant) {
        if let Some(since) = self.connected_since.take() {
            self.accumulated_connected += now.saturating_duration_since(since);
        }
        self.last_update = now;
    }

    /// Time-weighted uptime percentage: Σ dt_connected / Σ dt_total since
    /// process start. Always in [0, 100].
    fn uptime_pct(&self, now: std::time::Instant) -> f64 {
        let total = now.saturating_duration_since(self.process_start);
        if total.is_zero() {
            return 100.0;
        }
        let mut connected = self.accumulated_connected;
        if let Some(since) = self.connected_since {
            connected += now.saturating_duration_since(since);
        }
        (connected.as_secs_f64() / total.as_secs_f64() * 100.0).clamp(0.0, 100.0)
    }
}

pub struct TunnelMonitor<P: TunnelProbe, R: TunnelRestarter> {
    probe: P,
    restarter: R,
    config: TunnelConfig,
    consecutive_failures: Mutex<u32>,
    restart_count: Mutex<u32>,
    connected: Mutex<bool>,
    ledger: Mutex<UptimeLedger>,
}

impl<P: TunnelProbe, R: TunnelRestarter> TunnelMonitor<P, R> {
    pub fn new(probe: P, restarter: R, config: TunnelConfig) -> Self {
        let now = std::time::Instant::now();
        Self {
            probe,
            restarter,
            config,
            consecutive_failures: Mutex::new(0),
            restart_count: Mutex::new(0),
            connected: Mutex::new(false),
            ledger: Mutex::new(UptimeLedger::new(now)),
        }
    }

    pub fn is_connected(&self) -> bool {
        *self.connected.lock()
    }

    pub fn restart_count(&self) -> u32 {
        *self.restart_count.lock()
    }

    pub fn consecutive_failures(&self) -> u32 {
        *self.consecutive_failures.lock()
    }

    pub fn uptime_pct(&self) -> f64 {
        self.ledger.lock().uptime_pct(std::time::Instant::now())
    }

    /// Runs one probe cycle, returning any incident raised. A restart
    /// attempt does not reset the failure counter — only a subsequent
    /// successful probe does (§4.E).
    pub async fn probe_once(&self) -> Option<Incident> {
        let now = std::time::Instant::now();
        match self.probe.probe().await {
            Ok(_latency) => {
                *self.consecutive_failures.lock() = 0;
                *self.connected.lock() = true;
                self.ledger.lock().mark_connected(now);
                None
            }
            Err(reason) => {
                *self.connected.lock() = false;
                self.ledger.lock().mark_disconnected(now);
                let mut failures = self.consecutive_failures.lock();
                *failures += 1;
                let count = *failures;
                drop(failures);

                if count >= self.config.failure_threshold {
                    error!(reason = %reason, consecutive_failures = count, "tunnel probe failing, attempting restart");
                    self.attempt_restart().await;
                    Some(Incident {
                        severity: IncidentSeverity::Critical,
                        reason,
                    })
                } else {
                    warn!(reason = %reason, consecutive_failures = count, "tunnel probe failed");
                    Some(Incident {
                        severity: IncidentSeverity::Warning,
                        reason,
                    })
                }
            }
        }
    }

    async fn attempt_restart(&self) {
        if self.restarter.query_service().await.is_err() {
            warn!("tunnel service query failed, attempting restart anyway");
        }
        if let Err(e) = self.restarter.stop_service().await {
            error!(error = %e, "tunnel service stop failed");
        }
        if let Err(e) = self.restarter.start_service().await {
            error!(error = %e, "tunnel service start failed");
        }
        *self.restart_count.lock() += 1;
    }

    pub async fn run_forever(&self) {
        let mut interval = tokio::time::interval(Duration::from_secs(self.config.probe_interval_sec));
        loop {
            interval.tick().await;
            self.probe_once().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ScriptedProbe {
        results: Mutex<Vec<Result<Duration, String>>>,
    }

    #[async_trait::async_trait]
    impl TunnelProbe for ScriptedProbe {
        async fn probe(&self) -> Result<Duration, String> {
            let mut results = self.results.lock();
            if results.is_empty() {
                Ok(Duration::from_millis(10))
            } else {
                results.remove(0)
            }
        }
    }

    struct CountingRestarter {
        calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl TunnelRestarter for CountingRestarter {
        async fn query_service(&self) -> anyhow::Result<()> {
            Ok(())
        }
        async fn stop_service(&self) -> anyhow::Result<()> {
            Ok(())
        }
        async fn start_service(&self) -> anyhow::Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn config() -> TunnelConfig {
        TunnelConfig {
            url: Some("https://example.test/health".to_string()),
            probe_interval_sec: 30,
            failure_threshold: 3,
        }
    }

    #[tokio::test]
    async fn three_consecutive_failures_trigger_restart_and_critical_incident() {
        let probe = ScriptedProbe {
            results: Mutex::new(vec![
                Err("connection refused".to_string()),
                Err("connection refused".to_string()),
                Err("connection refused".to_string()),
            ]),
        };
        let restarter = CountingRestarter {
            calls: AtomicUsize::new(0),
        };
        let monitor = TunnelMonitor::new(probe, restarter, config());

        let i1 = monitor.probe_once().await.unwrap();
        assert_eq!(i1.severity, IncidentSeverity::Warning);
        let i2 = monitor.probe_once().await.unwrap();
        assert_eq!(i2.severity, IncidentSeverity::Warning);
        let i3 = monitor.probe_once().await.unwrap();
        assert_eq!(i3.severity, IncidentSeverity::Critical);

        assert_eq!(monitor.restart_count(), 1);
    }

    #[tokio::test]
    async fn restart_attempt_does_not_reset_failure_counter() {
        let probe = ScriptedProbe {
            results: Mutex::new(vec![
                Err("e".to_string()),
                Err("e".to_string()),
                Err("e".to_string()),
                Err("e".to_string()),
            ]),
        };
        let restarter = CountingRestarter {
            calls: AtomicUsize::new(0),
        };
        let monitor = TunnelMonitor::new(probe, restarter, config());
        for _ in 0..4 {
            monitor.probe_once().await;
        }
        assert_eq!(monitor.consecutive_failures(), 4);
        assert_eq!(monitor.restart_count(), 2);
    }

    #[tokio::test]
    async fn successful_probe_resets_failure_counter() {
        let probe = ScriptedProbe {
            results: Mutex::new(vec![Err("e".to_string()), Err("e".to_string()), Ok(Duration::from_millis(5))]),
        };
        let restarter = CountingRestarter {
            calls: AtomicUsize::new(0),
        };
        let monitor = TunnelMonitor::new(probe, restarter, config());
        monitor.probe_once().await;
        monitor.probe_once().await;
        let incident = monitor.probe_once().await;
        assert!(incident.is_none());
        assert_eq!(monitor.consecutive_failures(), 0);
        assert!(monitor.is_connected());
    }

    #[test]
    fn uptime_pct_stays_within_bounds_with_no_elapsed_time() {
        let ledger = UptimeLedger::new(std::time::Instant::now());
        let pct = ledger.uptime_pct(std::time::Instant::now());
        assert!((0.0..=100.0).contains(&pct));
    }
}
