//! Array liveness monitor
//!
//! Periodically probes the active backend's control plane. A probe failure
//! of the unreachable class is retried on the configured backoff schedule;
//! once the retry budget is spent the monitor swaps the active backend to
//! the next configured standby. Lifecycle operations never wait on the
//! monitor, they just observe whichever backend handle is current.

use crate::config::{ActiveBackend, BackendDefinition, ProbeSettings};
use crate::domain::ports::ReachabilityProbeRef;
use crate::error::Result;
use crate::monitor::retry::RetryPolicy;
use backoff::backoff::Backoff;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Observed state of the active backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    /// Last probe succeeded
    Alive,
    /// A probe failed and retries are in flight
    Probing,
    /// Retry budget exhausted without a successful probe
    Unreachable,
}

/// Background liveness monitor over the active backend
pub struct ArrayMonitor {
    probe: ReachabilityProbeRef,
    backend: Arc<ActiveBackend>,
    policy: RetryPolicy,
    interval: Duration,
    cancel: CancellationToken,
    state: RwLock<MonitorState>,
    failovers: AtomicU64,
}

impl ArrayMonitor {
    pub fn new(
        probe: ReachabilityProbeRef,
        backend: Arc<ActiveBackend>,
        settings: &ProbeSettings,
    ) -> Self {
        Self {
            probe,
            backend,
            policy: RetryPolicy::new(settings.retry.clone()),
            interval: Duration::from_secs(settings.interval_secs),
            cancel: CancellationToken::new(),
            state: RwLock::new(MonitorState::Alive),
            failovers: AtomicU64::new(0),
        }
    }

    pub fn state(&self) -> MonitorState {
        *self.state.read()
    }

    /// Completed backend swaps since start
    pub fn failover_count(&self) -> u64 {
        self.failovers.load(Ordering::Relaxed)
    }

    /// Signal the monitor loop to exit
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Probe loop; returns when [`stop`] is called.
    ///
    /// [`stop`]: ArrayMonitor::stop
    pub async fn run(&self) {
        info!(interval_secs = self.interval.as_secs(), "liveness monitor started");
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!("liveness monitor stopping");
                    return;
                }
                _ = tokio::time::sleep(self.interval) => {}
            }
            self.tick().await;
        }
    }

    /// One full probe cycle: probe with bounded retry, then swap on
    /// exhausted connectivity. Public so tests (and operators via a debug
    /// hook) can drive cycles deterministically.
    pub async fn tick(&self) {
        let def = self.backend.load();
        let was_alive = {
            let mut state = self.state.write();
            let prev = *state;
            *state = MonitorState::Probing;
            prev == MonitorState::Alive
        };
        match self.probe_with_retry(&def).await {
            Ok(()) => {
                if !was_alive {
                    info!(backend = %def.name, "backend reachable again");
                }
                *self.state.write() = MonitorState::Alive;
            }
            Err(e) if e.is_unreachable() => {
                // A shutdown mid-retry interrupts the sleep and surfaces the
                // last probe error; that is not an exhausted budget and must
                // not move the active backend.
                if self.cancel.is_cancelled() {
                    debug!(backend = %def.name, "probe interrupted by shutdown");
                    return;
                }
                *self.state.write() = MonitorState::Unreachable;
                warn!(
                    backend = %def.name,
                    "retry budget exhausted, backend declared unreachable: {}",
                    e
                );
                self.fail_over();
            }
            Err(e) => {
                // The control plane answered, just unhappily. Connectivity
                // is intact so no failover.
                warn!(backend = %def.name, "probe error without connectivity loss: {}", e);
            }
        }
    }

    fn fail_over(&self) {
        match self.backend.swap_to_next() {
            Ok(next) => {
                self.failovers.fetch_add(1, Ordering::Relaxed);
                *self.state.write() = MonitorState::Probing;
                warn!(backend = %next.name, "failed over to standby backend");
            }
            Err(e) => {
                warn!("failover not possible: {}", e);
            }
        }
    }

    /// Retry only unreachable-class failures; any other probe error is
    /// final for this cycle.
    async fn probe_with_retry(&self, def: &BackendDefinition) -> Result<()> {
        let mut schedule = self.policy.schedule();
        loop {
            match self.probe.probe(def).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_unreachable() => match schedule.next_backoff() {
                    Some(delay) => {
                        *self.state.write() = MonitorState::Probing;
                        debug!(
                            backend = %def.name,
                            delay_ms = delay.as_millis() as u64,
                            "probe failed, retrying"
                        );
                        tokio::select! {
                            _ = self.cancel.cancelled() => return Err(e),
                            _ = tokio::time::sleep(delay) => {}
                        }
                    }
                    None => return Err(e),
                },
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RetrySettings, ServiceConfig};
    use crate::domain::ports::ReachabilityProbe;
    use crate::error::Error;
    use async_trait::async_trait;

    /// Fails the first `failures` probes with an unreachable error, then
    /// succeeds.
    struct FlakyProbe {
        remaining: AtomicU64,
        calls: AtomicU64,
    }

    impl FlakyProbe {
        fn failing(failures: u64) -> Self {
            Self {
                remaining: AtomicU64::new(failures),
                calls: AtomicU64::new(0),
            }
        }
    }

    #[async_trait]
    impl ReachabilityProbe for FlakyProbe {
        async fn probe(&self, backend: &BackendDefinition) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let remaining = self.remaining.load(Ordering::SeqCst);
            if remaining > 0 {
                if remaining != u64::MAX {
                    self.remaining.fetch_sub(1, Ordering::SeqCst);
                }
                return Err(Error::BackendUnreachable {
                    backend: backend.name.clone(),
                    reason: "injected".into(),
                });
            }
            Ok(())
        }
    }

    /// Always errors, but with a non-connectivity failure
    struct GrumpyProbe;

    #[async_trait]
    impl ReachabilityProbe for GrumpyProbe {
        async fn probe(&self, backend: &BackendDefinition) -> Result<()> {
            Err(Error::Backend {
                backend: backend.name.clone(),
                operation: "login".into(),
                reason: "credentials rejected".into(),
            })
        }
    }

    fn backend_def(name: &str) -> BackendDefinition {
        BackendDefinition {
            name: name.into(),
            api_url: format!("https://{}.example:8080/api/v1", name),
            username: "svc".into(),
            password: "secret".into(),
            cpg: "FC_r6".into(),
            snap_cpg: None,
            iscsi_ips: vec![],
            request_timeout_secs: 5,
        }
    }

    fn settings() -> ProbeSettings {
        ProbeSettings {
            interval_secs: 1,
            retry: RetrySettings {
                initial_delay_ms: 1,
                multiplier: 2.0,
                max_delay_ms: 4,
                max_elapsed_ms: 200,
            },
        }
    }

    fn active(names: &[&str]) -> Arc<ActiveBackend> {
        let config = ServiceConfig {
            backends: names.iter().map(|n| backend_def(n)).collect(),
            default_backend: names[0].to_string(),
            probe: settings(),
        };
        ActiveBackend::from_config(&config)
    }

    #[tokio::test]
    async fn test_transient_failure_recovers_without_failover() {
        let probe = Arc::new(FlakyProbe::failing(2));
        let backend = active(&["array-a", "array-b"]);
        let monitor = ArrayMonitor::new(probe.clone(), backend.clone(), &settings());

        monitor.tick().await;

        assert_eq!(monitor.state(), MonitorState::Alive);
        assert_eq!(monitor.failover_count(), 0);
        assert_eq!(backend.load().name, "array-a");
        assert_eq!(probe.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhausted_budget_swaps_once_per_tick() {
        let probe = Arc::new(FlakyProbe::failing(u64::MAX));
        let backend = active(&["array-a", "array-b"]);
        let monitor = ArrayMonitor::new(probe, backend.clone(), &settings());

        monitor.tick().await;

        assert_eq!(monitor.failover_count(), 1);
        assert_eq!(backend.load().name, "array-b");
        assert_eq!(monitor.state(), MonitorState::Probing);
    }

    #[tokio::test]
    async fn test_single_backend_declares_unreachable_without_swap() {
        let probe = Arc::new(FlakyProbe::failing(u64::MAX));
        let backend = active(&["array-a"]);
        let monitor = ArrayMonitor::new(probe, backend.clone(), &settings());

        monitor.tick().await;

        assert_eq!(monitor.failover_count(), 0);
        assert_eq!(backend.load().name, "array-a");
        assert_eq!(monitor.state(), MonitorState::Unreachable);
    }

    #[tokio::test]
    async fn test_non_connectivity_error_does_not_fail_over() {
        let probe = Arc::new(GrumpyProbe);
        let backend = active(&["array-a", "array-b"]);
        let monitor = ArrayMonitor::new(probe, backend.clone(), &settings());

        monitor.tick().await;

        assert_eq!(monitor.failover_count(), 0);
        assert_eq!(backend.load().name, "array-a");
        // The cycle did probe, and nothing confirmed the backend alive
        assert_eq!(monitor.state(), MonitorState::Probing);
    }

    #[tokio::test]
    async fn test_stop_during_retry_does_not_fail_over() {
        let probe = Arc::new(FlakyProbe::failing(u64::MAX));
        let backend = active(&["array-a", "array-b"]);
        let slow = ProbeSettings {
            interval_secs: 1,
            retry: RetrySettings {
                initial_delay_ms: 50,
                multiplier: 2.0,
                max_delay_ms: 100,
                max_elapsed_ms: 60_000,
            },
        };
        let monitor = Arc::new(ArrayMonitor::new(probe, backend.clone(), &slow));

        let tick = {
            let m = monitor.clone();
            tokio::spawn(async move { m.tick().await })
        };
        // Let the tick enter a retry sleep, then shut down mid-budget
        tokio::time::sleep(Duration::from_millis(10)).await;
        monitor.stop();
        tick.await.unwrap();

        assert_eq!(monitor.failover_count(), 0);
        assert_eq!(backend.load().name, "array-a");
        assert_ne!(monitor.state(), MonitorState::Unreachable);
    }

    #[tokio::test]
    async fn test_stop_terminates_run() {
        let probe = Arc::new(FlakyProbe::failing(0));
        let backend = active(&["array-a"]);
        let monitor = Arc::new(ArrayMonitor::new(probe, backend, &settings()));

        let handle = {
            let m = monitor.clone();
            tokio::spawn(async move { m.run().await })
        };
        monitor.stop();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("run() exits after stop()")
            .unwrap();
    }
}
