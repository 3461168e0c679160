//! Background health tracking for the knowledge base.
//!
//! A single task owns all state transitions; request handlers only read the
//! cached state through [`DependencyHealthMonitor::is_down`].

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::Notify;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::knowledge::{KnowledgeClient, QueryParameters};

/// Default interval between probes.
pub const DEFAULT_PROBE_INTERVAL: Duration = Duration::from_secs(30);
/// Default bound on a single probe.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    Healthy,
    Down,
}

/// A lightweight liveness check.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn probe(&self) -> Result<()>;
}

/// Probes the knowledge base with a throwaway query.
pub struct KnowledgeProbe {
    client: Arc<dyn KnowledgeClient>,
}

impl KnowledgeProbe {
    pub fn new(client: Arc<dyn KnowledgeClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HealthProbe for KnowledgeProbe {
    async fn probe(&self) -> Result<()> {
        self.client
            .lookup(&QueryParameters::text("health_check"))
            .await?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
struct HealthSnapshot {
    state: HealthState,
    last_checked: Option<Instant>,
}

pub struct DependencyHealthMonitor {
    probe: Arc<dyn HealthProbe>,
    interval: Duration,
    probe_timeout: Duration,
    snapshot: RwLock<HealthSnapshot>,
    nudge: Notify,
}

impl DependencyHealthMonitor {
    pub fn new(probe: Arc<dyn HealthProbe>, interval: Duration) -> Self {
        Self {
            probe,
            interval,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            snapshot: RwLock::new(HealthSnapshot {
                state: HealthState::Healthy,
                last_checked: None,
            }),
            nudge: Notify::new(),
        }
    }

    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    pub fn is_down(&self) -> bool {
        self.snapshot.read().state == HealthState::Down
    }

    pub fn state(&self) -> HealthState {
        self.snapshot.read().state
    }

    pub fn last_checked(&self) -> Option<Instant> {
        self.snapshot.read().last_checked
    }

    /// Ask the monitor to probe now instead of waiting for the next tick.
    /// The monitor task still performs the probe and the transition.
    pub fn request_probe(&self) {
        self.nudge.notify_one();
    }

    async fn check(&self) {
        let outcome = match tokio::time::timeout(self.probe_timeout, self.probe.probe()).await {
            Ok(result) => result,
            Err(_) => Err(anyhow::anyhow!(
                "probe timed out after {:?}",
                self.probe_timeout
            )),
        };

        let mut snapshot = self.snapshot.write();
        let previous = snapshot.state;
        snapshot.last_checked = Some(Instant::now());
        match outcome {
            Ok(()) => {
                snapshot.state = HealthState::Healthy;
                if previous == HealthState::Down {
                    info!("Knowledge base is back online");
                }
            }
            Err(err) => {
                snapshot.state = HealthState::Down;
                if previous == HealthState::Healthy {
                    warn!(error = %err, "Knowledge base is down");
                }
            }
        }
    }

    /// Probe immediately, then on every interval tick or nudge, until
    /// `shutdown` fires.
    pub async fn run(&self, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!("Health monitor shutting down");
                    break;
                }
                _ = ticker.tick() => self.check().await,
                _ = self.nudge.notified() => {
                    self.check().await;
                    ticker.reset();
                }
            }
        }
    }

    pub fn spawn(self: &Arc<Self>, shutdown: CancellationToken) -> tokio::task::JoinHandle<()> {
        let monitor = Arc::clone(self);
        tokio::spawn(async move { monitor.run(shutdown).await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct SwitchProbe {
        healthy: AtomicBool,
        calls: AtomicUsize,
    }

    impl SwitchProbe {
        fn new(healthy: bool) -> Arc<Self> {
            Arc::new(Self {
                healthy: AtomicBool::new(healthy),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl HealthProbe for SwitchProbe {
        async fn probe(&self) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.healthy.load(Ordering::SeqCst) {
                Ok(())
            } else {
                Err(anyhow::anyhow!("connection refused"))
            }
        }
    }

    struct HangingProbe;

    #[async_trait]
    impl HealthProbe for HangingProbe {
        async fn probe(&self) -> Result<()> {
            std::future::pending::<()>().await;
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_transitions_within_one_interval() {
        let probe = SwitchProbe::new(true);
        let monitor = Arc::new(DependencyHealthMonitor::new(
            probe.clone(),
            Duration::from_secs(30),
        ));
        let shutdown = CancellationToken::new();
        let handle = monitor.spawn(shutdown.clone());

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(!monitor.is_down());
        assert!(monitor.last_checked().is_some());

        probe.healthy.store(false, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(monitor.is_down());

        probe.healthy.store(true, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(monitor.state(), HealthState::Healthy);

        shutdown.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_probe_runs_out_of_band() {
        let probe = SwitchProbe::new(true);
        let monitor = Arc::new(DependencyHealthMonitor::new(
            probe.clone(),
            Duration::from_secs(3600),
        ));
        let shutdown = CancellationToken::new();
        let handle = monitor.spawn(shutdown.clone());
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(probe.calls.load(Ordering::SeqCst), 1);

        probe.healthy.store(false, Ordering::SeqCst);
        monitor.request_probe();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(probe.calls.load(Ordering::SeqCst), 2);
        assert!(monitor.is_down());

        shutdown.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_probe_counts_as_down() {
        let monitor = Arc::new(
            DependencyHealthMonitor::new(Arc::new(HangingProbe), Duration::from_secs(30))
                .with_probe_timeout(Duration::from_secs(5)),
        );
        let shutdown = CancellationToken::new();
        let handle = monitor.spawn(shutdown.clone());

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(monitor.is_down());

        shutdown.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_signal_stops_run() {
        let monitor =
            DependencyHealthMonitor::new(SwitchProbe::new(true), Duration::from_secs(3600));
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        tokio::time::timeout(Duration::from_secs(2), monitor.run(shutdown))
            .await
            .expect("monitor.run() should exit within timeout");
    }
}
