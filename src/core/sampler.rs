/// Background sampling loop feeding the metrics history

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::core::history::MetricsHistory;
use crate::core::metrics::MetricsSource;

/// Spawn the fixed-interval sampling task
///
/// Each tick takes one sample on the blocking pool and records it. A failed
/// tick is logged and skipped; the loop only ends when `shutdown` is
/// cancelled.
pub fn spawn_sampling_loop<S: MetricsSource + ?Sized>(
    source: Arc<S>,
    history: Arc<MetricsHistory>,
    period: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(period_secs = period.as_secs(), "metrics sampling started");

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let source = Arc::clone(&source);
            match tokio::task::spawn_blocking(move || source.sample()).await {
                Ok(Ok(sample)) => {
                    debug!(cpu = sample.cpu_usage, mem = sample.memory_usage, "sampled");
                    history.record(sample);
                }
                Ok(Err(e)) => warn!(error = %e, "metrics sample failed, skipping tick"),
                Err(e) => warn!(error = %e, "metrics sampling task panicked, skipping tick"),
            }
        }

        info!("metrics sampling stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::metrics::{MetricSample, SystemInfo};
    use crate::error::{DashboardError, Result};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Fails every other call
    struct FlakySource {
        calls: AtomicUsize,
    }

    impl MetricsSource for FlakySource {
        fn sample(&self) -> Result<MetricSample> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n % 2 == 1 {
                return Err(DashboardError::Storage("transient read failure".into()));
            }
            Ok(MetricSample {
                cpu_usage: 1.0,
                memory_usage: 2.0,
                disk_usage: 3.0,
                uptime: n as u64,
                temperature: 40.0,
                timestamp: n as i64,
            })
        }

        fn system_info(&self) -> Result<SystemInfo> {
            Err(DashboardError::Storage("not available".into()))
        }
    }

    #[tokio::test]
    async fn test_failed_ticks_do_not_stop_loop() {
        let source = Arc::new(FlakySource {
            calls: AtomicUsize::new(0),
        });
        let history = Arc::new(MetricsHistory::new(3600));
        let shutdown = CancellationToken::new();

        let handle = spawn_sampling_loop(
            Arc::clone(&source),
            Arc::clone(&history),
            Duration::from_millis(5),
            shutdown.clone(),
        );

        tokio::time::timeout(Duration::from_secs(5), async {
            while history.len() < 3 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("loop kept sampling past failures");

        shutdown.cancel();
        handle.await.unwrap();

        assert!(source.calls.load(Ordering::SeqCst) >= 5);
    }

    #[tokio::test]
    async fn test_cancel_stops_loop() {
        let source = Arc::new(FlakySource {
            calls: AtomicUsize::new(0),
        });
        let history = Arc::new(MetricsHistory::new(3600));
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        let handle = spawn_sampling_loop(source, history, Duration::from_secs(60), shutdown);
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("cancelled loop exits")
            .unwrap();
    }
}
