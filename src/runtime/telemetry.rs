use crate::executor::metrics::CommandMetrics;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio::{select, time};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Default interval used by the metrics reporter task.
pub const DEFAULT_METRICS_INTERVAL: Duration = Duration::from_secs(5);

static TRACING_INIT: OnceLock<()> = OnceLock::new();

/// Installs a basic tracing subscriber (if one is not already active).
///
/// The subscriber honours `RUST_LOG` if it is present, otherwise it falls back to `info`.
/// Calling this function multiple times is harmless.
pub fn init_tracing() {
    if TRACING_INIT.get().is_some() {
        return;
    }

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .try_init();

    let _ = TRACING_INIT.set(());
}

/// Spawns a background task that periodically logs command throughput,
/// in-flight commands, and failures until `shutdown` fires.
pub(crate) fn spawn_metrics_reporter(
    metrics: Arc<CommandMetrics>,
    shutdown: CancellationToken,
    interval: Duration,
    runtime: &Handle,
) -> JoinHandle<()> {
    runtime.spawn(async move {
        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut last_snapshot = metrics.snapshot();
        let mut last_tick = Instant::now();

        loop {
            select! {
                _ = shutdown.cancelled() => {
                    tracing::debug!(target: "cursorfetch::metrics", "metrics reporter shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    let current_snapshot = metrics.snapshot();
                    let completed_delta = current_snapshot
                        .responses
                        .saturating_sub(last_snapshot.responses);
                    if completed_delta == 0 && current_snapshot.in_flight() == 0 {
                        last_tick = Instant::now();
                        continue;
                    }
                    let elapsed = last_tick.elapsed().as_secs_f64();
                    let throughput = if elapsed <= f64::EPSILON {
                        0.0
                    } else {
                        completed_delta as f64 / elapsed
                    };

                    tracing::info!(
                        target: "cursorfetch::metrics",
                        throughput = format!("{throughput:.2}"),
                        scheduled = current_snapshot.scheduled,
                        in_flight = current_snapshot.in_flight(),
                        failures = current_snapshot.failures,
                        timeouts = current_snapshot.timeouts,
                        canceled = current_snapshot.canceled,
                        average_latency_ms = format!("{:.2}", current_snapshot.average_latency_ms),
                        "command executor metrics snapshot"
                    );

                    last_snapshot = current_snapshot;
                    last_tick = Instant::now();
                }
            }
        }
    })
}
