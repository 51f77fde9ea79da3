//! Soft-real-time tick loop shared by the protocol workers.

use std::time::{Duration, Instant};

use tokio::sync::broadcast;
use tokio::sync::broadcast::error::TryRecvError;

/// Drive `tick` once per `period` until `shutdown` fires.
///
/// Timing is soft: when a tick overruns its period the overrun is logged
/// and the next tick starts immediately instead of sleeping. The shutdown
/// signal is observed between ticks, so a worker always finishes the tick
/// it is in before exiting.
pub async fn run_ticks<F>(
    name: &'static str,
    period: Duration,
    mut shutdown: broadcast::Receiver<()>,
    mut tick: F,
) where
    F: FnMut(),
{
    tracing::info!(worker = name, period_ms = period.as_millis() as u64, "worker started");
    loop {
        let started = Instant::now();
        tick();
        let elapsed = started.elapsed();

        if elapsed > period {
            tracing::warn!(
                worker = name,
                over_ms = (elapsed - period).as_millis() as u64,
                period_ms = period.as_millis() as u64,
                "tick overran its period"
            );
            match shutdown.try_recv() {
                Ok(()) | Err(TryRecvError::Closed) => break,
                Err(_) => continue,
            }
        }

        tokio::select! {
            _ = shutdown.recv() => break,
            _ = tokio::time::sleep(period - elapsed) => {}
        }
    }
    tracing::info!(worker = name, "worker stopped");
}
