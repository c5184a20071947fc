//! Periodic background loops
//!
//! Every loop sleeps one interval before its first tick and checks the
//! shutdown signal between ticks. A tick that is still running when
//! shutdown arrives finishes first.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::{Shared, flush};

fn spawn_periodic<F, Fut>(
    name: &'static str,
    period: Duration,
    mut shutdown_rx: broadcast::Receiver<()>,
    mut tick: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        info!(task = name, interval_ms = period.as_millis() as u64, "Background task started");

        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately
        interval.tick().await;

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!(task = name, "Background task shutting down");
                    break;
                }
                _ = interval.tick() => tick().await,
            }
        }
    })
}

pub(crate) fn spawn_flush(shared: Arc<Shared>, shutdown_rx: broadcast::Receiver<()>) -> JoinHandle<()> {
    let period = shared.config.flush_interval;
    spawn_periodic("flush", period, shutdown_rx, move || {
        let shared = Arc::clone(&shared);
        async move {
            // Failures are reported and the batch re-queued inside the flush
            if let Err(e) = flush::flush(&shared).await {
                debug!(error = %e, "Flush tick failed");
            }
        }
    })
}

pub(crate) fn spawn_expiry(shared: Arc<Shared>, shutdown_rx: broadcast::Receiver<()>) -> JoinHandle<()> {
    let period = shared.config.expiry_interval;
    spawn_periodic("expiry", period, shutdown_rx, move || {
        let shared = Arc::clone(&shared);
        async move {
            if let Err(e) = shared.negate_expired().await {
                shared.report("negate expired", &e);
            }
        }
    })
}

pub(crate) fn spawn_compaction(
    shared: Arc<Shared>,
    shutdown_rx: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    let period = shared.config.compaction_interval;
    spawn_periodic("compaction", period, shutdown_rx, move || {
        let shared = Arc::clone(&shared);
        async move {
            // Reported inside; the next tick starts again from staging
            if let Err(e) = shared.compact().await {
                debug!(error = %e, "Compaction tick failed");
            }
        }
    })
}
