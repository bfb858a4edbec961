//! Periodic mailbox sync.

use crate::sync::MailboxSync;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

pub const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(60);

/// Run the sync job once immediately and then every `interval` until
/// shutdown. A tick that lands while the previous run is still active is
/// skipped. On shutdown the returned handle resolves only after any active
/// run has finished.
pub fn spawn_sync_loop(
    job: Arc<MailboxSync>,
    interval: Duration,
    mut shutdown: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(interval_secs = interval.as_secs(), "starting background mailbox sync");
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut in_flight: Option<JoinHandle<()>> = None;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if job.is_running() {
                        warn!("previous mailbox sync still running, skipping tick");
                        continue;
                    }
                    let job = Arc::clone(&job);
                    in_flight = Some(tokio::spawn(async move {
                        match job.run_if_idle().await {
                            Some(Ok(_)) => {}
                            Some(Err(e)) => error!("scheduled mailbox sync failed: {e}"),
                            None => warn!("previous mailbox sync still running, skipping tick"),
                        }
                    }));
                }
                _ = shutdown.recv() => {
                    break;
                }
            }
        }

        // Let an active run finish its writes before storage is closed
        if let Some(run) = in_flight {
            if !run.is_finished() {
                info!("waiting for active mailbox sync to finish");
            }
            if let Err(e) = run.await {
                error!("mailbox sync task failed: {e}");
            }
        }
    })
}
