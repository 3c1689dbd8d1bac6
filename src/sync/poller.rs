use super::{SyncEvent, SyncReport};
use crate::error::MirrorError;
use std::future::Future;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Duration, Instant, MissedTickBehavior};

/// Recurring incremental sync. Stopping never interrupts a tick already in flight.
pub(crate) struct Poller {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl Poller {
    pub(crate) fn spawn<F, Fut>(
        interval: Duration,
        sink: mpsc::Sender<SyncEvent>,
        mut tick: F,
    ) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<SyncReport, MirrorError>> + Send + 'static,
    {
        let (stop, mut stop_rx) = watch::channel(false);
        let period = interval.max(Duration::from_millis(1));
        let task = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    biased;
                    changed = stop_rx.changed() => {
                        if changed.is_err() || *stop_rx.borrow() {
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        let event = match tick().await {
                            Ok(report) if report.changed.is_empty() => continue,
                            Ok(report) => SyncEvent::Updated(report.changed),
                            Err(err) => {
                                tracing::warn!("[SYNC] Poll failed: {}", err);
                                SyncEvent::Failed(err.user_message())
                            }
                        };
                        if sink.send(event).await.is_err() {
                            tracing::debug!("[SYNC] Poll sink closed; stopping");
                            break;
                        }
                    }
                }
            }
        });
        Self { stop, task }
    }

    pub(crate) fn stop(self) {
        let _ = self.stop.send(true);
        // Detach: an in-flight tick completes on its own.
        drop(self.task);
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}
