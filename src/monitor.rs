use std::time::Duration;

use tokio::{
    sync::mpsc,
    task::JoinHandle,
    time::{self, MissedTickBehavior},
};
use tracing::debug;

use crate::worker::Message;

/// Periodically asks the worker to check whether the pending batch has timed out.
///
/// The worker makes the decision, so a check which arrives just after a size-triggered flush finds
/// an empty batch and does nothing.
#[derive(Debug)]
pub(crate) struct TimeoutMonitor {
    handle: JoinHandle<()>,
}

impl TimeoutMonitor {
    pub fn spawn(check_interval: Duration, msg_tx: mpsc::Sender<Message>) -> Self {
        let handle = tokio::spawn(async move {
            let mut interval = time::interval(check_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            // The first tick completes immediately.
            interval.tick().await;

            loop {
                interval.tick().await;

                if msg_tx.send(Message::CheckTimeout).await.is_err() {
                    debug!("Timeout monitor stopping: the worker has shut down");
                    return;
                }
            }
        });

        Self { handle }
    }

    pub fn stop(&self) {
        self.handle.abort();
    }
}

impl Drop for TimeoutMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}
