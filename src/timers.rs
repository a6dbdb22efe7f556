use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::events::{LoopEvent, Timer};

/// Timers registered by the current screen.
///
/// `reset` cancels every pending sleep and bumps the epoch, so a timer that
/// already fired but still sits in the loop's queue is recognised as stale.
#[derive(Debug)]
pub struct ScreenTimers {
    parent: CancellationToken,
    token: CancellationToken,
    epoch: u64,
    events: mpsc::UnboundedSender<LoopEvent>,
}

impl ScreenTimers {
    pub fn new(parent: CancellationToken, events: mpsc::UnboundedSender<LoopEvent>) -> Self {
        let token = parent.child_token();
        Self {
            parent,
            token,
            epoch: 0,
            events,
        }
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn is_current(&self, epoch: u64) -> bool {
        self.epoch == epoch
    }

    pub fn schedule(&self, after: Duration, timer: Timer) {
        let token = self.token.clone();
        let events = self.events.clone();
        let epoch = self.epoch;
        trace!(?timer, ?after, epoch, "timer scheduled");
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(after) => {
                    let _ = events.send(LoopEvent::Timer { epoch, timer });
                }
            }
        });
    }

    pub fn reset(&mut self) {
        self.token.cancel();
        self.token = self.parent.child_token();
        self.epoch += 1;
        trace!(epoch = self.epoch, "timers reset");
    }
}
