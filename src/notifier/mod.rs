pub mod webhook;

use eyre::Result;
use parking_lot::Mutex;
use std::time::Duration;
use tokio::time::Instant;

use crate::domain::{Delivery, Notification};

/// A channel alerts are delivered to.
///
/// Strategies call `notify` from their own spawned delivery task, so an
/// implementation may take as long as its transport timeout allows.
#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    fn kind(&self) -> &str;

    /// Delivers `notification`, or skips it when throttled. Errors are
    /// best-effort: callers log them and move on.
    async fn notify(&self, notification: &Notification) -> Result<Delivery>;
}

/// Minimum-interval gate shared by every send of one notifier instance.
///
/// The gate is per notifier, not per category key: two categories sent to
/// the same notifier inside one interval suppress each other.
#[derive(Debug)]
pub struct Throttle {
    interval: Duration,
    last_sent: Mutex<Option<Instant>>,
}

impl Throttle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_sent: Mutex::new(None),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Claims the next send slot. Returns false when the previous send was
    /// less than `interval` ago; otherwise records now as the last send.
    pub fn try_acquire(&self) -> bool {
        let now = Instant::now();
        let mut last_sent = self.last_sent.lock();
        if let Some(prev) = *last_sent {
            if now.duration_since(prev) < self.interval {
                return false;
            }
        }
        *last_sent = Some(now);
        true
    }
}
