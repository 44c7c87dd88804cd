//! Short-lived suppression of cache writes.
//!
//! While engaged, captured pages are still served but not stored. The flag
//! is kept in the shared [`TransientStore`] so it expires on its own.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tracing::info;

use super::transient::TransientStore;

pub const COOLDOWN_KEY: &str = "pagecache_write_cooldown";

#[derive(Clone)]
pub struct WriteCooldown {
    store: Arc<TransientStore>,
    after_failure: Duration,
}

impl WriteCooldown {
    /// `after_failure` is how long writes pause after a failed store; zero
    /// disables the automatic cooldown.
    pub fn new(store: Arc<TransientStore>, after_failure: Duration) -> Self {
        Self {
            store,
            after_failure,
        }
    }

    /// Suppress writes for `duration`. A zero duration clears the flag.
    pub fn engage(&self, duration: Duration) {
        if duration.is_zero() {
            self.clear();
            return;
        }
        self.store
            .set(COOLDOWN_KEY, Bytes::from_static(b"1"), Some(duration));
        info!(cooldown_secs = duration.as_secs(), "cache write cooldown engaged");
    }

    /// Engage the automatic cooldown that follows a failed write.
    pub fn engage_after_failure(&self) {
        if !self.after_failure.is_zero() {
            self.engage(self.after_failure);
        }
    }

    pub fn clear(&self) {
        if self.store.remove(COOLDOWN_KEY) {
            info!("cache write cooldown cleared");
        }
    }

    pub fn is_active(&self) -> bool {
        self.store.get(COOLDOWN_KEY).is_some()
    }

    pub fn remaining(&self) -> Option<Duration> {
        self.store.entry(COOLDOWN_KEY).and_then(|entry| entry.remaining())
    }
}
