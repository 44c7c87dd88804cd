//! Per-request capture state machine.
//!
//! ```text
//! Undecided ──skip──▶ Skipped
//!     │
//!     ├──hit──▶ Hit
//!     │
//!     └──miss──▶ Buffering ──store──▶ Committed
//!                    └──────reject──▶ Discarded
//! ```
//!
//! A [`CaptureSession`] is created for one request and dropped with it.
//! Nothing in it is shared between requests except the storage backend.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use metrics::counter;
use tracing::{debug, warn};

use super::cooldown::WriteCooldown;
use super::keys::{CacheKey, derive_key};
use super::policy::{CachePolicy, DiscardReason, RequestContext, SkipReason};
use super::store::StorageBackend;

const METRIC_HIT_TOTAL: &str = "pagecache_hit_total";
const METRIC_MISS_TOTAL: &str = "pagecache_miss_total";
const METRIC_STORE_TOTAL: &str = "pagecache_store_total";
const METRIC_STORE_FAILED_TOTAL: &str = "pagecache_store_failed_total";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CapturePhase {
    Undecided,
    Skipped(SkipReason),
    /// Served from storage; the handler did not run.
    Hit,
    Buffering,
    Committed,
    Discarded(DiscardReason),
}

/// Request-local cache bookkeeping.
#[derive(Debug, Clone)]
pub struct CaptureState {
    phase: CapturePhase,
    key: Option<CacheKey>,
}

impl CaptureState {
    fn new() -> Self {
        Self {
            phase: CapturePhase::Undecided,
            key: None,
        }
    }

    pub fn phase(&self) -> &CapturePhase {
        &self.phase
    }

    pub fn key(&self) -> Option<&CacheKey> {
        self.key.as_ref()
    }

    /// Whether this request is still eligible to be stored.
    pub fn should_cache(&self) -> bool {
        matches!(self.phase, CapturePhase::Buffering | CapturePhase::Committed)
    }

    pub fn cache_hit(&self) -> bool {
        self.phase == CapturePhase::Hit
    }
}

/// What the caller should do after [`CaptureSession::begin`].
#[derive(Debug)]
pub enum Decision {
    /// Answer with these stored bytes; do not run the handler.
    Serve(Bytes),
    /// Run the handler and pass its output through untouched.
    Bypass(SkipReason),
    /// Run the handler, buffer its output and call [`CaptureSession::finish`].
    Capture,
}

pub struct CaptureSession {
    backend: Arc<dyn StorageBackend>,
    policy: Arc<CachePolicy>,
    cooldown: Option<WriteCooldown>,
    ttl: Option<Duration>,
    state: CaptureState,
}

impl CaptureSession {
    pub fn new(backend: Arc<dyn StorageBackend>, policy: Arc<CachePolicy>) -> Self {
        Self {
            backend,
            policy,
            cooldown: None,
            ttl: None,
            state: CaptureState::new(),
        }
    }

    pub fn with_cooldown(mut self, cooldown: WriteCooldown) -> Self {
        self.cooldown = Some(cooldown);
        self
    }

    /// Override the backend's default ttl for the stored entry.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn state(&self) -> &CaptureState {
        &self.state
    }

    pub fn policy(&self) -> &CachePolicy {
        &self.policy
    }

    /// Decide how the request is handled. Must be called once, before the
    /// handler produces any output.
    ///
    /// Ineligible requests never reach storage. Eligible requests look up
    /// their key; a storage error counts as a miss.
    pub async fn begin(&mut self, request: &RequestContext) -> Decision {
        if self.state.phase != CapturePhase::Undecided {
            warn!(phase = ?self.state.phase, "capture session already decided");
            return Decision::Bypass(SkipReason::Disabled);
        }

        if let Some(reason) = self.policy.skip_reason(request) {
            debug!(path = %request.path, reason = %reason, "cache skipped");
            self.state.phase = CapturePhase::Skipped(reason);
            return Decision::Bypass(reason);
        }

        let key = derive_key(&request.path);
        let backend = self.backend.name();
        let lookup = self.backend.get(&key).await;
        self.state.key = Some(key);

        match lookup {
            Ok(Some(body)) => {
                counter!(METRIC_HIT_TOTAL, "backend" => backend).increment(1);
                debug!(cache = backend, outcome = "hit", path = %request.path, "serving cached page");
                self.state.phase = CapturePhase::Hit;
                return Decision::Serve(body);
            }
            Ok(None) => {}
            Err(err) => {
                warn!(cache = backend, path = %request.path, error = %err, "cache read failed; treating as miss");
            }
        }

        counter!(METRIC_MISS_TOTAL, "backend" => backend).increment(1);
        debug!(cache = backend, outcome = "miss", path = %request.path, "capturing response");
        self.state.phase = CapturePhase::Buffering;
        Decision::Capture
    }

    /// Settle a buffered request. `rejection` is the late eligibility check
    /// on the produced response.
    ///
    /// Storage failures are logged and swallowed; the caller always emits
    /// `body` afterwards.
    pub async fn finish(&mut self, body: &Bytes, rejection: Option<DiscardReason>) -> &CapturePhase {
        if self.state.phase != CapturePhase::Buffering {
            return &self.state.phase;
        }
        let Some(key) = self.state.key.clone() else {
            self.state.phase = CapturePhase::Discarded(DiscardReason::Empty);
            return &self.state.phase;
        };

        let rejection = if body.is_empty() {
            Some(DiscardReason::Empty)
        } else if rejection.is_some() {
            rejection
        } else if self.cooldown.as_ref().is_some_and(WriteCooldown::is_active) {
            Some(DiscardReason::Cooldown)
        } else {
            None
        };

        if let Some(reason) = rejection {
            debug!(path = key.path(), reason = %reason, "captured response not stored");
            self.state.phase = CapturePhase::Discarded(reason);
            return &self.state.phase;
        }

        let backend = self.backend.name();
        match self.backend.put(&key, body.clone(), self.ttl).await {
            Ok(()) => {
                counter!(METRIC_STORE_TOTAL, "backend" => backend).increment(1);
                debug!(cache = backend, path = key.path(), bytes = body.len(), "page stored");
                self.state.phase = CapturePhase::Committed;
            }
            Err(err) => {
                counter!(METRIC_STORE_FAILED_TOTAL, "backend" => backend).increment(1);
                warn!(cache = backend, path = key.path(), error = %err, "cache write failed; serving uncached");
                if let Some(cooldown) = &self.cooldown {
                    cooldown.engage_after_failure();
                }
                self.state.phase = CapturePhase::Discarded(DiscardReason::StoreFailed);
            }
        }
        &self.state.phase
    }

    /// Give up on a buffered request without inspecting its body.
    pub fn discard(&mut self, reason: DiscardReason) -> &CapturePhase {
        if self.state.phase == CapturePhase::Buffering {
            debug!(reason = %reason, "captured response not stored");
            self.state.phase = CapturePhase::Discarded(reason);
        }
        &self.state.phase
    }

    /// Value for the `X-Cache` header, or `None` for pass-through requests.
    pub fn cache_header(&self) -> Option<String> {
        let backend = self.backend.name();
        match self.state.phase {
            CapturePhase::Hit => Some(format!("HIT ({backend})")),
            CapturePhase::Buffering | CapturePhase::Committed | CapturePhase::Discarded(_) => {
                Some(format!("MISS ({backend})"))
            }
            CapturePhase::Undecided | CapturePhase::Skipped(_) => None,
        }
    }
}
