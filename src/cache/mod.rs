//! Whole-page response cache.
//!
//! Rendered HTML pages are stored by normalized request path and replayed
//! for later anonymous GET requests. Two interchangeable backends exist:
//!
//! - **transient**: a bounded in-process key-value store with per-entry TTL
//! - **static**: `index.html` files under a directory tree, optionally served
//!   directly by the front-door server through installed rewrite rules
//!
//! Content mutations reach the cache as host lifecycle events and evict the
//! changed page together with the list pages that link to it.
//!
//! ## Configuration
//!
//! ```toml
//! [cache]
//! enabled = true
//! backend = "auto"          # auto | transient | static
//! ttl_seconds = 43200
//! static_root = "public/cache/pages"
//! # ... see config.rs for all options
//! ```

mod capture;
mod config;
mod consumer;
mod cooldown;
mod events;
mod fanout;
mod keys;
pub(crate) mod lock;
mod middleware;
mod planner;
mod policy;
mod rewrite;
mod runtime;
mod selector;
mod static_files;
mod store;
mod transient;
mod trigger;

pub use capture::{CapturePhase, CaptureSession, CaptureState, Decision};
pub use config::{CacheConfig, MAX_LIFETIME_SECONDS};
pub use consumer::CacheConsumer;
pub use cooldown::WriteCooldown;
pub use events::{CacheEvent, Epoch, EventQueue};
pub use fanout::{FanoutOutcome, FanoutReport, InvalidationFanout};
pub use keys::{CacheKey, ROOT_SEGMENT, derive_key, normalize_path, static_relative_path};
pub use middleware::{CACHE_HEADER, CacheState, response_cache_layer};
pub use planner::InvalidationPlan;
pub use policy::{
    CachePolicy, ControlContext, DiscardReason, PrefixClassifier, RequestClassifier,
    RequestContext, SkipReason,
};
pub use rewrite::{
    BEGIN_MARKER, END_MARKER, REWRITE_CHECK_KEY, RewriteError, RewriteInstaller, RewriteOutcome,
    RewriteRules, RewriteStatus,
};
pub use runtime::{CacheRuntime, CacheStatus};
pub use selector::{ActiveBackend, BackendChoice, BackendKind, BackendSelector, detect};
pub use static_files::{PAGE_FILE, StaticFileStore};
pub use store::{StorageBackend, StorageError};
pub use transient::{CacheEntry, TransientStore, TtlStore};
pub use trigger::CacheTrigger;
