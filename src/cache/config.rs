//! Cache configuration.
//!
//! Runtime view of the `[cache]` settings table.

use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use super::selector::BackendChoice;

const DEFAULT_TTL_SECONDS: u64 = 12 * 60 * 60;
const DEFAULT_NAMESPACE: &str = "page_cache_";
const DEFAULT_TRANSIENT_CAPACITY: usize = 2048;
const DEFAULT_STATIC_ROOT: &str = "public/cache/pages";
const DEFAULT_REWRITE_CHECK_SECONDS: u64 = 12 * 60 * 60;
const DEFAULT_WRITE_COOLDOWN_SECONDS: u64 = 60;
const DEFAULT_MAX_BODY_BYTES: usize = 2 * 1024 * 1024;
const DEFAULT_CONSUME_BATCH_LIMIT: usize = 100;

/// Upper bound for every configurable lifetime: ten years.
pub const MAX_LIFETIME_SECONDS: u64 = 10 * 365 * 24 * 60 * 60;

pub(crate) const DEFAULT_CONTROL_PREFIXES: &[&str] = &["/admin", "/wp-admin", "/wp-login.php"];
pub(crate) const DEFAULT_API_PREFIXES: &[&str] = &["/api", "/wp-json"];
pub(crate) const DEFAULT_AUTH_COOKIE_PREFIXES: &[&str] =
    &["wordpress_logged_in_", "pagecache_session"];
pub(crate) const DEFAULT_ASSET_EXTENSIONS: &[&str] = &[
    "ico", "png", "jpg", "jpeg", "gif", "css", "js", "svg", "webp", "woff", "woff2", "map",
];

fn owned(items: &[&str]) -> Vec<String> {
    items.iter().map(|item| item.to_string()).collect()
}

/// Page cache configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Master switch; when off every request passes straight through.
    pub enabled: bool,
    /// Which storage backend to run.
    pub backend: BackendChoice,
    /// Overrides the `SERVER_SOFTWARE` environment sniff used by `auto`.
    pub server_software: Option<String>,
    /// Lifetime of transient entries.
    pub ttl_seconds: u64,
    /// Key prefix owned by the page cache inside the transient store.
    pub namespace: String,
    /// Maximum number of keys in the transient store.
    pub transient_capacity: usize,
    /// Directory holding static page files.
    pub static_root: PathBuf,
    /// Document root of the front-door server.
    pub document_root: Option<PathBuf>,
    /// File receiving the rewrite directive block.
    pub rewrite_target: Option<PathBuf>,
    /// How long a rewrite installation check is remembered.
    pub rewrite_check_seconds: u64,
    /// Write pause after a failed store; zero disables it.
    pub write_cooldown_seconds: u64,
    /// Responses larger than this are served but not stored.
    pub max_body_bytes: usize,
    pub control_prefixes: Vec<String>,
    pub api_prefixes: Vec<String>,
    pub auth_cookie_prefixes: Vec<String>,
    pub asset_extensions: Vec<String>,
    /// Maximum events per consumption batch.
    pub consume_batch_limit: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            backend: BackendChoice::Auto,
            server_software: None,
            ttl_seconds: DEFAULT_TTL_SECONDS,
            namespace: DEFAULT_NAMESPACE.to_string(),
            transient_capacity: DEFAULT_TRANSIENT_CAPACITY,
            static_root: PathBuf::from(DEFAULT_STATIC_ROOT),
            document_root: None,
            rewrite_target: None,
            rewrite_check_seconds: DEFAULT_REWRITE_CHECK_SECONDS,
            write_cooldown_seconds: DEFAULT_WRITE_COOLDOWN_SECONDS,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            control_prefixes: owned(DEFAULT_CONTROL_PREFIXES),
            api_prefixes: owned(DEFAULT_API_PREFIXES),
            auth_cookie_prefixes: owned(DEFAULT_AUTH_COOKIE_PREFIXES),
            asset_extensions: owned(DEFAULT_ASSET_EXTENSIONS),
            consume_batch_limit: DEFAULT_CONSUME_BATCH_LIMIT,
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            enabled: settings.enabled,
            backend: settings.backend,
            server_software: settings.server_software.clone(),
            ttl_seconds: settings.ttl_seconds.get(),
            namespace: settings.namespace.clone(),
            transient_capacity: settings.transient_capacity.get(),
            static_root: settings.static_root.clone(),
            document_root: settings.document_root.clone(),
            rewrite_target: settings.rewrite_target.clone(),
            rewrite_check_seconds: settings.rewrite_check_seconds,
            write_cooldown_seconds: settings.write_cooldown_seconds,
            max_body_bytes: settings.max_body_bytes.get(),
            control_prefixes: settings.control_prefixes.clone(),
            api_prefixes: settings.api_prefixes.clone(),
            auth_cookie_prefixes: settings.auth_cookie_prefixes.clone(),
            asset_extensions: settings.asset_extensions.clone(),
            consume_batch_limit: settings.consume_batch_limit.get(),
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }

    pub fn rewrite_check_interval(&self) -> Duration {
        Duration::from_secs(self.rewrite_check_seconds)
    }

    pub fn write_cooldown(&self) -> Duration {
        Duration::from_secs(self.write_cooldown_seconds)
    }

    /// Returns the transient capacity as NonZeroUsize, clamping to 1 if zero.
    pub fn transient_capacity_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.transient_capacity).unwrap_or(NonZeroUsize::MIN)
    }
}
