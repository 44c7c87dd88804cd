//! Cache key derivation.
//!
//! A request target is reduced to its path, normalized, and hashed into a
//! [`CacheKey`]. The static backend also needs a filesystem location for the
//! page, which is derived from the same normalized path by
//! [`static_relative_path`].

use std::fmt;
use std::path::PathBuf;

use sha2::{Digest, Sha256};
use url::Url;

/// Directory segment used for the site root in the static store.
pub const ROOT_SEGMENT: &str = "index";

/// Number of digest bytes kept in a key (128 bits).
const DIGEST_BYTES: usize = 16;

/// Identifies one cached page.
///
/// Two requests map to the same key exactly when their normalized paths are
/// equal; the digest is the first 128 bits of the SHA-256 of that path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    path: String,
    digest: String,
}

impl CacheKey {
    /// Normalized request path this key was derived from.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Hex digest of the normalized path.
    pub fn digest(&self) -> &str {
        &self.digest
    }

    /// Sanitized directory for this page, relative to a static cache root.
    pub fn static_dir(&self) -> PathBuf {
        static_relative_path(&self.path)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.digest)
    }
}

/// Derive the cache key for a request target.
///
/// Accepts either an absolute URL (`https://host/a/b?x=1`) or an
/// origin-form target (`/a/b?x=1`).
pub fn derive_key(target: &str) -> CacheKey {
    let path = normalize_path(target);
    let digest = Sha256::digest(path.as_bytes());
    CacheKey {
        digest: hex::encode(&digest[..DIGEST_BYTES]),
        path,
    }
}

/// Reduce a request target to a canonical path.
///
/// Scheme, host, query and fragment are dropped, empty segments are removed
/// (so `/a/`, `/a` and `//a` agree) and an empty path becomes `/`.
pub fn normalize_path(target: &str) -> String {
    let target = target.trim();
    let raw = match Url::parse(target) {
        Ok(url) if url.has_host() => url.path().to_string(),
        _ => strip_query_and_fragment(target).to_string(),
    };

    let mut normalized = String::with_capacity(raw.len() + 1);
    for segment in raw.split('/').filter(|segment| !segment.is_empty()) {
        normalized.push('/');
        normalized.push_str(segment);
    }
    if normalized.is_empty() {
        normalized.push('/');
    }
    normalized
}

/// Map a normalized path onto a directory confined below the cache root.
///
/// Every character outside `[A-Za-z0-9_-]` is dropped from each segment and
/// segments that end up empty are skipped, so the result never contains
/// `..`, a root component, or a separator run. The root path maps to
/// [`ROOT_SEGMENT`].
pub fn static_relative_path(normalized: &str) -> PathBuf {
    let mut relative = PathBuf::new();
    for segment in normalized.split('/') {
        let cleaned: String = segment
            .chars()
            .filter(|ch| ch.is_ascii_alphanumeric() || *ch == '_' || *ch == '-')
            .collect();
        if !cleaned.is_empty() {
            relative.push(cleaned);
        }
    }
    if relative.as_os_str().is_empty() {
        relative.push(ROOT_SEGMENT);
    }
    relative
}

fn strip_query_and_fragment(target: &str) -> &str {
    match target.find(['?', '#']) {
        Some(index) => &target[..index],
        None => target,
    }
}
