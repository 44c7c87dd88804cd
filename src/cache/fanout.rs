//! Invalidation fan-out.
//!
//! A changed entity appears on its own page and on every list page that
//! links to it. [`InvalidationFanout`] evicts all of them from the active
//! backend.

use std::sync::Arc;

use metrics::counter;
use serde::Serialize;
use tracing::{debug, warn};

use super::keys::derive_key;
use super::store::StorageBackend;
use crate::host::{ContentHost, EntityId};

const METRIC_EVICT_TOTAL: &str = "pagecache_evict_total";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FanoutOutcome {
    Evicted,
    /// The entity is a revision snapshot; nothing public changed.
    SkippedRevision,
    /// The entity has no canonical URL.
    Unresolvable,
}

/// Result of invalidating one entity.
#[derive(Debug, Clone, Serialize)]
pub struct FanoutReport {
    pub entity: EntityId,
    pub outcome: FanoutOutcome,
    /// Normalized paths whose entries were deleted.
    pub evicted: Vec<String>,
    /// Deletes that failed and left a stale entry behind.
    pub failed: usize,
}

impl FanoutReport {
    fn empty(entity: EntityId, outcome: FanoutOutcome) -> Self {
        Self {
            entity,
            outcome,
            evicted: Vec::new(),
            failed: 0,
        }
    }
}

pub struct InvalidationFanout {
    host: Arc<dyn ContentHost>,
    backend: Arc<dyn StorageBackend>,
}

impl InvalidationFanout {
    pub fn new(host: Arc<dyn ContentHost>, backend: Arc<dyn StorageBackend>) -> Self {
        Self { host, backend }
    }

    /// Evict the entity's own page and its related pages.
    pub async fn invalidate_entity(&self, id: EntityId) -> FanoutReport {
        let Some(entity) = self.host.entity(id).await else {
            debug!(entity_id = %id, "unknown entity; nothing to invalidate");
            return FanoutReport::empty(id, FanoutOutcome::Unresolvable);
        };
        if entity.is_revision {
            debug!(entity_id = %id, "revision snapshot; skipping invalidation");
            return FanoutReport::empty(id, FanoutOutcome::SkippedRevision);
        }
        let Some(canonical) = self.host.canonical_url(id).await else {
            debug!(entity_id = %id, "entity has no canonical url; skipping invalidation");
            return FanoutReport::empty(id, FanoutOutcome::Unresolvable);
        };

        let mut report = FanoutReport::empty(id, FanoutOutcome::Evicted);
        self.evict(&canonical, &mut report).await;

        let related = self.host.resolve_related_urls(id).await;
        for url in related.iter().filter(|url| *url != canonical) {
            self.evict(url, &mut report).await;
        }

        debug!(
            entity_id = %id,
            evicted = report.evicted.len(),
            failed = report.failed,
            "entity invalidated"
        );
        report
    }

    async fn evict(&self, url: &str, report: &mut FanoutReport) {
        let key = derive_key(url);
        if report.evicted.iter().any(|path| path == key.path()) {
            return;
        }
        match self.backend.delete(&key).await {
            Ok(()) => {
                counter!(METRIC_EVICT_TOTAL, "reason" => "invalidation").increment(1);
                report.evicted.push(key.path().to_string());
            }
            Err(err) => {
                warn!(
                    cache = self.backend.name(),
                    path = key.path(),
                    error = %err,
                    "failed to evict page; stale entry left in place"
                );
                report.failed += 1;
            }
        }
    }
}
