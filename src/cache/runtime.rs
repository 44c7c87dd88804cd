//! Cache assembly.
//!
//! Builds every cache component from a [`CacheConfig`] and wires the
//! trigger into the host's dispatcher.

use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use super::config::CacheConfig;
use super::consumer::CacheConsumer;
use super::cooldown::WriteCooldown;
use super::events::EventQueue;
use super::fanout::InvalidationFanout;
use super::middleware::CacheState;
use super::policy::{CachePolicy, PrefixClassifier, RequestClassifier};
use super::rewrite::RewriteStatus;
use super::selector::{ActiveBackend, BackendKind, BackendSelector};
use super::store::StorageError;
use super::transient::TransientStore;
use super::trigger::CacheTrigger;
use crate::host::{ContentHost, EventDispatcher};

/// Snapshot reported by the admin status endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStatus {
    pub enabled: bool,
    pub backend: BackendKind,
    pub rewrite: Option<RewriteStatus>,
    pub cooldown_active: bool,
    pub cooldown_remaining_secs: Option<u64>,
    pub entries: Option<usize>,
    pub pending_events: usize,
}

pub struct CacheRuntime {
    config: CacheConfig,
    transient: Arc<TransientStore>,
    backend: ActiveBackend,
    cooldown: WriteCooldown,
    policy: Arc<CachePolicy>,
    classifier: Arc<dyn RequestClassifier>,
    trigger: Arc<CacheTrigger>,
}

impl CacheRuntime {
    /// Build the cache and subscribe it to `dispatcher`.
    pub fn new(config: CacheConfig, host: Arc<dyn ContentHost>, dispatcher: &EventDispatcher) -> Self {
        let classifier = Arc::new(PrefixClassifier::from_config(&config));
        Self::with_classifier(config, host, dispatcher, classifier)
    }

    pub fn with_classifier(
        config: CacheConfig,
        host: Arc<dyn ContentHost>,
        dispatcher: &EventDispatcher,
        classifier: Arc<dyn RequestClassifier>,
    ) -> Self {
        let transient = Arc::new(TransientStore::new(config.transient_capacity_non_zero()));
        let backend = BackendSelector::select(&config, transient.clone());
        let cooldown = WriteCooldown::new(transient.clone(), config.write_cooldown());
        let policy = Arc::new(CachePolicy::from_config(&config));

        let queue = Arc::new(EventQueue::new());
        let fanout = Arc::new(InvalidationFanout::new(host, backend.store.clone()));
        let consumer = Arc::new(CacheConsumer::new(config.clone(), queue.clone(), fanout));
        let trigger = Arc::new(CacheTrigger::new(config.clone(), queue, consumer));
        trigger.register(dispatcher);

        info!(
            enabled = config.enabled,
            backend = backend.name(),
            "page cache ready"
        );

        Self {
            config,
            transient,
            backend,
            cooldown,
            policy,
            classifier,
            trigger,
        }
    }

    /// State for [`super::response_cache_layer`].
    pub fn state(&self) -> CacheState {
        CacheState {
            backend: self.backend.clone(),
            policy: self.policy.clone(),
            classifier: self.classifier.clone(),
            cooldown: self.cooldown.clone(),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn backend(&self) -> &ActiveBackend {
        &self.backend
    }

    pub fn cooldown(&self) -> &WriteCooldown {
        &self.cooldown
    }

    pub fn transient(&self) -> &Arc<TransientStore> {
        &self.transient
    }

    pub fn trigger(&self) -> &Arc<CacheTrigger> {
        &self.trigger
    }

    /// Remove every cached page from the active backend.
    pub async fn purge_all(&self) -> Result<(), StorageError> {
        self.backend.store.purge_all().await?;
        info!(backend = self.backend.name(), "page cache purged");
        Ok(())
    }

    pub fn status(&self) -> CacheStatus {
        CacheStatus {
            enabled: self.config.enabled,
            backend: self.backend.kind,
            rewrite: self.backend.rewrite_status(),
            cooldown_active: self.cooldown.is_active(),
            cooldown_remaining_secs: self.cooldown.remaining().map(|left| left.as_secs()),
            entries: self.backend.store.entry_count(),
            pending_events: self.trigger.queue().len(),
        }
    }
}
