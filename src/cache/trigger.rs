//! Cache trigger service.
//!
//! Subscribes the cache to host lifecycle events. Every event is queued and,
//! by default, consumed immediately so a mutation's related pages are gone
//! before the mutating request returns. A disabled cache stores nothing new
//! but still evicts pages left by an earlier run.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::config::CacheConfig;
use super::consumer::CacheConsumer;
use super::events::EventQueue;
use crate::host::{ContentEvent, ContentEventListener, EventDispatcher};

pub struct CacheTrigger {
    config: CacheConfig,
    queue: Arc<EventQueue>,
    consumer: Arc<CacheConsumer>,
}

impl CacheTrigger {
    pub fn new(config: CacheConfig, queue: Arc<EventQueue>, consumer: Arc<CacheConsumer>) -> Self {
        Self {
            config,
            queue,
            consumer,
        }
    }

    /// Subscribe this trigger to the host's lifecycle events.
    pub fn register(self: &Arc<Self>, dispatcher: &EventDispatcher) {
        dispatcher.subscribe(self.clone());
    }

    /// Publish an event and optionally consume immediately.
    pub async fn trigger(&self, event: ContentEvent, consume_now: bool) {
        if event.is_noop() {
            debug!(event_kind = event.label(), entity_id = %event.entity_id(), "Cache trigger skipped: status unchanged");
            return;
        }

        if !self.config.enabled {
            debug!(event_kind = event.label(), "Cache disabled; evicting pages stored earlier");
        }
        self.queue.publish(event);

        if consume_now {
            self.consumer.consume().await;
        }
    }

    pub fn queue(&self) -> &Arc<EventQueue> {
        &self.queue
    }

    pub fn consumer(&self) -> &Arc<CacheConsumer> {
        &self.consumer
    }
}

#[async_trait]
impl ContentEventListener for CacheTrigger {
    async fn on_event(&self, event: &ContentEvent) {
        self.trigger(event.clone(), true).await;
    }
}
