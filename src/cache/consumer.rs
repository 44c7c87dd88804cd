//! Cache consumer.
//!
//! Drains the event queue, plans and runs the invalidations.

use std::sync::Arc;
use std::time::Instant;

use metrics::histogram;
use tracing::{info, instrument};
use uuid::Uuid;

use super::config::CacheConfig;
use super::events::EventQueue;
use super::fanout::{FanoutReport, InvalidationFanout};
use super::planner::InvalidationPlan;

const METRIC_INVALIDATE_MS: &str = "pagecache_invalidate_ms";

pub struct CacheConsumer {
    config: CacheConfig,
    queue: Arc<EventQueue>,
    fanout: Arc<InvalidationFanout>,
}

impl CacheConsumer {
    pub fn new(config: CacheConfig, queue: Arc<EventQueue>, fanout: Arc<InvalidationFanout>) -> Self {
        Self {
            config,
            queue,
            fanout,
        }
    }

    /// Consume one batch of pending events.
    ///
    /// Returns one report per invalidated entity; empty when nothing was
    /// pending.
    #[instrument(skip(self))]
    pub async fn consume(&self) -> Vec<FanoutReport> {
        let started_at = Instant::now();
        let events = self.queue.drain(self.config.consume_batch_limit.max(1));
        if events.is_empty() {
            return Vec::new();
        }

        let event_count = events.len();
        let event_ids: Vec<Uuid> = events.iter().map(|e| e.id).collect();
        let plan = InvalidationPlan::from_events(events);

        info!(
            event_count,
            event_ids = ?event_ids,
            plan = %plan,
            "Cache consumption starting"
        );

        let mut reports = Vec::with_capacity(plan.entities.len());
        for id in plan.entities.keys() {
            reports.push(self.fanout.invalidate_entity(*id).await);
        }

        info!(
            event_count,
            entities = reports.len(),
            evicted = reports.iter().map(|r| r.evicted.len()).sum::<usize>(),
            "Cache consumption complete"
        );

        histogram!(METRIC_INVALIDATE_MS).record(started_at.elapsed().as_secs_f64() * 1000.0);
        reports
    }

    /// Consume until the queue is empty.
    pub async fn consume_all(&self) -> Vec<FanoutReport> {
        let mut reports = Vec::new();
        while !self.queue.is_empty() {
            reports.extend(self.consume().await);
        }
        reports
    }

    pub fn queue(&self) -> &Arc<EventQueue> {
        &self.queue
    }
}
