//! Invalidation planning.
//!
//! Merges a batch of queued events into the set of entities to invalidate.

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use super::events::{CacheEvent, Epoch};
use crate::host::{ContentEvent, EntityId};

/// Entities to run through the fanout, each with its latest event.
#[derive(Debug, Default)]
pub struct InvalidationPlan {
    pub entities: BTreeMap<EntityId, (Epoch, ContentEvent)>,
    /// Events dropped as duplicates or no-op status changes.
    pub ignored: usize,
}

impl fmt::Display for InvalidationPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "InvalidationPlan {{ entities: {}, ignored: {} }}",
            self.entities.len(),
            self.ignored
        )
    }
}

impl InvalidationPlan {
    /// Merge events into a plan.
    ///
    /// - Deduplicates by event id
    /// - Drops status changes whose old and new status match
    /// - Keeps the latest epoch per entity
    pub fn from_events(events: Vec<CacheEvent>) -> Self {
        let mut plan = Self::default();
        let mut seen_ids = HashSet::new();

        for event in events {
            if !seen_ids.insert(event.id) || event.kind.is_noop() {
                plan.ignored += 1;
                continue;
            }

            let entity = event.kind.entity_id();
            plan.entities
                .entry(entity)
                .and_modify(|(epoch, kind)| {
                    if event.epoch > *epoch {
                        *epoch = event.epoch;
                        *kind = event.kind.clone();
                    }
                })
                .or_insert((event.epoch, event.kind));
        }

        plan
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::EntityStatus;

    #[test]
    fn empty_events_produce_empty_plan() {
        let plan = InvalidationPlan::from_events(vec![]);
        assert!(plan.is_empty());
    }

    #[test]
    fn dedupes_by_event_id() {
        let event = CacheEvent::new(ContentEvent::Published { id: EntityId::new() }, 1);
        let plan = InvalidationPlan::from_events(vec![event.clone(), event]);
        assert_eq!(plan.entities.len(), 1);
        assert_eq!(plan.ignored, 1);
    }

    #[test]
    fn keeps_latest_event_per_entity() {
        let id = EntityId::new();
        let events = vec![
            CacheEvent::new(ContentEvent::Trashed { id }, 7),
            CacheEvent::new(ContentEvent::Published { id }, 3),
            CacheEvent::new(ContentEvent::Published { id: EntityId::new() }, 5),
        ];

        let plan = InvalidationPlan::from_events(events);
        assert_eq!(plan.entities.len(), 2);
        assert_eq!(plan.entities[&id], (7, ContentEvent::Trashed { id }));
    }

    #[test]
    fn drops_same_status_transitions() {
        let id = EntityId::new();
        let plan = InvalidationPlan::from_events(vec![CacheEvent::new(
            ContentEvent::StatusChanged {
                id,
                old: EntityStatus::Published,
                new: EntityStatus::Published,
            },
            1,
        )]);
        assert!(plan.is_empty());
        assert_eq!(plan.ignored, 1);
    }
}
