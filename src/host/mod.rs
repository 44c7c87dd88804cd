//! Collaborator interface between the page cache and the content host.
//!
//! The cache never reaches into the host directly. It resolves URLs through
//! [`ContentHost`] and learns about mutations by subscribing a
//! [`ContentEventListener`] to the host's [`EventDispatcher`].

use std::fmt;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::cache::lock::{rw_read, rw_write};

const SOURCE: &str = "host";

/// Identifier of a content entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub Uuid);

impl EntityId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityStatus {
    Draft,
    Published,
    Private,
    Trash,
}

impl EntityStatus {
    pub fn is_public(&self) -> bool {
        matches!(self, EntityStatus::Published)
    }
}

impl fmt::Display for EntityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            EntityStatus::Draft => "draft",
            EntityStatus::Published => "published",
            EntityStatus::Private => "private",
            EntityStatus::Trash => "trash",
        };
        f.write_str(label)
    }
}

/// What the cache needs to know about an entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntitySummary {
    pub id: EntityId,
    pub kind: String,
    pub status: EntityStatus,
    pub author: Option<String>,
    /// Revision snapshots are never publicly routed.
    pub is_revision: bool,
}

/// A taxonomy term attached to an entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TermRef {
    pub taxonomy: String,
    pub slug: String,
}

/// Pages that list or link to an entity, deduplicated in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelatedUrlSet {
    urls: Vec<String>,
}

impl RelatedUrlSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a URL; `None` is skipped silently.
    pub fn push(&mut self, url: Option<String>) {
        if let Some(url) = url
            && !self.urls.contains(&url)
        {
            self.urls.push(url);
        }
    }

    pub fn contains(&self, url: &str) -> bool {
        self.urls.iter().any(|candidate| candidate == url)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.urls.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.urls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.urls.is_empty()
    }
}

impl IntoIterator for RelatedUrlSet {
    type Item = String;
    type IntoIter = std::vec::IntoIter<String>;

    fn into_iter(self) -> Self::IntoIter {
        self.urls.into_iter()
    }
}

/// URL resolution provided by the content host.
///
/// Every resolver may return `None`: an entity, archive, term or author
/// that is not publicly routable simply has no URL.
#[async_trait]
pub trait ContentHost: Send + Sync {
    async fn entity(&self, id: EntityId) -> Option<EntitySummary>;

    async fn canonical_url(&self, id: EntityId) -> Option<String>;

    async fn home_url(&self) -> Option<String> {
        Some("/".to_string())
    }

    /// Public archive for an entity kind, if the kind has one.
    async fn archive_url(&self, kind: &str) -> Option<String>;

    async fn terms(&self, id: EntityId) -> Vec<TermRef>;

    async fn term_url(&self, term: &TermRef) -> Option<String>;

    async fn author_url(&self, author: &str) -> Option<String>;

    /// Home, kind archive, term pages and author archive for `id`.
    async fn resolve_related_urls(&self, id: EntityId) -> RelatedUrlSet {
        let mut related = RelatedUrlSet::new();
        related.push(self.home_url().await);

        let Some(entity) = self.entity(id).await else {
            return related;
        };
        related.push(self.archive_url(&entity.kind).await);
        for term in self.terms(id).await {
            related.push(self.term_url(&term).await);
        }
        if let Some(author) = &entity.author {
            related.push(self.author_url(author).await);
        }
        related
    }
}

/// Lifecycle notification fired once per committed mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ContentEvent {
    Published {
        id: EntityId,
    },
    Deleted {
        id: EntityId,
    },
    Trashed {
        id: EntityId,
    },
    Untrashed {
        id: EntityId,
    },
    StatusChanged {
        id: EntityId,
        old: EntityStatus,
        new: EntityStatus,
    },
}

impl ContentEvent {
    pub fn entity_id(&self) -> EntityId {
        match self {
            ContentEvent::Published { id }
            | ContentEvent::Deleted { id }
            | ContentEvent::Trashed { id }
            | ContentEvent::Untrashed { id }
            | ContentEvent::StatusChanged { id, .. } => *id,
        }
    }

    /// A status change to the same status changes nothing visible.
    pub fn is_noop(&self) -> bool {
        matches!(self, ContentEvent::StatusChanged { old, new, .. } if old == new)
    }

    pub fn label(&self) -> &'static str {
        match self {
            ContentEvent::Published { .. } => "published",
            ContentEvent::Deleted { .. } => "deleted",
            ContentEvent::Trashed { .. } => "trashed",
            ContentEvent::Untrashed { .. } => "untrashed",
            ContentEvent::StatusChanged { .. } => "status_changed",
        }
    }
}

#[async_trait]
pub trait ContentEventListener: Send + Sync {
    async fn on_event(&self, event: &ContentEvent);
}

/// Fan-out of host lifecycle events to subscribed listeners.
#[derive(Default)]
pub struct EventDispatcher {
    listeners: RwLock<Vec<Arc<dyn ContentEventListener>>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, listener: Arc<dyn ContentEventListener>) {
        rw_write(&self.listeners, SOURCE, "subscribe").push(listener);
    }

    pub fn listener_count(&self) -> usize {
        rw_read(&self.listeners, SOURCE, "listener_count").len()
    }

    /// Deliver `event` to every listener in subscription order.
    pub async fn dispatch(&self, event: ContentEvent) {
        let listeners = rw_read(&self.listeners, SOURCE, "dispatch").clone();
        debug!(
            event = event.label(),
            entity_id = %event.entity_id(),
            listeners = listeners.len(),
            "dispatching content event"
        );
        for listener in listeners {
            listener.on_event(&event).await;
        }
    }
}
