//! Content mutations.
//!
//! Every committed change is announced exactly once through the
//! [`EventDispatcher`], after the site has been updated.

use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, info};

use crate::{
    application::error::AppError,
    host::{ContentEvent, EntityId, EntityStatus, EventDispatcher, TermRef},
    site::{Entity, Site},
};

/// Editable fields of an entity.
#[derive(Debug, Clone, Deserialize)]
pub struct EntityInput {
    pub kind: String,
    pub slug: String,
    pub title: String,
    #[serde(default)]
    pub body: String,
    #[serde(default = "draft")]
    pub status: EntityStatus,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub terms: Vec<TermRef>,
    #[serde(default)]
    pub revision_of: Option<EntityId>,
}

fn draft() -> EntityStatus {
    EntityStatus::Draft
}

impl EntityInput {
    fn into_entity(self, id: EntityId) -> Entity {
        Entity {
            id,
            kind: self.kind,
            slug: self.slug,
            title: self.title,
            body: self.body,
            status: self.status,
            author: self.author,
            terms: self.terms,
            revision_of: self.revision_of,
        }
    }
}

pub struct ContentService {
    site: Arc<Site>,
    dispatcher: Arc<EventDispatcher>,
}

impl ContentService {
    pub fn new(site: Arc<Site>, dispatcher: Arc<EventDispatcher>) -> Self {
        Self { site, dispatcher }
    }

    pub fn site(&self) -> &Arc<Site> {
        &self.site
    }

    /// Create or replace the entity `id`.
    pub async fn save(&self, id: EntityId, input: EntityInput) -> Result<Entity, AppError> {
        let entity = input.into_entity(id);
        let previous = self.site.upsert(entity.clone())?;

        let event = match previous.map(|previous| previous.status) {
            _ if entity.status == EntityStatus::Published => Some(ContentEvent::Published { id }),
            Some(old) if old != entity.status => Some(transition_event(id, old, entity.status)),
            _ => None,
        };

        info!(
            entity_id = %id,
            kind = %entity.kind,
            status = %entity.status,
            "entity saved"
        );
        self.announce(event).await;
        Ok(entity)
    }

    /// Move `id` to `status`, returning the status it had before.
    pub async fn set_status(
        &self,
        id: EntityId,
        status: EntityStatus,
    ) -> Result<EntityStatus, AppError> {
        let old = self.site.set_status(id, status)?;
        info!(entity_id = %id, old = %old, new = %status, "entity status changed");
        self.announce(Some(transition_event(id, old, status))).await;
        Ok(old)
    }

    pub async fn delete(&self, id: EntityId) -> Result<Entity, AppError> {
        let entity = self.site.remove(id)?;
        info!(entity_id = %id, "entity deleted");
        self.announce(Some(ContentEvent::Deleted { id })).await;
        Ok(entity)
    }

    async fn announce(&self, event: Option<ContentEvent>) {
        match event {
            Some(event) => self.dispatcher.dispatch(event).await,
            None => debug!("mutation has no public effect; no event fired"),
        }
    }
}

/// Lifecycle event for a status transition.
fn transition_event(id: EntityId, old: EntityStatus, new: EntityStatus) -> ContentEvent {
    match (old, new) {
        (old, new) if old == new => ContentEvent::StatusChanged { id, old, new },
        (_, EntityStatus::Trash) => ContentEvent::Trashed { id },
        (EntityStatus::Trash, _) => ContentEvent::Untrashed { id },
        (_, EntityStatus::Published) => ContentEvent::Published { id },
        (old, new) => ContentEvent::StatusChanged { id, old, new },
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::host::ContentEventListener;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<ContentEvent>>,
    }

    #[async_trait]
    impl ContentEventListener for Recorder {
        async fn on_event(&self, event: &ContentEvent) {
            self.events.lock().expect("events").push(event.clone());
        }
    }

    fn service() -> (ContentService, Arc<Recorder>) {
        let site = Arc::new(Site::new("Notes", vec!["post".into()], Vec::new()).expect("site"));
        let dispatcher = Arc::new(EventDispatcher::new());
        let recorder = Arc::new(Recorder::default());
        dispatcher.subscribe(recorder.clone());
        (ContentService::new(site, dispatcher), recorder)
    }

    fn input(status: EntityStatus) -> EntityInput {
        EntityInput {
            kind: "post".into(),
            slug: "hello".into(),
            title: "Hello".into(),
            body: String::new(),
            status,
            author: None,
            terms: Vec::new(),
            revision_of: None,
        }
    }

    fn events(recorder: &Recorder) -> Vec<ContentEvent> {
        recorder.events.lock().expect("events").clone()
    }

    #[tokio::test]
    async fn new_draft_fires_nothing() {
        let (service, recorder) = service();
        service
            .save(EntityId::new(), input(EntityStatus::Draft))
            .await
            .expect("save");
        assert!(events(&recorder).is_empty());
    }

    #[tokio::test]
    async fn saving_published_content_fires_published() {
        let (service, recorder) = service();
        let id = EntityId::new();
        service.save(id, input(EntityStatus::Published)).await.expect("save");
        service.save(id, input(EntityStatus::Published)).await.expect("save");
        assert_eq!(
            events(&recorder),
            vec![ContentEvent::Published { id }, ContentEvent::Published { id }]
        );
    }

    #[tokio::test]
    async fn status_transitions_map_to_lifecycle_events() {
        let (service, recorder) = service();
        let id = EntityId::new();
        service.save(id, input(EntityStatus::Published)).await.expect("save");

        service.set_status(id, EntityStatus::Trash).await.expect("trash");
        service.set_status(id, EntityStatus::Draft).await.expect("untrash");
        service.set_status(id, EntityStatus::Private).await.expect("private");
        service.set_status(id, EntityStatus::Private).await.expect("same");

        assert_eq!(
            events(&recorder),
            vec![
                ContentEvent::Published { id },
                ContentEvent::Trashed { id },
                ContentEvent::Untrashed { id },
                ContentEvent::StatusChanged {
                    id,
                    old: EntityStatus::Draft,
                    new: EntityStatus::Private
                },
                ContentEvent::StatusChanged {
                    id,
                    old: EntityStatus::Private,
                    new: EntityStatus::Private
                },
            ]
        );
    }

    #[tokio::test]
    async fn delete_fires_after_removal() {
        let (service, recorder) = service();
        let id = EntityId::new();
        service.save(id, input(EntityStatus::Published)).await.expect("save");
        service.delete(id).await.expect("delete");

        assert!(service.site().get(id).is_none());
        assert_eq!(events(&recorder).last(), Some(&ContentEvent::Deleted { id }));
        assert!(matches!(
            service.delete(id).await,
            Err(AppError::Site(crate::site::SiteError::NotFound(_)))
        ));
    }

    #[tokio::test]
    async fn invalid_input_is_rejected_without_event() {
        let (service, recorder) = service();
        let mut bad = input(EntityStatus::Published);
        bad.slug = "Not A Slug".into();
        assert!(matches!(
            service.save(EntityId::new(), bad).await,
            Err(AppError::Site(crate::site::SiteError::Invalid(_)))
        ));
        assert!(events(&recorder).is_empty());
    }
}
