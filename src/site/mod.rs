//! Reference content host.
//!
//! An in-memory set of entities seeded from a TOML file. It routes public
//! paths to rendered pages and implements [`ContentHost`] so the page cache
//! can resolve the URLs affected by a mutation.

mod render;

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cache::lock::{rw_read, rw_write};
use crate::cache::normalize_path;
use crate::host::{ContentHost, EntityId, EntityStatus, EntitySummary, RelatedUrlSet, TermRef};

pub use render::{EntityTemplate, ListingItem, ListingTemplate, render_page};

const SOURCE: &str = "site";

/// Kinds routed directly below the root (`/{slug}`).
const ROOT_KINDS: &[&str] = &["post", "page"];
/// Taxonomies with public term pages.
const ROUTED_TAXONOMIES: &[&str] = &["category", "tag"];
const AUTHOR_SEGMENT: &str = "author";

#[derive(Debug, Error)]
pub enum SiteError {
    #[error("failed to read site content `{path}`: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse site content: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid entity: {0}")]
    Invalid(String),
    #[error("entity `{0}` not found")]
    NotFound(EntityId),
}

impl SiteError {
    fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid(message.into())
    }
}

/// One piece of content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    #[serde(default)]
    pub id: EntityId,
    pub kind: String,
    pub slug: String,
    pub title: String,
    #[serde(default)]
    pub body: String,
    #[serde(default = "default_status")]
    pub status: EntityStatus,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub terms: Vec<TermRef>,
    /// Set on revision snapshots; they are stored but never routed.
    #[serde(default)]
    pub revision_of: Option<EntityId>,
}

fn default_status() -> EntityStatus {
    EntityStatus::Draft
}

impl Entity {
    pub fn is_revision(&self) -> bool {
        self.revision_of.is_some()
    }

    /// Public path of this entity, whether or not it is currently visible.
    pub fn path(&self) -> Option<String> {
        if self.is_revision() {
            return None;
        }
        if ROOT_KINDS.contains(&self.kind.as_str()) {
            Some(format!("/{}", self.slug))
        } else {
            Some(format!("/{}/{}", self.kind, self.slug))
        }
    }

    fn is_visible(&self) -> bool {
        self.status.is_public() && !self.is_revision()
    }

    fn summary(&self) -> EntitySummary {
        EntitySummary {
            id: self.id,
            kind: self.kind.clone(),
            status: self.status,
            author: self.author.clone(),
            is_revision: self.is_revision(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct SiteFile {
    #[serde(default = "default_title")]
    title: String,
    #[serde(default = "default_archives")]
    archives: Vec<String>,
    #[serde(default)]
    entities: Vec<Entity>,
}

fn default_title() -> String {
    "pagecache".to_string()
}

fn default_archives() -> Vec<String> {
    vec!["post".to_string()]
}

/// A routed public page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Page {
    Entity(Entity),
    Listing {
        heading: String,
        items: Vec<ListingItem>,
    },
}

pub struct Site {
    title: String,
    archives: Vec<String>,
    entities: RwLock<BTreeMap<EntityId, Entity>>,
    /// Deleted entities, kept so their URLs still resolve for invalidation.
    tombstones: RwLock<HashMap<EntityId, Entity>>,
    /// Pages that listed an earlier version of an entity but may not list
    /// the current one (old slug, dropped terms, previous author).
    former_urls: RwLock<HashMap<EntityId, BTreeSet<String>>>,
}

impl Site {
    pub fn new(
        title: impl Into<String>,
        archives: Vec<String>,
        entities: Vec<Entity>,
    ) -> Result<Self, SiteError> {
        for kind in &archives {
            validate_segment("archive kind", kind)?;
        }
        let site = Self {
            title: title.into(),
            archives,
            entities: RwLock::new(BTreeMap::new()),
            tombstones: RwLock::new(HashMap::new()),
            former_urls: RwLock::new(HashMap::new()),
        };
        for entity in entities {
            if site.get(entity.id).is_some() {
                return Err(SiteError::invalid(format!(
                    "duplicate entity id `{}`",
                    entity.id
                )));
            }
            site.upsert(entity)?;
        }
        Ok(site)
    }

    pub fn load(path: &Path) -> Result<Self, SiteError> {
        let raw = std::fs::read_to_string(path).map_err(|source| SiteError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, SiteError> {
        let file: SiteFile = toml::from_str(raw)?;
        Self::new(file.title, file.archives, file.entities)
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    /// Live entity by id.
    pub fn get(&self, id: EntityId) -> Option<Entity> {
        rw_read(&self.entities, SOURCE, "get").get(&id).cloned()
    }

    /// Live or deleted entity by id.
    fn lookup(&self, id: EntityId) -> Option<Entity> {
        self.get(id)
            .or_else(|| rw_read(&self.tombstones, SOURCE, "lookup").get(&id).cloned())
    }

    /// Insert or replace an entity, returning the previous version.
    pub fn upsert(&self, entity: Entity) -> Result<Option<Entity>, SiteError> {
        self.validate(&entity)?;

        let mut entities = rw_write(&self.entities, SOURCE, "upsert");
        if let Some(path) = entity.path()
            && let Some(clash) = entities
                .values()
                .find(|other| other.id != entity.id && other.path().as_deref() == Some(path.as_str()))
        {
            return Err(SiteError::invalid(format!(
                "path `{path}` is already used by entity `{}`",
                clash.id
            )));
        }
        if entity.revision_of.is_some()
            && entities
                .get(&entity.id)
                .is_some_and(|existing| existing.revision_of.is_none())
        {
            return Err(SiteError::invalid(format!(
                "entity `{}` is live and cannot become a revision",
                entity.id
            )));
        }
        let previous = entities.insert(entity.id, entity.clone());
        drop(entities);

        rw_write(&self.tombstones, SOURCE, "upsert").remove(&entity.id);
        let mut former_urls = rw_write(&self.former_urls, SOURCE, "upsert");
        match &previous {
            Some(previous) => {
                let current: BTreeSet<String> = self.entity_urls(&entity).into_iter().collect();
                let stale: BTreeSet<String> = self
                    .entity_urls(previous)
                    .into_iter()
                    .filter(|url| !current.contains(url))
                    .collect();
                if stale.is_empty() {
                    former_urls.remove(&entity.id);
                } else {
                    former_urls.insert(entity.id, stale);
                }
            }
            None => {
                former_urls.remove(&entity.id);
            }
        }
        Ok(previous)
    }

    /// Change an entity's status, returning the old status.
    pub fn set_status(&self, id: EntityId, status: EntityStatus) -> Result<EntityStatus, SiteError> {
        let mut entities = rw_write(&self.entities, SOURCE, "set_status");
        let entity = entities.get_mut(&id).ok_or(SiteError::NotFound(id))?;
        Ok(std::mem::replace(&mut entity.status, status))
    }

    /// Remove an entity; its last version is kept as a tombstone.
    pub fn remove(&self, id: EntityId) -> Result<Entity, SiteError> {
        let entity = rw_write(&self.entities, SOURCE, "remove")
            .remove(&id)
            .ok_or(SiteError::NotFound(id))?;
        rw_write(&self.tombstones, SOURCE, "remove").insert(id, entity.clone());
        Ok(entity)
    }

    /// Own path plus archive, term and author pages of one entity version.
    fn entity_urls(&self, entity: &Entity) -> Vec<String> {
        let mut urls = Vec::new();
        urls.extend(entity.path());
        urls.extend(self.archive_path(&entity.kind));
        urls.extend(entity.terms.iter().filter_map(term_path));
        urls.extend(entity.author.as_deref().map(author_path));
        urls
    }

    fn archive_path(&self, kind: &str) -> Option<String> {
        self.archives
            .iter()
            .any(|archive| archive == kind)
            .then(|| format!("/{kind}/"))
    }

    /// Route a request path to a visible page.
    pub fn resolve(&self, target: &str) -> Option<Page> {
        let path = normalize_path(target);
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

        match segments.as_slice() {
            [] => Some(self.listing(self.title.clone(), |entity| entity.kind == "post")),
            [taxonomy, slug] if ROUTED_TAXONOMIES.contains(taxonomy) => {
                let page = self.listing(format!("{taxonomy}: {slug}"), |entity| {
                    entity
                        .terms
                        .iter()
                        .any(|term| term.taxonomy == *taxonomy && term.slug == *slug)
                });
                non_empty_listing(page)
            }
            [AUTHOR_SEGMENT, slug] => {
                let page = self.listing(format!("Author: {slug}"), |entity| {
                    entity.author.as_deref() == Some(*slug)
                });
                non_empty_listing(page)
            }
            [kind] if self.archives.iter().any(|archive| archive == kind) => {
                Some(self.listing(format!("Archive: {kind}"), |entity| entity.kind == *kind))
            }
            _ => self.visible_entity_at(&path).map(Page::Entity),
        }
    }

    fn visible_entity_at(&self, path: &str) -> Option<Entity> {
        rw_read(&self.entities, SOURCE, "resolve")
            .values()
            .find(|entity| entity.is_visible() && entity.path().as_deref() == Some(path))
            .cloned()
    }

    fn listing(&self, heading: String, filter: impl Fn(&Entity) -> bool) -> Page {
        let entities = rw_read(&self.entities, SOURCE, "listing");
        let mut items: Vec<ListingItem> = entities
            .values()
            .filter(|entity| entity.is_visible() && filter(entity))
            .filter_map(|entity| {
                entity.path().map(|url| ListingItem {
                    url,
                    title: entity.title.clone(),
                })
            })
            .collect();
        items.sort_by(|a, b| a.url.cmp(&b.url));
        Page::Listing { heading, items }
    }

    fn validate(&self, entity: &Entity) -> Result<(), SiteError> {
        validate_segment("kind", &entity.kind)?;
        validate_segment("slug", &entity.slug)?;
        if entity.title.trim().is_empty() {
            return Err(SiteError::invalid("title must not be empty"));
        }
        if let Some(author) = &entity.author {
            validate_segment("author", author)?;
        }
        for term in &entity.terms {
            validate_segment("term", &term.slug)?;
        }
        if entity.revision_of == Some(entity.id) {
            return Err(SiteError::invalid("an entity cannot be a revision of itself"));
        }

        if ROOT_KINDS.contains(&entity.kind.as_str()) {
            let slug = entity.slug.as_str();
            let reserved = slug == AUTHOR_SEGMENT
                || slug == crate::cache::ROOT_SEGMENT
                || ROUTED_TAXONOMIES.contains(&slug)
                || self.archives.iter().any(|archive| archive == slug);
            if reserved {
                return Err(SiteError::invalid(format!("slug `{slug}` is reserved")));
            }
        } else if entity.kind == AUTHOR_SEGMENT || ROUTED_TAXONOMIES.contains(&entity.kind.as_str()) {
            return Err(SiteError::invalid(format!(
                "kind `{}` is reserved",
                entity.kind
            )));
        }
        Ok(())
    }
}

fn term_path(term: &TermRef) -> Option<String> {
    ROUTED_TAXONOMIES
        .contains(&term.taxonomy.as_str())
        .then(|| format!("/{}/{}", term.taxonomy, term.slug))
}

fn author_path(author: &str) -> String {
    format!("/{AUTHOR_SEGMENT}/{author}")
}

fn non_empty_listing(page: Page) -> Option<Page> {
    match &page {
        Page::Listing { items, .. } if items.is_empty() => None,
        _ => Some(page),
    }
}

fn validate_segment(field: &str, value: &str) -> Result<(), SiteError> {
    let valid = !value.is_empty()
        && value
            .chars()
            .all(|ch| ch.is_ascii_lowercase() || ch.is_ascii_digit() || ch == '-' || ch == '_');
    if valid {
        Ok(())
    } else {
        Err(SiteError::invalid(format!(
            "{field} `{value}` must be non-empty and use only [a-z0-9_-]"
        )))
    }
}

#[async_trait]
impl ContentHost for Site {
    async fn entity(&self, id: EntityId) -> Option<EntitySummary> {
        self.lookup(id).map(|entity| entity.summary())
    }

    async fn canonical_url(&self, id: EntityId) -> Option<String> {
        self.lookup(id).and_then(|entity| entity.path())
    }

    async fn archive_url(&self, kind: &str) -> Option<String> {
        self.archive_path(kind)
    }

    async fn terms(&self, id: EntityId) -> Vec<TermRef> {
        self.lookup(id).map(|entity| entity.terms).unwrap_or_default()
    }

    async fn term_url(&self, term: &TermRef) -> Option<String> {
        term_path(term)
    }

    async fn author_url(&self, author: &str) -> Option<String> {
        Some(author_path(author))
    }

    /// Home plus the pages of the current and every earlier version.
    async fn resolve_related_urls(&self, id: EntityId) -> RelatedUrlSet {
        let mut related = RelatedUrlSet::new();
        related.push(self.home_url().await);

        let Some(entity) = self.lookup(id) else {
            return related;
        };
        let own = entity.path();
        for url in self.entity_urls(&entity) {
            if Some(&url) != own.as_ref() {
                related.push(Some(url));
            }
        }
        if let Some(former) = rw_read(&self.former_urls, SOURCE, "related").get(&id) {
            for url in former {
                related.push(Some(url.clone()));
            }
        }
        related
    }
}
