use askama::Template;
use serde::Serialize;

use super::{Page, ROUTED_TAXONOMIES};

/// A link in a listing page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ListingItem {
    pub url: String,
    pub title: String,
}

#[derive(Template)]
#[template(path = "entity.html")]
pub struct EntityTemplate {
    pub site_title: String,
    pub title: String,
    pub body: String,
    pub author: Option<String>,
    pub terms: Vec<ListingItem>,
}

#[derive(Template)]
#[template(path = "listing.html")]
pub struct ListingTemplate {
    pub site_title: String,
    pub heading: String,
    pub items: Vec<ListingItem>,
}

/// Render a routed page to HTML.
pub fn render_page(site_title: &str, page: &Page) -> Result<String, askama::Error> {
    match page {
        Page::Entity(entity) => EntityTemplate {
            site_title: site_title.to_string(),
            title: entity.title.clone(),
            body: entity.body.clone(),
            author: entity.author.clone(),
            terms: entity
                .terms
                .iter()
                .filter(|term| ROUTED_TAXONOMIES.contains(&term.taxonomy.as_str()))
                .map(|term| ListingItem {
                    url: format!("/{}/{}", term.taxonomy, term.slug),
                    title: term.slug.clone(),
                })
                .collect(),
        }
        .render(),
        Page::Listing { heading, items } => ListingTemplate {
            site_title: site_title.to_string(),
            heading: heading.clone(),
            items: items.clone(),
        }
        .render(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{EntityId, EntityStatus, TermRef};
    use crate::site::Entity;

    #[test]
    fn entity_markup_is_escaped() {
        let page = Page::Entity(Entity {
            id: EntityId::new(),
            kind: "post".into(),
            slug: "x".into(),
            title: "<script>alert(1)</script>".into(),
            body: "a & b".into(),
            status: EntityStatus::Published,
            author: Some("ada".into()),
            terms: vec![TermRef {
                taxonomy: "tag".into(),
                slug: "rust".into(),
            }],
            revision_of: None,
        });

        let html = render_page("Notes", &page).expect("render");
        assert!(html.contains("&lt;script&gt;"));
        assert!(!html.contains("<script>"));
        assert!(html.contains("a &amp; b"));
        assert!(html.contains("/author/ada"));
        assert!(html.contains("/tag/rust"));
    }

    #[test]
    fn empty_listing_renders_placeholder() {
        let page = Page::Listing {
            heading: "Archive: post".into(),
            items: Vec::new(),
        };
        let html = render_page("Notes", &page).expect("render");
        assert!(html.starts_with("<!doctype html>"));
        assert!(html.contains("Nothing here yet."));
    }
}
