//! Whole-page HTTP response cache.
//!
//! The [`cache`] module holds the caching core. [`host`] declares what it
//! needs from a content host, and [`site`] is a small reference host used by
//! the `pagecache` binary.

pub mod application;
pub mod cache;
pub mod config;
pub mod host;
pub mod infra;
pub mod site;
