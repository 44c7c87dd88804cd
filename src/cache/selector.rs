//! Storage strategy selection.
//!
//! The backend is picked once when the cache is built and stays fixed for
//! the life of the process.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::config::CacheConfig;
use super::rewrite::{RewriteInstaller, RewriteRules, RewriteStatus};
use super::static_files::StaticFileStore;
use super::store::{StorageBackend, StorageError};
use super::transient::{TransientStore, TtlStore};

/// Configured backend preference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum BackendChoice {
    /// Static files when the front door can serve them, transient otherwise.
    #[default]
    Auto,
    Transient,
    Static,
}

/// Backend actually in use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Transient,
    Static,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Transient => f.write_str("transient"),
            BackendKind::Static => f.write_str("static"),
        }
    }
}

/// Resolve a preference against the front-door server identity.
///
/// `auto` picks the static store only for servers known to honour the
/// rewrite directive (Apache).
pub fn detect(choice: BackendChoice, server_software: Option<&str>) -> BackendKind {
    match choice {
        BackendChoice::Transient => BackendKind::Transient,
        BackendChoice::Static => BackendKind::Static,
        BackendChoice::Auto => {
            let apache = server_software
                .is_some_and(|software| software.to_ascii_lowercase().contains("apache"));
            if apache {
                BackendKind::Static
            } else {
                BackendKind::Transient
            }
        }
    }
}

/// The backend chosen at startup, with its rewrite installer when static.
#[derive(Clone)]
pub struct ActiveBackend {
    pub kind: BackendKind,
    pub store: Arc<dyn StorageBackend>,
    pub rewrite: Option<Arc<RewriteInstaller>>,
}

impl ActiveBackend {
    pub fn name(&self) -> &'static str {
        self.store.name()
    }

    pub fn rewrite_status(&self) -> Option<RewriteStatus> {
        self.rewrite.as_ref().map(|installer| installer.status())
    }
}

pub struct BackendSelector;

impl BackendSelector {
    /// Build the backend described by `config`.
    ///
    /// A static root that cannot be created falls back to the transient
    /// store. Rewrite installation is attempted once here when the cache is
    /// enabled; its failure never affects the choice.
    pub fn select(config: &CacheConfig, transient: Arc<TransientStore>) -> ActiveBackend {
        let sniffed = std::env::var("SERVER_SOFTWARE").ok();
        let server_software = config.server_software.as_deref().or(sniffed.as_deref());
        let kind = Self::preferred_kind(config);

        let active = match kind {
            BackendKind::Static => match StaticFileStore::new(&config.static_root) {
                Ok(store) => {
                    let rewrite = Self::rewrite_installer(config, transient.clone());
                    match &rewrite {
                        Some(installer) if config.enabled => {
                            installer.ensure_installed();
                        }
                        Some(installer) => info!(
                            target_file = %installer.target().display(),
                            "page cache disabled; rewrite rules left untouched"
                        ),
                        None => {}
                    }
                    ActiveBackend {
                        kind,
                        store: Arc::new(store),
                        rewrite,
                    }
                }
                Err(err) => {
                    warn!(
                        static_root = %config.static_root.display(),
                        error = %err,
                        "static cache root unusable; falling back to transient store"
                    );
                    Self::transient(config, transient)
                }
            },
            BackendKind::Transient => Self::transient(config, transient),
        };

        info!(
            backend = active.name(),
            preference = ?config.backend,
            server_software = server_software.unwrap_or(""),
            "page cache backend selected"
        );
        active
    }

    /// The backend `config` asks for, before any fallback.
    pub fn preferred_kind(config: &CacheConfig) -> BackendKind {
        let sniffed = std::env::var("SERVER_SOFTWARE").ok();
        detect(
            config.backend,
            config.server_software.as_deref().or(sniffed.as_deref()),
        )
    }

    /// Open the configured static root without selecting a backend or
    /// touching the rewrite target.
    pub fn static_store(config: &CacheConfig) -> Result<StaticFileStore, StorageError> {
        StaticFileStore::new(&config.static_root)
    }

    fn transient(config: &CacheConfig, transient: Arc<TransientStore>) -> ActiveBackend {
        ActiveBackend {
            kind: BackendKind::Transient,
            store: Arc::new(TtlStore::new(transient, config.namespace.clone(), config.ttl())),
            rewrite: None,
        }
    }

    /// Build the rewrite installer when both the target and document root
    /// are configured.
    pub fn rewrite_installer(
        config: &CacheConfig,
        gate: Arc<TransientStore>,
    ) -> Option<Arc<RewriteInstaller>> {
        let (Some(target), Some(document_root)) = (&config.rewrite_target, &config.document_root)
        else {
            info!("no rewrite target configured; static pages are served by the application");
            return None;
        };

        match RewriteRules::new(
            document_root,
            &config.static_root,
            &config.control_prefixes,
            &config.auth_cookie_prefixes,
        ) {
            Ok(rules) => Some(Arc::new(RewriteInstaller::new(
                rules,
                target.clone(),
                gate,
                config.rewrite_check_interval(),
            ))),
            Err(err) => {
                warn!(error = %err, "rewrite rules cannot be rendered");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    fn gate() -> Arc<TransientStore> {
        Arc::new(TransientStore::new(
            std::num::NonZeroUsize::new(16).expect("capacity"),
        ))
    }

    #[test]
    fn auto_detects_apache() {
        assert_eq!(
            detect(BackendChoice::Auto, Some("Apache/2.4.58 (Ubuntu)")),
            BackendKind::Static
        );
        assert_eq!(detect(BackendChoice::Auto, Some("nginx/1.25")), BackendKind::Transient);
        assert_eq!(detect(BackendChoice::Auto, None), BackendKind::Transient);
    }

    #[test]
    fn explicit_choice_wins() {
        assert_eq!(detect(BackendChoice::Static, None), BackendKind::Static);
        assert_eq!(
            detect(BackendChoice::Transient, Some("Apache")),
            BackendKind::Transient
        );
    }

    #[test]
    fn selects_static_with_rewrite() {
        let dir = TempDir::new().expect("tempdir");
        let config = CacheConfig {
            backend: BackendChoice::Static,
            static_root: dir.path().join("cache"),
            document_root: Some(dir.path().to_path_buf()),
            rewrite_target: Some(dir.path().join(".htaccess")),
            ..Default::default()
        };

        let active = BackendSelector::select(&config, gate());
        assert_eq!(active.kind, BackendKind::Static);
        assert_eq!(active.name(), "static");
        assert_eq!(active.rewrite_status(), Some(RewriteStatus::Installed));
    }

    #[test]
    fn disabled_cache_does_not_install_rewrite() {
        let dir = TempDir::new().expect("tempdir");
        let target = dir.path().join(".htaccess");
        let config = CacheConfig {
            enabled: false,
            backend: BackendChoice::Static,
            static_root: dir.path().join("cache"),
            document_root: Some(dir.path().to_path_buf()),
            rewrite_target: Some(target.clone()),
            ..Default::default()
        };

        let active = BackendSelector::select(&config, gate());
        assert_eq!(active.kind, BackendKind::Static);
        assert_eq!(active.rewrite_status(), Some(RewriteStatus::Pending));
        assert!(!target.exists());
    }

    #[tokio::test]
    async fn static_store_purges_without_touching_rewrite() {
        let dir = TempDir::new().expect("tempdir");
        let root = dir.path().join("cache");
        let target = dir.path().join(".htaccess");
        std::fs::create_dir_all(root.join("hello")).expect("page dir");
        std::fs::write(root.join("hello").join("index.html"), "old").expect("page");

        let config = CacheConfig {
            backend: BackendChoice::Static,
            static_root: root.clone(),
            document_root: Some(dir.path().to_path_buf()),
            rewrite_target: Some(target.clone()),
            ..Default::default()
        };
        assert_eq!(BackendSelector::preferred_kind(&config), BackendKind::Static);

        let store = BackendSelector::static_store(&config).expect("static store");
        store.purge_all().await.expect("purge");

        assert!(root.is_dir());
        assert_eq!(std::fs::read_dir(&root).expect("root").count(), 0);
        assert!(!target.exists());
    }

    #[test]
    fn static_store_reports_unusable_root() {
        let dir = TempDir::new().expect("tempdir");
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, "not a directory").expect("write");
        let config = CacheConfig {
            backend: BackendChoice::Static,
            static_root: blocker.join("pages"),
            ..Default::default()
        };

        assert!(BackendSelector::static_store(&config).is_err());
    }

    #[test]
    fn unusable_static_root_falls_back() {
        let dir = TempDir::new().expect("tempdir");
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, "not a directory").expect("write");

        let config = CacheConfig {
            backend: BackendChoice::Static,
            static_root: blocker.join("pages"),
            ..Default::default()
        };

        let active = BackendSelector::select(&config, gate());
        assert_eq!(active.kind, BackendKind::Transient);
        assert!(active.rewrite.is_none());
    }

    #[test]
    fn server_software_override_drives_auto() {
        let dir = TempDir::new().expect("tempdir");
        let config = CacheConfig {
            server_software: Some("Apache".to_string()),
            static_root: dir.path().join("pages"),
            ..Default::default()
        };

        let active = BackendSelector::select(&config, gate());
        assert_eq!(active.kind, BackendKind::Static);
        assert!(active.rewrite.is_none());
    }
}
