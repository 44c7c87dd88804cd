//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{
    net::SocketAddr,
    num::{NonZeroU64, NonZeroUsize},
    path::PathBuf,
    str::FromStr,
};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::cache::{BackendChoice, MAX_LIFETIME_SECONDS};

mod cli;

pub use cli::{CacheArgs, CacheOverrides, CliArgs, Command, KeyArgs, ServeArgs, ServeOverrides};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "pagecache";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_ADMIN_HOST: &str = "127.0.0.1";
const DEFAULT_PUBLIC_PORT: u16 = 3000;
const DEFAULT_ADMIN_PORT: u16 = 3001;
const DEFAULT_SITE_CONTENT: &str = "config/site.toml";

#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub cache: CacheSettings,
    pub site: SiteSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub public_addr: SocketAddr,
    pub admin_addr: SocketAddr,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

/// Validated `[cache]` table.
#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub enabled: bool,
    pub backend: BackendChoice,
    pub server_software: Option<String>,
    pub ttl_seconds: NonZeroU64,
    pub namespace: String,
    pub transient_capacity: NonZeroUsize,
    pub static_root: PathBuf,
    pub document_root: Option<PathBuf>,
    pub rewrite_target: Option<PathBuf>,
    pub rewrite_check_seconds: u64,
    pub write_cooldown_seconds: u64,
    pub max_body_bytes: NonZeroUsize,
    pub control_prefixes: Vec<String>,
    pub api_prefixes: Vec<String>,
    pub auth_cookie_prefixes: Vec<String>,
    pub asset_extensions: Vec<String>,
    pub consume_batch_limit: NonZeroUsize,
}

#[derive(Debug, Clone)]
pub struct SiteSettings {
    pub content: PathBuf,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(
        Environment::with_prefix("PAGECACHE")
            .separator("__")
            .list_separator(",")
            .with_list_parse_key("cache.control_prefixes")
            .with_list_parse_key("cache.api_prefixes")
            .with_list_parse_key("cache.auth_cookie_prefixes")
            .with_list_parse_key("cache.asset_extensions")
            .try_parsing(true),
    );

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        Some(Command::Purge(args)) | Some(Command::InstallRewrite(args)) => {
            raw.apply_cache_overrides(&args.cache)
        }
        Some(Command::Key(args)) => raw.apply_cache_overrides(&args.cache),
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    cache: RawCacheSettings,
    site: RawSiteSettings,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(host) = overrides.server_admin_host.as_ref() {
            self.server.admin_host = Some(host.clone());
        }
        if let Some(port) = overrides.public_port {
            self.server.public_port = Some(port);
        }
        if let Some(port) = overrides.admin_port {
            self.server.admin_port = Some(port);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(content) = overrides.site_content.as_ref() {
            self.site.content = Some(content.clone());
        }

        self.apply_cache_overrides(&overrides.cache);
    }

    fn apply_cache_overrides(&mut self, overrides: &CacheOverrides) {
        if let Some(enabled) = overrides.enabled {
            self.cache.enabled = Some(enabled);
        }
        if let Some(backend) = overrides.backend {
            self.cache.backend = Some(backend);
        }
        if let Some(software) = overrides.server_software.as_ref() {
            self.cache.server_software = Some(software.clone());
        }
        if let Some(ttl) = overrides.ttl_seconds {
            self.cache.ttl_seconds = Some(ttl);
        }
        if let Some(root) = overrides.static_root.as_ref() {
            self.cache.static_root = Some(root.clone());
        }
        if let Some(root) = overrides.document_root.as_ref() {
            self.cache.document_root = Some(root.clone());
        }
        if let Some(target) = overrides.rewrite_target.as_ref() {
            self.cache.rewrite_target = Some(target.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            cache,
            site,
        } = raw;

        Ok(Self {
            server: build_server_settings(server)?,
            logging: build_logging_settings(logging)?,
            cache: build_cache_settings(cache)?,
            site: build_site_settings(site)?,
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());
    let admin_host = server
        .admin_host
        .unwrap_or_else(|| DEFAULT_ADMIN_HOST.to_string());

    let public_port = server.public_port.unwrap_or(DEFAULT_PUBLIC_PORT);
    if public_port == 0 {
        return Err(LoadError::invalid(
            "server.public_port",
            "port must be greater than zero",
        ));
    }

    let admin_port = server.admin_port.unwrap_or(DEFAULT_ADMIN_PORT);
    if admin_port == 0 {
        return Err(LoadError::invalid(
            "server.admin_port",
            "port must be greater than zero",
        ));
    }

    let public_addr = parse_socket_addr(&host, public_port)
        .map_err(|reason| LoadError::invalid("server.public_addr", reason))?;
    let admin_addr = parse_socket_addr(&admin_host, admin_port)
        .map_err(|reason| LoadError::invalid("server.admin_addr", reason))?;
    if public_addr == admin_addr {
        return Err(LoadError::invalid(
            "server.admin_port",
            "public and admin listeners must not share an address",
        ));
    }

    Ok(ServerSettings {
        public_addr,
        admin_addr,
    })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let defaults = crate::cache::CacheConfig::default();

    let ttl_seconds = NonZeroU64::new(lifetime_seconds(
        cache.ttl_seconds.unwrap_or(defaults.ttl_seconds),
        "cache.ttl_seconds",
    )?)
    .ok_or_else(|| LoadError::invalid("cache.ttl_seconds", "must be greater than zero"))?;

    let namespace = cache.namespace.unwrap_or(defaults.namespace);
    if namespace.trim().is_empty() {
        return Err(LoadError::invalid(
            "cache.namespace",
            "namespace must not be empty",
        ));
    }

    let static_root = cache.static_root.unwrap_or(defaults.static_root);
    if static_root.as_os_str().is_empty() {
        return Err(LoadError::invalid(
            "cache.static_root",
            "path must not be empty",
        ));
    }

    let control_prefixes = path_prefixes(
        cache.control_prefixes.unwrap_or(defaults.control_prefixes),
        "cache.control_prefixes",
    )?;
    let api_prefixes = path_prefixes(
        cache.api_prefixes.unwrap_or(defaults.api_prefixes),
        "cache.api_prefixes",
    )?;

    Ok(CacheSettings {
        enabled: cache.enabled.unwrap_or(defaults.enabled),
        backend: cache.backend.unwrap_or(defaults.backend),
        server_software: cache
            .server_software
            .and_then(|value| non_blank(&value))
            .or(defaults.server_software),
        ttl_seconds,
        namespace,
        transient_capacity: non_zero_usize(
            cache.transient_capacity.unwrap_or(defaults.transient_capacity),
            "cache.transient_capacity",
        )?,
        static_root,
        document_root: cache.document_root.filter(|path| !path.as_os_str().is_empty()),
        rewrite_target: cache.rewrite_target.filter(|path| !path.as_os_str().is_empty()),
        rewrite_check_seconds: lifetime_seconds(
            cache
                .rewrite_check_seconds
                .unwrap_or(defaults.rewrite_check_seconds),
            "cache.rewrite_check_seconds",
        )?,
        write_cooldown_seconds: lifetime_seconds(
            cache
                .write_cooldown_seconds
                .unwrap_or(defaults.write_cooldown_seconds),
            "cache.write_cooldown_seconds",
        )?,
        max_body_bytes: non_zero_usize(
            cache.max_body_bytes.unwrap_or(defaults.max_body_bytes),
            "cache.max_body_bytes",
        )?,
        control_prefixes,
        api_prefixes,
        auth_cookie_prefixes: cache
            .auth_cookie_prefixes
            .unwrap_or(defaults.auth_cookie_prefixes)
            .iter()
            .filter_map(|prefix| non_blank(prefix))
            .collect(),
        asset_extensions: cache
            .asset_extensions
            .unwrap_or(defaults.asset_extensions)
            .iter()
            .filter_map(|ext| non_blank(ext.trim_start_matches('.')))
            .collect(),
        consume_batch_limit: non_zero_usize(
            cache.consume_batch_limit.unwrap_or(defaults.consume_batch_limit),
            "cache.consume_batch_limit",
        )?,
    })
}

fn build_site_settings(site: RawSiteSettings) -> Result<SiteSettings, LoadError> {
    let content = site
        .content
        .unwrap_or_else(|| PathBuf::from(DEFAULT_SITE_CONTENT));
    if content.as_os_str().is_empty() {
        return Err(LoadError::invalid("site.content", "path must not be empty"));
    }
    Ok(SiteSettings { content })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    admin_host: Option<String>,
    public_port: Option<u16>,
    admin_port: Option<u16>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    enabled: Option<bool>,
    backend: Option<BackendChoice>,
    server_software: Option<String>,
    ttl_seconds: Option<u64>,
    namespace: Option<String>,
    transient_capacity: Option<usize>,
    static_root: Option<PathBuf>,
    document_root: Option<PathBuf>,
    rewrite_target: Option<PathBuf>,
    rewrite_check_seconds: Option<u64>,
    write_cooldown_seconds: Option<u64>,
    max_body_bytes: Option<usize>,
    control_prefixes: Option<Vec<String>>,
    api_prefixes: Option<Vec<String>>,
    auth_cookie_prefixes: Option<Vec<String>>,
    asset_extensions: Option<Vec<String>>,
    consume_batch_limit: Option<usize>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSiteSettings {
    content: Option<PathBuf>,
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

fn non_zero_usize(value: usize, key: &'static str) -> Result<NonZeroUsize, LoadError> {
    NonZeroUsize::new(value).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

fn lifetime_seconds(value: u64, key: &'static str) -> Result<u64, LoadError> {
    if value > MAX_LIFETIME_SECONDS {
        return Err(LoadError::invalid(
            key,
            format!("must not exceed {MAX_LIFETIME_SECONDS} seconds"),
        ));
    }
    Ok(value)
}

fn non_blank(value: &str) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn path_prefixes(values: Vec<String>, key: &'static str) -> Result<Vec<String>, LoadError> {
    let mut prefixes = Vec::with_capacity(values.len());
    for value in values {
        let Some(prefix) = non_blank(&value) else {
            continue;
        };
        if !prefix.starts_with('/') {
            return Err(LoadError::invalid(
                key,
                format!("prefix `{prefix}` must start with `/`"),
            ));
        }
        prefixes.push(prefix);
    }
    Ok(prefixes)
}
