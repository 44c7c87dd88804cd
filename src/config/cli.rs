use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};

use crate::cache::BackendChoice;

/// Command-line arguments for the pagecache binary.
#[derive(Debug, Parser)]
#[command(name = "pagecache", version, about = "Whole-page cache in front of a content site")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "PAGECACHE_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the public and administrative HTTP listeners.
    Serve(Box<ServeArgs>),
    /// Remove every cached page from the configured backend.
    Purge(CacheArgs),
    /// Write the front-door rewrite rules now, ignoring the check interval.
    #[command(name = "install-rewrite")]
    InstallRewrite(CacheArgs),
    /// Print the cache key and static file location for a path.
    Key(KeyArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct CacheArgs {
    #[command(flatten)]
    pub cache: CacheOverrides,
}

#[derive(Debug, Args, Clone)]
pub struct KeyArgs {
    #[command(flatten)]
    pub cache: CacheOverrides,

    /// Request path or absolute URL.
    #[arg(value_name = "PATH")]
    pub path: String,
}

#[derive(Debug, Args, Default, Clone)]
pub struct CacheOverrides {
    /// Enable or disable the page cache.
    #[arg(
        long = "cache-enabled",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub enabled: Option<bool>,

    /// Override the storage backend.
    #[arg(long = "cache-backend", value_name = "BACKEND", value_enum)]
    pub backend: Option<BackendChoice>,

    /// Override the front-door server identity used by `auto`.
    #[arg(long = "cache-server-software", value_name = "NAME")]
    pub server_software: Option<String>,

    /// Override the transient entry lifetime.
    #[arg(long = "cache-ttl-seconds", value_name = "SECONDS")]
    pub ttl_seconds: Option<u64>,

    /// Override the static page directory.
    #[arg(long = "cache-static-root", value_name = "PATH", value_hint = ValueHint::DirPath)]
    pub static_root: Option<PathBuf>,

    /// Override the front-door document root.
    #[arg(long = "cache-document-root", value_name = "PATH", value_hint = ValueHint::DirPath)]
    pub document_root: Option<PathBuf>,

    /// Override the file that receives the rewrite rules.
    #[arg(long = "cache-rewrite-target", value_name = "PATH", value_hint = ValueHint::FilePath)]
    pub rewrite_target: Option<PathBuf>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    #[command(flatten)]
    pub cache: CacheOverrides,

    /// Override the public listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the administrative listener host.
    #[arg(long = "server-admin-host", value_name = "HOST")]
    pub server_admin_host: Option<String>,

    /// Override the public listener port.
    #[arg(long = "server-public-port", value_name = "PORT")]
    pub public_port: Option<u16>,

    /// Override the administrative listener port.
    #[arg(long = "server-admin-port", value_name = "PORT")]
    pub admin_port: Option<u16>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,

    /// Override the site content file.
    #[arg(long = "site-content", value_name = "PATH", value_hint = ValueHint::FilePath)]
    pub site_content: Option<PathBuf>,
}
