use std::{process, sync::Arc};

use pagecache::{
    application::{content::ContentService, error::AppError},
    cache::{
        BackendKind, BackendSelector, CacheConfig, CacheRuntime, PAGE_FILE, RewriteOutcome,
        StorageBackend, TransientStore, derive_key,
    },
    config,
    host::EventDispatcher,
    infra::{
        error::InfraError,
        http::{self, AdminState, HttpState},
        telemetry,
    },
    site::Site,
};
use tokio::try_join;
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::unexpected(format!("failed to load configuration: {err}")))?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
        config::Command::Purge(_) => run_purge(settings).await,
        config::Command::InstallRewrite(_) => run_install_rewrite(settings),
        config::Command::Key(args) => run_key(settings, args),
    }
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let site = Arc::new(Site::load(&settings.site.content)?);
    let dispatcher = Arc::new(EventDispatcher::new());
    let cache = Arc::new(CacheRuntime::new(
        CacheConfig::from(&settings.cache),
        site.clone(),
        &dispatcher,
    ));
    let content = Arc::new(ContentService::new(site.clone(), dispatcher));

    let http_state = HttpState {
        site,
        cache: cache.config().enabled.then(|| cache.state()),
    };
    let admin_state = AdminState { cache, content };

    serve_http(&settings, http_state, admin_state).await
}

async fn serve_http(
    settings: &config::Settings,
    http_state: HttpState,
    admin_state: AdminState,
) -> Result<(), AppError> {
    let public_router = http::build_router(http_state);
    let admin_router = http::build_admin_router(admin_state);

    let public_listener = tokio::net::TcpListener::bind(settings.server.public_addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;
    let admin_listener = tokio::net::TcpListener::bind(settings.server.admin_addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;

    info!(
        public = %settings.server.public_addr,
        admin = %settings.server.admin_addr,
        "listening"
    );

    let public_server = axum::serve(public_listener, public_router.into_make_service());
    let admin_server = axum::serve(admin_listener, admin_router.into_make_service());

    try_join!(public_server, admin_server)
        .map_err(|err| AppError::unexpected(format!("server error: {err}")))?;

    Ok(())
}

async fn run_purge(settings: config::Settings) -> Result<(), AppError> {
    let config = CacheConfig::from(&settings.cache);

    if BackendSelector::preferred_kind(&config) != BackendKind::Static {
        warn!(
            preference = ?config.backend,
            "the transient store lives inside the serving process; use POST /admin/cache/purge"
        );
        return Err(AppError::validation(
            "purge from the command line requires the static backend",
        ));
    }

    BackendSelector::static_store(&config)
        .map_err(|err| AppError::from(InfraError::from(err)))?
        .purge_all()
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;
    info!(static_root = %config.static_root.display(), "static page cache purged");
    Ok(())
}

fn run_install_rewrite(settings: config::Settings) -> Result<(), AppError> {
    let config = CacheConfig::from(&settings.cache);
    let gate = Arc::new(TransientStore::new(config.transient_capacity_non_zero()));
    let installer = BackendSelector::rewrite_installer(&config, gate).ok_or_else(|| {
        AppError::validation("cache.rewrite_target and cache.document_root must both be set")
    })?;

    match installer.install() {
        Ok(RewriteOutcome::Installed) => {
            info!(target_file = %installer.target().display(), "rewrite rules installed");
            Ok(())
        }
        Ok(RewriteOutcome::AlreadyPresent) => {
            info!(target_file = %installer.target().display(), "rewrite rules already present");
            Ok(())
        }
        Err(err) => Err(AppError::unexpected(err.to_string())),
    }
}

fn run_key(settings: config::Settings, args: config::KeyArgs) -> Result<(), AppError> {
    let key = derive_key(&args.path);
    let file = settings
        .cache
        .static_root
        .join(key.static_dir())
        .join(PAGE_FILE);

    println!("path:   {}", key.path());
    println!("key:    {}", key.digest());
    println!("static: {}", file.display());
    Ok(())
}
