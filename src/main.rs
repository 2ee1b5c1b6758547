use std::{future::Future, process, sync::Arc, time::Duration};

use seoforge::{
    application::{
        error::AppError,
        render::StandardRenderer,
        runtime::{RuntimeOptions, SeoRuntime},
    },
    cache::CacheConfig,
    config,
    infra::{
        error::InfraError,
        http::{self, AdminState, HttpState},
        telemetry,
    },
};
use tokio::{sync::watch, task::JoinHandle, try_join};
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
        config::Command::ClearCaches(args) => run_clear_caches(args).await,
    }
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    if settings.sites.is_empty() {
        return Err(AppError::from(InfraError::configuration(
            "at least one [[sites]] entry is required",
        )));
    }

    let runtime = SeoRuntime::new(
        RuntimeOptions {
            cache: CacheConfig::from(&settings.cache),
            defaults: settings.defaults.clone(),
            precedence: settings.resolver.precedence,
            sites: settings.sites.clone(),
        },
        Arc::new(StandardRenderer::new()),
    );

    if let Some(path) = settings.state.file.as_deref() {
        let restored = runtime.restore_from(path)?;
        info!(path = %path.display(), restored, "State file checked");
    }
    let seeded = runtime.seed_sites();
    info!(
        sites = settings.sites.len(),
        seeded,
        precedence = ?settings.resolver.precedence,
        "SEO runtime ready"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let consume_handle = spawn_consumer(&runtime, settings.cache.auto_consume_interval());
    let flush_handle = settings
        .state
        .file
        .clone()
        .map(|path| spawn_state_flush(&runtime, path, settings.state.flush_interval));
    let signal_handle = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received");
        }
        let _ = shutdown_tx.send(true);
    });

    let result = serve_http(
        &settings,
        HttpState::from_runtime(&runtime),
        AdminState::from_runtime(&runtime),
        shutdown_rx,
    )
    .await;

    signal_handle.abort();
    consume_handle.abort();
    let _ = consume_handle.await;
    if let Some(handle) = flush_handle {
        handle.abort();
        let _ = handle.await;
    }

    let drained = runtime.consumer.consume_all().await;
    if !drained.is_empty() {
        info!(
            processed = drained.processed,
            failed = drained.failed,
            "Queued events drained at shutdown"
        );
    }
    if let Some(path) = settings.state.file.as_deref() {
        runtime.flush_to(path)?;
        info!(path = %path.display(), "State flushed");
    }

    result
}

fn spawn_consumer(runtime: &SeoRuntime, period: Duration) -> JoinHandle<()> {
    let consumer = Arc::clone(&runtime.consumer);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.tick().await; // Skip the first immediate tick
        loop {
            interval.tick().await;
            consumer.consume().await;
        }
    })
}

fn spawn_state_flush(
    runtime: &SeoRuntime,
    path: std::path::PathBuf,
    period: Duration,
) -> JoinHandle<()> {
    let runtime = runtime.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.tick().await;
        loop {
            interval.tick().await;
            if let Err(err) = runtime.flush_to(&path) {
                warn!(path = %path.display(), error = %err, "State flush failed");
            }
        }
    })
}

async fn serve_http(
    settings: &config::Settings,
    http_state: HttpState,
    admin_state: AdminState,
    shutdown: watch::Receiver<bool>,
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
        public_addr = %settings.server.public_addr,
        admin_addr = %settings.server.admin_addr,
        "Listening"
    );

    let public_server = axum::serve(public_listener, public_router.into_make_service())
        .with_graceful_shutdown(shutdown_requested(shutdown.clone()));
    let admin_server = axum::serve(admin_listener, admin_router.into_make_service())
        .with_graceful_shutdown(shutdown_requested(shutdown.clone()));
    let servers = async { try_join!(public_server, admin_server) };

    tokio::select! {
        result = servers => {
            result.map_err(|err| AppError::unexpected(format!("server error: {err}")))?;
        }
        _ = drain_deadline(shutdown, settings.server.graceful_shutdown) => {
            warn!(
                timeout_secs = settings.server.graceful_shutdown.as_secs(),
                "Graceful shutdown timed out; closing open connections"
            );
        }
    }

    Ok(())
}

fn shutdown_requested(mut shutdown: watch::Receiver<bool>) -> impl Future<Output = ()> {
    async move {
        let _ = shutdown.wait_for(|stop| *stop).await;
    }
}

async fn drain_deadline(shutdown: watch::Receiver<bool>, grace: Duration) {
    shutdown_requested(shutdown).await;
    tokio::time::sleep(grace).await;
}

async fn run_clear_caches(args: config::ClearCachesArgs) -> Result<(), AppError> {
    let endpoint = args
        .admin_url
        .join(args.scope.path())
        .map_err(|err| AppError::validation(format!("invalid admin url: {err}")))?;

    let response = reqwest::Client::new()
        .post(endpoint.clone())
        .send()
        .await
        .and_then(|response| response.error_for_status())
        .map_err(|err| AppError::unexpected(format!("clear-caches request failed: {err}")))?;
    let body = response
        .text()
        .await
        .map_err(|err| AppError::unexpected(format!("failed to read response: {err}")))?;

    info!(endpoint = %endpoint, scope = ?args.scope, response = %body, "Caches cleared");
    println!("{body}");
    Ok(())
}
