//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{
    collections::{BTreeMap, BTreeSet},
    net::SocketAddr,
    path::PathBuf,
    str::FromStr,
    time::Duration,
};

use clap::{Args, Parser, Subcommand, ValueEnum, builder::BoolishValueParser};
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use url::Url;

use crate::application::resolver::PrecedencePolicy;
use crate::domain::bundle::MetaSettings;
use crate::domain::entities::Site;
use crate::domain::types::SiteId;

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "seoforge";
const ENV_PREFIX: &str = "SEOFORGE";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_ADMIN_HOST: &str = "127.0.0.1";
const DEFAULT_PUBLIC_PORT: u16 = 3000;
const DEFAULT_ADMIN_PORT: u16 = 3001;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;
const DEFAULT_ARTIFACT_LIMIT: usize = 1000;
const DEFAULT_AUTO_CONSUME_INTERVAL_MS: u64 = 5000;
const DEFAULT_CONSUME_BATCH_LIMIT: usize = 100;
const DEFAULT_STATE_FLUSH_INTERVAL_SECS: u64 = 60;
const DEFAULT_SITE_LANGUAGE: &str = "en";
pub const DEFAULT_ADMIN_URL: &str = "http://127.0.0.1:3001";

/// Command-line arguments for the seoforge binary.
#[derive(Debug, Parser)]
#[command(name = "seoforge", version, about = "SEO artifact cache service")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "SEOFORGE_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the public and administrative HTTP services.
    Serve(Box<ServeArgs>),
    /// Invalidate and/or evict cached artifacts of a running instance.
    #[command(name = "clear-caches")]
    ClearCaches(ClearCachesArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
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

    /// Override the graceful shutdown timeout.
    #[arg(long = "server-graceful-shutdown-seconds", value_name = "SECONDS")]
    pub server_graceful_shutdown_seconds: Option<u64>,

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

    /// Override the in-memory artifact capacity.
    #[arg(long = "cache-artifact-limit", value_name = "COUNT")]
    pub cache_artifact_limit: Option<usize>,

    /// Override the lifecycle event consumption interval.
    #[arg(long = "cache-auto-consume-interval-ms", value_name = "MILLIS")]
    pub cache_auto_consume_interval_ms: Option<u64>,

    /// Override the state file path.
    #[arg(long = "state-file", value_name = "PATH")]
    pub state_file: Option<PathBuf>,

    /// Override the bundle precedence policy (container_first|site_first).
    #[arg(long = "resolver-precedence", value_name = "POLICY")]
    pub resolver_precedence: Option<String>,
}

#[derive(Debug, Args, Clone)]
pub struct ClearCachesArgs {
    /// Base URL of the administrative listener.
    #[arg(
        long = "admin-url",
        env = "SEOFORGE_ADMIN_URL",
        value_name = "URL",
        default_value = DEFAULT_ADMIN_URL
    )]
    pub admin_url: Url,

    /// What to clear.
    #[arg(long, value_enum, default_value_t = ClearScope::All)]
    pub scope: ClearScope,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ClearScope {
    /// Invalidate then evict.
    All,
    /// Mark artifacts stale; they are rebuilt on next use.
    Invalidate,
    /// Drop every stored artifact.
    Evict,
}

impl ClearScope {
    /// Admin route serving this scope.
    pub fn path(self) -> &'static str {
        match self {
            ClearScope::All => "cache/clear",
            ClearScope::Invalidate => "cache/invalidate",
            ClearScope::Evict => "cache/evict",
        }
    }
}

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub cache: CacheSettings,
    pub state: StateSettings,
    pub resolver: ResolverSettings,
    /// Initial values of the global bundle.
    pub defaults: MetaSettings,
    pub sites: Vec<Site>,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub public_addr: SocketAddr,
    pub admin_addr: SocketAddr,
    pub graceful_shutdown: Duration,
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

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub artifact_limit: usize,
    pub auto_consume_interval_ms: u64,
    pub consume_batch_limit: usize,
}

impl CacheSettings {
    pub fn auto_consume_interval(&self) -> Duration {
        Duration::from_millis(self.auto_consume_interval_ms)
    }
}

#[derive(Debug, Clone)]
pub struct StateSettings {
    /// Snapshot location; state is kept in memory only when unset.
    pub file: Option<PathBuf>,
    pub flush_interval: Duration,
}

#[derive(Debug, Clone, Copy)]
pub struct ResolverSettings {
    pub precedence: PrecedencePolicy,
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

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        Some(Command::ClearCaches(_)) => {}
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    cache: RawCacheSettings,
    state: RawStateSettings,
    resolver: RawResolverSettings,
    defaults: BTreeMap<String, String>,
    sites: Vec<RawSiteSettings>,
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
        if let Some(seconds) = overrides.server_graceful_shutdown_seconds {
            self.server.graceful_shutdown_seconds = Some(seconds);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(limit) = overrides.cache_artifact_limit {
            self.cache.artifact_limit = Some(limit);
        }
        if let Some(interval) = overrides.cache_auto_consume_interval_ms {
            self.cache.auto_consume_interval_ms = Some(interval);
        }
        if let Some(path) = overrides.state_file.as_ref() {
            self.state.file = Some(path.clone());
        }
        if let Some(policy) = overrides.resolver_precedence.as_ref() {
            self.resolver.precedence = Some(policy.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            cache,
            state,
            resolver,
            defaults,
            sites,
        } = raw;

        let server = build_server_settings(server)?;
        let logging = build_logging_settings(logging)?;
        let cache = build_cache_settings(cache)?;
        let state = build_state_settings(state)?;
        let resolver = build_resolver_settings(resolver)?;
        let defaults = MetaSettings::from_pairs(defaults)
            .map_err(|err| LoadError::invalid("defaults", err.to_string()))?;
        let sites = build_sites(sites)?;

        Ok(Self {
            server,
            logging,
            cache,
            state,
            resolver,
            defaults,
            sites,
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
            "public and administrative listeners must not share an address",
        ));
    }

    let graceful_secs = server
        .graceful_shutdown_seconds
        .unwrap_or(DEFAULT_GRACEFUL_SHUTDOWN_SECS);
    if graceful_secs == 0 {
        return Err(LoadError::invalid(
            "server.graceful_shutdown_seconds",
            "must be greater than zero",
        ));
    }

    Ok(ServerSettings {
        public_addr,
        admin_addr,
        graceful_shutdown: Duration::from_secs(graceful_secs),
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
    let artifact_limit = cache.artifact_limit.unwrap_or(DEFAULT_ARTIFACT_LIMIT);
    if artifact_limit == 0 {
        return Err(LoadError::invalid(
            "cache.artifact_limit",
            "must be greater than zero",
        ));
    }
    let auto_consume_interval_ms = cache
        .auto_consume_interval_ms
        .unwrap_or(DEFAULT_AUTO_CONSUME_INTERVAL_MS);
    if auto_consume_interval_ms == 0 {
        return Err(LoadError::invalid(
            "cache.auto_consume_interval_ms",
            "must be greater than zero",
        ));
    }
    let consume_batch_limit = cache
        .consume_batch_limit
        .unwrap_or(DEFAULT_CONSUME_BATCH_LIMIT);
    if consume_batch_limit == 0 {
        return Err(LoadError::invalid(
            "cache.consume_batch_limit",
            "must be greater than zero",
        ));
    }

    Ok(CacheSettings {
        artifact_limit,
        auto_consume_interval_ms,
        consume_batch_limit,
    })
}

fn build_state_settings(state: RawStateSettings) -> Result<StateSettings, LoadError> {
    let file = state.file.filter(|path| !path.as_os_str().is_empty());
    let flush_secs = state
        .flush_interval_seconds
        .unwrap_or(DEFAULT_STATE_FLUSH_INTERVAL_SECS);
    if flush_secs == 0 {
        return Err(LoadError::invalid(
            "state.flush_interval_seconds",
            "must be greater than zero",
        ));
    }
    Ok(StateSettings {
        file,
        flush_interval: Duration::from_secs(flush_secs),
    })
}

fn build_resolver_settings(resolver: RawResolverSettings) -> Result<ResolverSettings, LoadError> {
    let precedence = match resolver.precedence {
        Some(value) => PrecedencePolicy::parse(value.trim()).ok_or_else(|| {
            LoadError::invalid(
                "resolver.precedence",
                format!("`{value}` is not one of container_first, site_first"),
            )
        })?,
        None => PrecedencePolicy::default(),
    };
    Ok(ResolverSettings { precedence })
}

fn build_sites(sites: Vec<RawSiteSettings>) -> Result<Vec<Site>, LoadError> {
    let mut seen = BTreeSet::new();
    let mut built = Vec::with_capacity(sites.len());

    for raw in sites {
        let id = raw
            .id
            .ok_or_else(|| LoadError::invalid("sites.id", "every site needs an id"))?;
        if !seen.insert(id) {
            return Err(LoadError::invalid(
                "sites.id",
                format!("site id {id} is configured twice"),
            ));
        }

        let handle = raw
            .handle
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .ok_or_else(|| LoadError::invalid("sites.handle", format!("site {id} needs a handle")))?;

        let base_url = raw
            .base_url
            .ok_or_else(|| LoadError::invalid("sites.base_url", format!("site {id} needs a base_url")))?;
        let base_url = Url::parse(base_url.trim())
            .map_err(|err| LoadError::invalid("sites.base_url", format!("site {id}: {err}")))?;
        if !matches!(base_url.scheme(), "http" | "https") {
            return Err(LoadError::invalid(
                "sites.base_url",
                format!("site {id}: scheme must be http or https"),
            ));
        }

        built.push(Site {
            id: SiteId::from(id),
            name: raw.name.unwrap_or_else(|| handle.clone()),
            handle,
            base_url,
            language: raw
                .language
                .unwrap_or_else(|| DEFAULT_SITE_LANGUAGE.to_string()),
        });
    }

    Ok(built)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    admin_host: Option<String>,
    public_port: Option<u16>,
    admin_port: Option<u16>,
    graceful_shutdown_seconds: Option<u64>,
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
    artifact_limit: Option<usize>,
    auto_consume_interval_ms: Option<u64>,
    consume_batch_limit: Option<usize>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawStateSettings {
    file: Option<PathBuf>,
    flush_interval_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawResolverSettings {
    precedence: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSiteSettings {
    id: Option<u64>,
    handle: Option<String>,
    name: Option<String>,
    base_url: Option<String>,
    language: Option<String>,
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[cfg(test)]
mod tests;
