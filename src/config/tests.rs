use std::io::Write;

use super::*;
use crate::domain::bundle::MetaField;

fn raw_site(id: u64, base_url: &str) -> RawSiteSettings {
    RawSiteSettings {
        id: Some(id),
        handle: Some(format!("site-{id}")),
        base_url: Some(base_url.to_string()),
        ..Default::default()
    }
}

#[test]
fn cli_overrides_take_highest_precedence() {
    let mut raw = RawSettings::default();
    raw.server.public_port = Some(4000);
    raw.logging.level = Some("info".to_string());

    let overrides = ServeOverrides {
        public_port: Some(4321),
        log_level: Some("debug".to_string()),
        ..Default::default()
    };

    raw.apply_serve_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert_eq!(settings.server.public_addr.port(), 4321);
    assert_eq!(settings.logging.level, LevelFilter::DEBUG);
}

#[test]
fn cache_settings_use_correct_defaults() {
    let settings = Settings::from_raw(RawSettings::default()).expect("valid settings");

    assert_eq!(settings.cache.artifact_limit, 1000);
    assert_eq!(settings.cache.auto_consume_interval_ms, 5000);
    assert_eq!(settings.cache.consume_batch_limit, 100);
    assert_eq!(settings.state.flush_interval, Duration::from_secs(60));
    assert!(settings.state.file.is_none());
    assert_eq!(settings.resolver.precedence, PrecedencePolicy::ContainerFirst);
}

#[test]
fn cli_json_logging_enforces_format() {
    let mut raw = RawSettings::default();
    raw.apply_serve_overrides(&ServeOverrides {
        log_json: Some(true),
        ..Default::default()
    });
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert!(matches!(settings.logging.format, LogFormat::Json));
}

#[test]
fn zero_batch_limit_is_rejected() {
    let mut raw = RawSettings::default();
    raw.cache.consume_batch_limit = Some(0);

    let err = Settings::from_raw(raw).expect_err("zero batch limit");
    assert!(matches!(
        err,
        LoadError::Invalid {
            key: "cache.consume_batch_limit",
            ..
        }
    ));
}

#[test]
fn unknown_precedence_policy_is_rejected() {
    let mut raw = RawSettings::default();
    raw.apply_serve_overrides(&ServeOverrides {
        resolver_precedence: Some("alphabetical".to_string()),
        ..Default::default()
    });

    let err = Settings::from_raw(raw).expect_err("invalid policy");
    assert!(matches!(err, LoadError::Invalid { key: "resolver.precedence", .. }));
}

#[test]
fn sites_are_validated() {
    let mut raw = RawSettings::default();
    raw.sites = vec![raw_site(1, "https://example.com"), raw_site(2, "ftp://example.com")];
    let err = Settings::from_raw(raw).expect_err("ftp scheme");
    assert!(matches!(err, LoadError::Invalid { key: "sites.base_url", .. }));

    let mut raw = RawSettings::default();
    raw.sites = vec![raw_site(1, "https://a.example"), raw_site(1, "https://b.example")];
    let err = Settings::from_raw(raw).expect_err("duplicate id");
    assert!(matches!(err, LoadError::Invalid { key: "sites.id", .. }));
}

#[test]
fn unknown_default_field_is_rejected() {
    let mut raw = RawSettings::default();
    raw.defaults.insert("headline".to_string(), "x".to_string());

    let err = Settings::from_raw(raw).expect_err("unknown field");
    assert!(matches!(err, LoadError::Invalid { key: "defaults", .. }));
}

#[test]
fn config_file_is_loaded_and_overridden_by_cli() {
    let mut file = tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .expect("temp config");
    writeln!(
        file,
        r#"
[server]
public_port = 8080

[resolver]
precedence = "site_first"

[defaults]
robots = "noindex"
og_type = "article"

[[sites]]
id = 1
handle = "default"
name = "Example"
base_url = "https://example.com"
language = "en-GB"
"#
    )
    .expect("write config");

    let path = file.path().to_string_lossy().into_owned();
    let cli = CliArgs::parse_from([
        "seoforge",
        "--config-file",
        path.as_str(),
        "serve",
        "--server-public-port",
        "9090",
    ]);
    let settings = load(&cli).expect("load settings");

    assert_eq!(settings.server.public_addr.port(), 9090);
    assert_eq!(settings.resolver.precedence, PrecedencePolicy::SiteFirst);
    assert_eq!(settings.defaults.get(MetaField::Robots), Some("noindex"));
    assert_eq!(settings.sites.len(), 1);
    assert_eq!(settings.sites[0].name, "Example");
    assert_eq!(settings.sites[0].language, "en-GB");
}

#[test]
fn default_to_serve_command() {
    let args = CliArgs::parse_from(["seoforge"]);
    let command = args
        .command
        .unwrap_or(Command::Serve(Box::<ServeArgs>::default()));
    assert!(matches!(command, Command::Serve(_)));
}

#[test]
fn parse_clear_caches_arguments() {
    let args = CliArgs::parse_from([
        "seoforge",
        "clear-caches",
        "--admin-url",
        "http://10.0.0.5:3001",
        "--scope",
        "evict",
    ]);

    match args.command.expect("clear-caches command") {
        Command::ClearCaches(clear) => {
            assert_eq!(clear.admin_url.as_str(), "http://10.0.0.5:3001/");
            assert_eq!(clear.scope, ClearScope::Evict);
            assert_eq!(clear.scope.path(), "cache/evict");
        }
        _ => panic!("wrong command parsed"),
    }
}

#[test]
fn parse_serve_overrides() {
    let args = CliArgs::parse_from([
        "seoforge",
        "serve",
        "--server-host",
        "0.0.0.0",
        "--state-file",
        "/var/lib/seoforge/state.toml",
    ]);

    match args.command.expect("serve command") {
        Command::Serve(serve) => {
            assert_eq!(serve.overrides.server_host.as_deref(), Some("0.0.0.0"));
            assert_eq!(
                serve.overrides.state_file.as_deref(),
                Some(std::path::Path::new("/var/lib/seoforge/state.toml"))
            );
        }
        _ => panic!("wrong command parsed"),
    }
}
