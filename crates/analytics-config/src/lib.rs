//! Configuration loading, validation and merging for the analytics backend.
//!
//! Mirrors the original service's `pydantic_settings.BaseSettings`: every
//! field can come from an environment variable, with an optional TOML file
//! providing lower-precedence defaults. Validation separates hard errors
//! (an unusable configuration) from advisory [`ConfigWarning`]s.

use std::path::Path;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {path}")]
    FileNotFound { path: String },
    #[error("failed to parse config: {reason}")]
    ParseError { reason: String },
    #[error("invalid configuration: {}", .reasons.join("; "))]
    ValidationError { reasons: Vec<String> },
    #[error("merge conflict: {reason}")]
    MergeConflict { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigWarning {
    DeprecatedField {
        field: String,
        suggestion: Option<String>,
    },
    MissingOptionalField {
        field: String,
        hint: String,
    },
    InsecureDefault {
        field: String,
    },
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigWarning::DeprecatedField { field, suggestion } => match suggestion {
                Some(s) => write!(f, "field '{field}' is deprecated, use '{s}' instead"),
                None => write!(f, "field '{field}' is deprecated"),
            },
            ConfigWarning::MissingOptionalField { field, hint } => {
                write!(f, "optional field '{field}' is unset: {hint}")
            }
            ConfigWarning::InsecureDefault { field } => {
                write!(f, "field '{field}' is using an insecure default value")
            }
        }
    }
}

/// Minimum acceptable length for `jwt_secret`, matching the original's
/// `SECRET_KEY` validator.
const MIN_SECRET_LEN: usize = 32;

/// Known-insecure placeholder secrets rejected outright.
const INSECURE_SECRETS: &[&str] = &["changeme", "secret", "your-secret-key", "development"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct AppConfig {
    pub bind_addr: String,
    pub database_url: String,
    pub db_pool_size: u32,
    pub db_max_overflow: u32,
    pub redis_url: String,
    pub jwt_secret: String,
    pub jwt_algorithm: String,
    pub access_token_expire_minutes: i64,
    pub refresh_token_expire_days: i64,
    pub ws_ticket_ttl_seconds: u64,
    pub cookie_domain: Option<String>,
    pub cookie_secure: bool,
    pub cookie_samesite: String,
    pub cookie_path: String,
    pub cors_origins: Vec<String>,
    pub rate_limit_per_minute: u32,
    pub login_rate_limit_per_minute: u32,
    pub register_rate_limit_per_minute: u32,
    pub rollup_interval_seconds: u64,
    pub ingest_batch_size: usize,
    pub poll_interval_ms: u64,
    pub log_level: String,
    pub debug: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            bind_addr: "0.0.0.0:8080".into(),
            database_url: "postgres://localhost/analytics".into(),
            db_pool_size: 5,
            db_max_overflow: 10,
            redis_url: "redis://localhost:6379/0".into(),
            jwt_secret: String::new(),
            jwt_algorithm: "HS256".into(),
            access_token_expire_minutes: 30,
            refresh_token_expire_days: 7,
            ws_ticket_ttl_seconds: 30,
            cookie_domain: None,
            cookie_secure: true,
            cookie_samesite: "lax".into(),
            cookie_path: "/".into(),
            cors_origins: Vec::new(),
            rate_limit_per_minute: 60,
            login_rate_limit_per_minute: 10,
            register_rate_limit_per_minute: 5,
            rollup_interval_seconds: 60,
            ingest_batch_size: 200,
            poll_interval_ms: 2000,
            log_level: "info".into(),
            debug: false,
        }
    }
}

/// Load config from an optional TOML file, then apply environment
/// overrides on top. If `path` is `None`, starts from [`AppConfig::default`].
pub fn load_config(path: Option<&Path>) -> Result<AppConfig, ConfigError> {
    let mut config = match path {
        Some(p) => {
            let content = std::fs::read_to_string(p).map_err(|_| ConfigError::FileNotFound {
                path: p.display().to_string(),
            })?;
            parse_toml(&content)?
        }
        None => AppConfig::default(),
    };
    apply_env_overrides(&mut config);
    Ok(config)
}

pub fn parse_toml(content: &str) -> Result<AppConfig, ConfigError> {
    toml::from_str(content).map_err(|e| ConfigError::ParseError {
        reason: e.to_string(),
    })
}

macro_rules! env_override {
    ($config:expr, $field:ident, $var:literal) => {
        if let Ok(val) = std::env::var($var) {
            $config.$field = val;
        }
    };
    ($config:expr, $field:ident, $var:literal, parse) => {
        if let Ok(val) = std::env::var($var) {
            if let Ok(parsed) = val.parse() {
                $config.$field = parsed;
            }
        }
    };
}

/// Apply environment variable overrides on top of an existing config.
///
/// Recognised variables: `BIND_ADDR`, `DATABASE_URL`, `DB_POOL_SIZE`,
/// `DB_MAX_OVERFLOW`, `REDIS_URL`, `JWT_SECRET`, `ACCESS_TOKEN_EXPIRE_MINUTES`,
/// `REFRESH_TOKEN_EXPIRE_DAYS`, `COOKIE_DOMAIN`, `COOKIE_SECURE`,
/// `CORS_ORIGINS` (comma-separated), `RATE_LIMIT_PER_MINUTE`, `LOG_LEVEL`,
/// `DEBUG`.
pub fn apply_env_overrides(config: &mut AppConfig) {
    env_override!(config, bind_addr, "BIND_ADDR");
    env_override!(config, database_url, "DATABASE_URL");
    env_override!(config, db_pool_size, "DB_POOL_SIZE", parse);
    env_override!(config, db_max_overflow, "DB_MAX_OVERFLOW", parse);
    env_override!(config, redis_url, "REDIS_URL");
    env_override!(config, jwt_secret, "JWT_SECRET");
    env_override!(
        config,
        access_token_expire_minutes,
        "ACCESS_TOKEN_EXPIRE_MINUTES",
        parse
    );
    env_override!(
        config,
        refresh_token_expire_days,
        "REFRESH_TOKEN_EXPIRE_DAYS",
        parse
    );
    if let Ok(val) = std::env::var("COOKIE_DOMAIN") {
        config.cookie_domain = Some(val);
    }
    env_override!(config, cookie_secure, "COOKIE_SECURE", parse);
    if let Ok(val) = std::env::var("CORS_ORIGINS") {
        config.cors_origins = val.split(',').map(|s| s.trim().to_string()).collect();
    }
    env_override!(config, rate_limit_per_minute, "RATE_LIMIT_PER_MINUTE", parse);
    env_override!(config, log_level, "LOG_LEVEL");
    env_override!(config, debug, "DEBUG", parse);
}

const VALID_LOG_LEVELS: &[&str] = &["error", "warn", "info", "debug", "trace"];
const VALID_SAMESITE: &[&str] = &["strict", "lax", "none"];

/// Validate a loaded configuration. Hard errors are returned as
/// [`ConfigError::ValidationError`]; soft issues come back as warnings.
pub fn validate_config(config: &AppConfig) -> Result<Vec<ConfigWarning>, ConfigError> {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    if config.jwt_secret.len() < MIN_SECRET_LEN {
        errors.push(format!(
            "jwt_secret must be at least {MIN_SECRET_LEN} characters"
        ));
    } else if INSECURE_SECRETS.contains(&config.jwt_secret.to_lowercase().as_str()) {
        errors.push("jwt_secret must not be a well-known placeholder value".into());
    }

    if !VALID_LOG_LEVELS.contains(&config.log_level.as_str()) {
        errors.push(format!("invalid log_level '{}'", config.log_level));
    }

    if !VALID_SAMESITE.contains(&config.cookie_samesite.as_str()) {
        errors.push(format!(
            "invalid cookie_samesite '{}'",
            config.cookie_samesite
        ));
    }

    if config.cors_origins.is_empty() {
        warnings.push(ConfigWarning::MissingOptionalField {
            field: "cors_origins".into(),
            hint: "no browser-based client will be able to call this API".into(),
        });
    }

    if !config.cookie_secure {
        warnings.push(ConfigWarning::InsecureDefault {
            field: "cookie_secure".into(),
        });
    }

    if config.access_token_expire_minutes <= 0 || config.refresh_token_expire_days <= 0 {
        errors.push("token expiry durations must be positive".into());
    }

    if errors.is_empty() {
        Ok(warnings)
    } else {
        Err(ConfigError::ValidationError { reasons: errors })
    }
}

/// Merge two configurations; fields explicitly set in `overlay` win, with
/// CORS origins and DB/rate-limit numeric knobs taken wholesale from the
/// overlay (this config has no optional fields to merge field-by-field, so
/// this simply mirrors the TOML-then-env-overrides precedence rule in
/// reverse, for config files composed out of multiple layers).
pub fn merge_configs(base: AppConfig, overlay: AppConfig) -> AppConfig {
    let default = AppConfig::default();
    AppConfig {
        bind_addr: pick(&overlay.bind_addr, &base.bind_addr, &default.bind_addr),
        database_url: pick(&overlay.database_url, &base.database_url, &default.database_url),
        redis_url: pick(&overlay.redis_url, &base.redis_url, &default.redis_url),
        jwt_secret: pick(&overlay.jwt_secret, &base.jwt_secret, &default.jwt_secret),
        cors_origins: if overlay.cors_origins.is_empty() {
            base.cors_origins
        } else {
            overlay.cors_origins
        },
        ..overlay
    }
}

fn pick(overlay: &str, base: &str, default: &str) -> String {
    if overlay != default {
        overlay.to_string()
    } else {
        base.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> AppConfig {
        AppConfig {
            jwt_secret: "a".repeat(32),
            cors_origins: vec!["https://example.com".into()],
            ..AppConfig::default()
        }
    }

    #[test]
    fn default_config_fails_validation_without_a_secret() {
        let cfg = AppConfig::default();
        let err = validate_config(&cfg).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError { .. }));
    }

    #[test]
    fn valid_config_passes_with_warnings() {
        let cfg = valid_config();
        let warnings = validate_config(&cfg).unwrap();
        assert!(warnings.is_empty());
    }

    #[test]
    fn short_secret_is_rejected() {
        let cfg = AppConfig {
            jwt_secret: "too-short".into(),
            ..valid_config()
        };
        let err = validate_config(&cfg).unwrap_err();
        match err {
            ConfigError::ValidationError { reasons } => {
                assert!(reasons.iter().any(|r| r.contains("jwt_secret")));
            }
            other => panic!("expected ValidationError, got {other:?}"),
        }
    }

    #[test]
    fn known_placeholder_secret_is_rejected() {
        let cfg = AppConfig {
            jwt_secret: "changeme".into(),
            ..valid_config()
        };
        assert!(validate_config(&cfg).is_err());
    }

    #[test]
    fn empty_cors_origins_produces_warning() {
        let cfg = AppConfig {
            jwt_secret: "a".repeat(32),
            ..AppConfig::default()
        };
        let warnings = validate_config(&cfg).unwrap();
        assert!(
            warnings
                .iter()
                .any(|w| matches!(w, ConfigWarning::MissingOptionalField { .. }))
        );
    }

    #[test]
    fn insecure_cookie_flag_produces_warning() {
        let cfg = AppConfig {
            cookie_secure: false,
            ..valid_config()
        };
        let warnings = validate_config(&cfg).unwrap();
        assert!(
            warnings
                .iter()
                .any(|w| matches!(w, ConfigWarning::InsecureDefault { .. }))
        );
    }

    #[test]
    fn invalid_log_level_is_rejected() {
        let cfg = AppConfig {
            log_level: "verbose".into(),
            ..valid_config()
        };
        assert!(validate_config(&cfg).is_err());
    }

    #[test]
    fn invalid_samesite_is_rejected() {
        let cfg = AppConfig {
            cookie_samesite: "yolo".into(),
            ..valid_config()
        };
        assert!(validate_config(&cfg).is_err());
    }

    #[test]
    fn nonpositive_token_expiry_is_rejected() {
        let cfg = AppConfig {
            access_token_expire_minutes: 0,
            ..valid_config()
        };
        assert!(validate_config(&cfg).is_err());
    }

    #[test]
    fn toml_roundtrip() {
        let cfg = valid_config();
        let serialized = toml::to_string(&cfg).unwrap();
        let deserialized: AppConfig = toml::from_str(&serialized).unwrap();
        assert_eq!(cfg, deserialized);
    }

    #[test]
    fn parse_invalid_toml_gives_parse_error() {
        let err = parse_toml("this is [ not valid =").unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }

    #[test]
    fn load_missing_file_gives_file_not_found() {
        let err = load_config(Some(Path::new("/nonexistent/analytics.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::FileNotFound { .. }));
    }

    #[test]
    fn load_none_returns_default() {
        let cfg = load_config(None).unwrap();
        assert_eq!(cfg.log_level, "info");
    }

    #[test]
    fn load_from_toml_file_applies_file_values_then_env() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(
            &mut file,
            br#"
                bind_addr = "0.0.0.0:9999"
                jwt_secret = "from-file-aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa"
                log_level = "debug"
            "#,
        )
        .unwrap();

        std::env::set_var("LOG_LEVEL", "trace");
        let cfg = load_config(Some(file.path())).unwrap();
        std::env::remove_var("LOG_LEVEL");

        assert_eq!(cfg.bind_addr, "0.0.0.0:9999");
        assert_eq!(cfg.jwt_secret, "from-file-aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa");
        assert_eq!(cfg.log_level, "trace", "env override must win over the file value");
    }

    #[test]
    fn config_warning_display_mentions_field() {
        let w = ConfigWarning::DeprecatedField {
            field: "old_field".into(),
            suggestion: Some("new_field".into()),
        };
        let s = w.to_string();
        assert!(s.contains("old_field"));
        assert!(s.contains("new_field"));
    }

    #[test]
    fn merge_overlay_wins_when_field_was_set() {
        let base = AppConfig {
            bind_addr: "127.0.0.1:9000".into(),
            ..valid_config()
        };
        let overlay = AppConfig {
            bind_addr: "0.0.0.0:8080".into(),
            ..AppConfig::default()
        };
        let merged = merge_configs(base, overlay);
        assert_eq!(merged.bind_addr, "0.0.0.0:8080");
    }
}
