use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use tracing::{info, warn};

use crate::db::DEFAULT_MAX_CHAIN_DEPTH;
use crate::error::AppError;

pub fn load_environment() -> Result<(), Box<dyn std::error::Error>> {
    let is_production =
        dotenvy::var("FORMATION_PROFILE").unwrap_or("development".to_string()) == "production";

    let env_files = if is_production {
        vec!["config/common.env", "config/prod.env", ".secrets.env"]
    } else {
        vec!["config/common.env", "config/dev.env", ".secrets.env"]
    };

    for env_file in env_files {
        load_env_file(env_file)?;
    }

    Ok(())
}

fn load_env_file(path: &str) -> Result<(), Box<dyn std::error::Error>> {
    if !Path::new(path).exists() {
        warn!("Warning: Environment file {} not found, skipping", path);
        return Ok(());
    }

    dotenvy::from_filename_override(path)?;
    info!("Loaded environment from: {}", path);
    Ok(())
}

fn parse_var<T: FromStr>(key: &str) -> Result<Option<T>, AppError> {
    match dotenvy::var(key) {
        Ok(raw) if raw.trim().is_empty() => Ok(None),
        Ok(raw) => raw.trim().parse::<T>().map(Some).map_err(|_| {
            AppError::validation(key, format!("Could not parse {} from {:?}", key, raw))
        }),
        Err(_) => Ok(None),
    }
}

fn parse_flag(key: &str) -> Result<bool, AppError> {
    match dotenvy::var(key).ok().as_deref().map(str::trim) {
        None | Some("") => Ok(false),
        Some("1" | "true" | "yes" | "on") => Ok(true),
        Some("0" | "false" | "no" | "off") => Ok(false),
        Some(other) => Err(AppError::validation(
            key,
            format!("Expected a boolean for {}, got {:?}", key, other),
        )),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServiceConfig {
    pub database_url: String,
    /// Re-sharing with an existing club, team or age group is a conflict instead of a no-op.
    pub strict_sharing: bool,
    pub write_deadline: Option<Duration>,
    pub max_chain_depth: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite::memory:".to_string(),
            strict_sharing: false,
            write_deadline: None,
            max_chain_depth: DEFAULT_MAX_CHAIN_DEPTH,
        }
    }
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let defaults = Self::default();

        let max_chain_depth = parse_var::<usize>("FORMATION_MAX_CHAIN_DEPTH")?
            .unwrap_or(defaults.max_chain_depth);
        if max_chain_depth == 0 {
            return Err(AppError::validation(
                "FORMATION_MAX_CHAIN_DEPTH",
                "FORMATION_MAX_CHAIN_DEPTH must be at least 1",
            ));
        }

        Ok(Self {
            database_url: dotenvy::var("DATABASE_URL").unwrap_or(defaults.database_url),
            strict_sharing: parse_flag("FORMATION_STRICT_SHARING")?,
            write_deadline: parse_var::<u64>("FORMATION_WRITE_DEADLINE_MS")?
                .map(Duration::from_millis),
            max_chain_depth,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryConfig {
    /// No exporter is installed without an endpoint.
    pub otlp_endpoint: Option<String>,
    pub api_key: Option<String>,
    pub environment: String,
}

impl TelemetryConfig {
    pub fn from_env() -> Self {
        Self {
            otlp_endpoint: dotenvy::var("OTEL_EXPORTER_OTLP_ENDPOINT")
                .ok()
                .filter(|v| !v.is_empty()),
            api_key: dotenvy::var("OTEL_API_KEY").ok().filter(|v| !v.is_empty()),
            environment: dotenvy::var("DEPLOYMENT_ENVIRONMENT")
                .unwrap_or("develop".to_string()),
        }
    }
}
