//! Pipeline configuration resolved from `CREDIT_ETL_*` environment variables,
//! with per-run CLI overrides applied by the orchestrator binary.

use std::env;
use std::path::PathBuf;

use chrono::NaiveDate;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EtlConfig {
    pub source_db: PathBuf,
    pub target_db: PathBuf,
    pub applications_table: String,
    pub previous_applications_table: String,
    pub installments_table: String,
    pub features_table: String,
    pub state_path: PathBuf,
    pub chunk_size: usize,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
    pub row_limit: Option<u64>,
    pub dry_run: bool,
    pub full_refresh: bool,
    pub since_override: Option<NaiveDate>,
}

impl Default for EtlConfig {
    fn default() -> Self {
        Self {
            source_db: PathBuf::from("data/credit_source.sqlite"),
            target_db: PathBuf::from("data/credit_features.sqlite"),
            applications_table: "applications".to_string(),
            previous_applications_table: "previous_applications".to_string(),
            installments_table: "installments".to_string(),
            features_table: "features_credit_risk".to_string(),
            state_path: PathBuf::from("data/etl_state.json"),
            chunk_size: 50_000,
            max_retries: 3,
            retry_backoff_ms: 3_000,
            row_limit: None,
            dry_run: false,
            full_refresh: false,
            since_override: None,
        }
    }
}

/// Builds the config from the environment. Unset or unparseable variables
/// fall back to the defaults.
pub fn etl_config_from_env() -> EtlConfig {
    let mut config = EtlConfig::default();

    if let Some(path) = env_path("CREDIT_ETL_SOURCE_DB") {
        config.source_db = path;
    }
    if let Some(path) = env_path("CREDIT_ETL_TARGET_DB") {
        config.target_db = path;
    }
    if let Some(path) = env_path("CREDIT_ETL_STATE_PATH") {
        config.state_path = path;
    }
    if let Some(table) = env_string("CREDIT_ETL_APPLICATIONS_TABLE") {
        config.applications_table = table;
    }
    if let Some(table) = env_string("CREDIT_ETL_PREVIOUS_APPLICATIONS_TABLE") {
        config.previous_applications_table = table;
    }
    if let Some(table) = env_string("CREDIT_ETL_INSTALLMENTS_TABLE") {
        config.installments_table = table;
    }
    if let Some(table) = env_string("CREDIT_ETL_FEATURES_TABLE") {
        config.features_table = table;
    }
    if let Some(chunk_size) = env_parse::<usize>("CREDIT_ETL_CHUNK_SIZE") {
        if chunk_size > 0 {
            config.chunk_size = chunk_size;
        }
    }
    if let Some(max_retries) = env_parse::<u32>("CREDIT_ETL_MAX_RETRIES") {
        if max_retries > 0 {
            config.max_retries = max_retries;
        }
    }
    if let Some(backoff) = env_parse::<u64>("CREDIT_ETL_RETRY_BACKOFF_MS") {
        config.retry_backoff_ms = backoff;
    }
    if let Some(limit) = env_parse::<u64>("CREDIT_ETL_ROW_LIMIT") {
        config.row_limit = Some(limit);
    }

    config
}

fn env_string(key: &str) -> Option<String> {
    let raw = env::var(key).ok()?;
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn env_path(key: &str) -> Option<PathBuf> {
    env_string(key).map(PathBuf::from)
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env_string(key)?.parse().ok()
}
