//! Configuration management

use std::env;

use anyhow::{Context, Result, bail};

use crate::orm::{DEFAULT_PER_PAGE, FilterOperator, MAX_PER_PAGE};

/// Configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// SQLite URL, e.g. `sqlite://./data/app.db` or `sqlite::memory:`
    pub database_url: String,

    /// Maximum pool connections
    pub database_max_connections: u32,

    /// Page size when the request names none
    pub default_page_size: u32,

    /// Upper bound for requested page sizes
    pub max_page_size: u32,

    /// Operators accepted in `field_<op>=value` parameters
    pub filter_operators: Vec<FilterOperator>,

    /// `tracing` filter directive, used when `RUST_LOG` is unset
    pub log_filter: String,

    /// Emit JSON log lines instead of the pretty format
    pub log_json: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: "sqlite::memory:".to_string(),
            database_max_connections: 10,
            default_page_size: DEFAULT_PER_PAGE,
            max_page_size: MAX_PER_PAGE,
            filter_operators: FilterOperator::ALL.to_vec(),
            log_filter: "repokit=info".to_string(),
            log_json: false,
        }
    }
}

impl Config {
    /// Load configuration from the environment (and `.env`, if present)
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary variable source
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let database_max_connections = match var("DATABASE_MAX_CONNECTIONS") {
            Some(v) => v.trim().parse().context("Invalid DATABASE_MAX_CONNECTIONS")?,
            None => defaults.database_max_connections,
        };

        let default_page_size: u32 = match var("DEFAULT_PAGE_SIZE") {
            Some(v) => v.trim().parse().context("Invalid DEFAULT_PAGE_SIZE")?,
            None => defaults.default_page_size,
        };

        let max_page_size: u32 = match var("MAX_PAGE_SIZE") {
            Some(v) => v.trim().parse().context("Invalid MAX_PAGE_SIZE")?,
            None => defaults.max_page_size,
        };

        if default_page_size == 0 || max_page_size == 0 {
            bail!("Page sizes must be positive");
        }
        if default_page_size > max_page_size {
            bail!(
                "DEFAULT_PAGE_SIZE ({}) exceeds MAX_PAGE_SIZE ({})",
                default_page_size,
                max_page_size
            );
        }

        let filter_operators = match var("FILTER_OPERATORS") {
            Some(v) => parse_operators(&v).context("Invalid FILTER_OPERATORS")?,
            None => defaults.filter_operators,
        };

        Ok(Self {
            database_url: var("DATABASE_URL").unwrap_or(defaults.database_url),

            database_max_connections,

            default_page_size,

            max_page_size,

            filter_operators,

            log_filter: var("LOG_FILTER").unwrap_or(defaults.log_filter),

            log_json: var("LOG_JSON")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(defaults.log_json),
        })
    }
}

/// Comma-separated operator tokens; unknown tokens are an error
fn parse_operators(list: &str) -> Result<Vec<FilterOperator>> {
    let mut operators = Vec::new();
    for token in list.split(',').map(str::trim).filter(|t| !t.is_empty()) {
        let op = FilterOperator::parse(token)
            .with_context(|| format!("Unknown filter operator '{token}'"))?;
        if !operators.contains(&op) {
            operators.push(op);
        }
    }
    Ok(operators)
}
