use std::{str::FromStr, time::Duration};

use anyhow::{Context, Result, anyhow};

use crate::currency::CurrencyCode;
use crate::upstream::PayloadFormat;

const DEFAULT_UPSTREAM_URL: &str = "http://www.cbr.ru/scripts/XML_daily.asp";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres,
    Memory,
}

impl FromStr for StoreBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "postgres" => Ok(StoreBackend::Postgres),
            "memory" => Ok(StoreBackend::Memory),
            other => Err(anyhow!("unknown store backend '{other}'")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub backend: StoreBackend,
    pub url: Option<String>,
    pub max_connections: u32,
}

#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    pub url: String,
    pub format: PayloadFormat,
    /// Implied base of XML payloads, which never list it.
    pub upstream_base: CurrencyCode,
    pub timeout: Duration,
    pub retries: u32,
    pub backoff: Duration,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub base_currency: CurrencyCode,
    pub update_interval: Duration,
    pub database: DatabaseConfig,
    pub upstream: UpstreamConfig,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let backend: StoreBackend = parse_or(&lookup, "STORE_BACKEND", StoreBackend::Postgres)?;
        let url = lookup("DATABASE_URL");
        if backend == StoreBackend::Postgres && url.is_none() {
            anyhow::bail!("DATABASE_URL must be set when STORE_BACKEND is postgres");
        }

        let config = Config {
            host: lookup("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: parse_or(&lookup, "PORT", 3000)?,
            base_currency: parse_code_or(&lookup, "BASE_CURRENCY", "USD")?,
            update_interval: Duration::from_secs(parse_or(&lookup, "UPDATE_INTERVAL_SECS", 3600)?),
            database: DatabaseConfig {
                backend,
                url,
                max_connections: parse_or(&lookup, "DATABASE_MAX_CONNECTIONS", 5)?,
            },
            upstream: UpstreamConfig {
                url: lookup("UPSTREAM_URL").unwrap_or_else(|| DEFAULT_UPSTREAM_URL.to_string()),
                format: parse_or(&lookup, "UPSTREAM_FORMAT", PayloadFormat::Auto)?,
                upstream_base: parse_code_or(&lookup, "UPSTREAM_BASE", "RUB")?,
                timeout: Duration::from_secs(parse_or(&lookup, "FETCH_TIMEOUT_SECS", 5)?),
                retries: parse_or::<u32, _>(&lookup, "FETCH_RETRIES", 3)?.max(1),
                backoff: Duration::from_millis(parse_or(&lookup, "FETCH_BACKOFF_MS", 1000)?),
            },
        };

        if config.update_interval.is_zero() {
            anyhow::bail!("UPDATE_INTERVAL_SECS must be greater than zero");
        }

        Ok(config)
    }
}

fn parse_or<T, F>(lookup: &F, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow!("{e}"))
            .with_context(|| format!("invalid value '{raw}' for {key}")),
        None => Ok(default),
    }
}

fn parse_code_or<F>(lookup: &F, key: &str, default: &str) -> Result<CurrencyCode>
where
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(key).unwrap_or_else(|| default.to_string());
    raw.parse()
        .map_err(|e| anyhow!("{e}"))
        .with_context(|| format!("invalid value for {key}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config =
            Config::from_lookup(lookup_from(&[("DATABASE_URL", "postgres://localhost/rates")]))
                .unwrap();

        assert_eq!(config.port, 3000);
        assert_eq!(config.base_currency.as_str(), "USD");
        assert_eq!(config.update_interval, Duration::from_secs(3600));
        assert_eq!(config.database.backend, StoreBackend::Postgres);
        assert_eq!(config.upstream.url, DEFAULT_UPSTREAM_URL);
        assert_eq!(config.upstream.format, PayloadFormat::Auto);
        assert_eq!(config.upstream.upstream_base.as_str(), "RUB");
        assert_eq!(config.upstream.timeout, Duration::from_secs(5));
        assert_eq!(config.upstream.retries, 3);
        assert_eq!(config.upstream.backoff, Duration::from_secs(1));
    }

    #[test]
    fn overrides_are_parsed() {
        let config = Config::from_lookup(lookup_from(&[
            ("STORE_BACKEND", "memory"),
            ("PORT", "8080"),
            ("BASE_CURRENCY", "eur"),
            ("UPSTREAM_FORMAT", "json"),
            ("FETCH_RETRIES", "0"),
            ("FETCH_BACKOFF_MS", "250"),
        ]))
        .unwrap();

        assert_eq!(config.database.backend, StoreBackend::Memory);
        assert_eq!(config.port, 8080);
        assert_eq!(config.base_currency.as_str(), "EUR");
        assert_eq!(config.upstream.format, PayloadFormat::Json);
        assert_eq!(config.upstream.retries, 1);
        assert_eq!(config.upstream.backoff, Duration::from_millis(250));
    }

    #[test]
    fn postgres_requires_database_url() {
        let err = Config::from_lookup(lookup_from(&[])).unwrap_err();
        assert!(err.to_string().contains("DATABASE_URL"));
    }

    #[test]
    fn invalid_value_names_the_variable() {
        let err = Config::from_lookup(lookup_from(&[
            ("STORE_BACKEND", "memory"),
            ("FETCH_TIMEOUT_SECS", "soon"),
        ]))
        .unwrap_err();
        assert!(format!("{err:#}").contains("FETCH_TIMEOUT_SECS"));
    }
}
