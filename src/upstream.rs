//! Upstream rate sources: payload retrieval with retry, and parsing of the
//! XML (central-bank feed) and JSON (REST rate API) shapes into one form.

use std::{collections::HashMap, str::FromStr, time::Duration};

use async_trait::async_trait;
use log::{debug, info, warn};
use reqwest::Client;
use rust_decimal::{Decimal, prelude::FromPrimitive};
use serde::Deserialize;

use crate::config::UpstreamConfig;
use crate::currency::CurrencyCode;
use crate::error::RateError;
use crate::val_curs::ValCurs;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadFormat {
    Xml,
    Json,
    Auto,
}

impl FromStr for PayloadFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "xml" => Ok(PayloadFormat::Xml),
            "json" => Ok(PayloadFormat::Json),
            "auto" => Ok(PayloadFormat::Auto),
            other => Err(format!("unknown payload format '{other}'")),
        }
    }
}

/// One upstream quote: the value of a single unit of `code` in upstream-base units.
#[derive(Debug, Clone, PartialEq)]
pub struct Quote {
    pub code: CurrencyCode,
    pub value_in_base: Decimal,
}

/// Upstream data in one direction regardless of the wire shape.
#[derive(Debug, Clone, PartialEq)]
pub struct UpstreamQuotes {
    pub base: CurrencyCode,
    pub quotes: Vec<Quote>,
}

#[async_trait]
pub trait RateSource: Send + Sync {
    async fn fetch(&self) -> Result<UpstreamQuotes, RateError>;
}

pub struct HttpRateSource {
    client: Client,
    url: String,
    format: PayloadFormat,
    upstream_base: CurrencyCode,
    retries: u32,
    backoff: Duration,
}

impl HttpRateSource {
    pub fn new(config: &UpstreamConfig) -> Result<Self, RateError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| RateError::UpstreamUnavailable {
                attempts: 0,
                reason: format!("can't build HTTP client: {e}"),
            })?;

        Ok(Self {
            client,
            url: config.url.clone(),
            format: config.format,
            upstream_base: config.upstream_base.clone(),
            retries: config.retries.max(1),
            backoff: config.backoff,
        })
    }

    /// Raw payload, retried with a fixed backoff.
    pub async fn fetch_payload(&self) -> Result<String, RateError> {
        let mut last_error = String::new();

        for attempt in 1..=self.retries {
            debug!("Requesting rates from {} (attempt {attempt})", self.url);
            match self.load_text().await {
                Ok(text) => {
                    info!("Upstream answered on attempt {attempt}");
                    return Ok(text);
                }
                Err(e) => {
                    warn!("Attempt {attempt}/{} failed: {e}", self.retries);
                    last_error = e.to_string();
                    if attempt < self.retries {
                        tokio::time::sleep(self.backoff).await;
                    }
                }
            }
        }

        Err(RateError::UpstreamUnavailable {
            attempts: self.retries,
            reason: last_error,
        })
    }

    async fn load_text(&self) -> anyhow::Result<String> {
        let resp = self.client.get(&self.url).send().await?;
        if !resp.status().is_success() {
            anyhow::bail!("Can't download the rates: {}", resp.status());
        }

        Ok(resp.text().await?)
    }
}

#[async_trait]
impl RateSource for HttpRateSource {
    async fn fetch(&self) -> Result<UpstreamQuotes, RateError> {
        let text = self.fetch_payload().await?;
        parse_payload(&text, self.format, &self.upstream_base)
    }
}

pub fn parse_payload(
    text: &str,
    format: PayloadFormat,
    xml_base: &CurrencyCode,
) -> Result<UpstreamQuotes, RateError> {
    match resolve_format(text, format) {
        PayloadFormat::Json => parse_json(text),
        _ => parse_xml(text, xml_base),
    }
}

fn resolve_format(text: &str, format: PayloadFormat) -> PayloadFormat {
    match format {
        PayloadFormat::Auto if text.trim_start().starts_with('<') => PayloadFormat::Xml,
        PayloadFormat::Auto => PayloadFormat::Json,
        explicit => explicit,
    }
}

/// Central-bank feed: `Value` is the price of `Nominal` units in `base`.
pub fn parse_xml(text: &str, base: &CurrencyCode) -> Result<UpstreamQuotes, RateError> {
    let val_curs: ValCurs =
        quick_xml::de::from_str(text).map_err(|e| RateError::MalformedPayload(e.to_string()))?;
    debug!(
        "Parsed {} Valute entries dated {:?}",
        val_curs.valute.len(),
        val_curs.date
    );

    let mut quotes = Vec::with_capacity(val_curs.valute.len());
    for valute in &val_curs.valute {
        let Ok(code) = valute.char_code.parse::<CurrencyCode>() else {
            warn!("Skipping Valute with bad code '{}'", valute.char_code);
            continue;
        };
        let value = parse_feed_decimal(&valute.value);
        let nominal = parse_feed_decimal(&valute.nominal);
        match (value, nominal) {
            (Some(value), Some(nominal)) if value > Decimal::ZERO && nominal > Decimal::ZERO => {
                quotes.push(Quote {
                    code,
                    value_in_base: value / nominal,
                });
            }
            _ => warn!(
                "Skipping {code}: value '{}' nominal '{}'",
                valute.value, valute.nominal
            ),
        }
    }

    Ok(UpstreamQuotes {
        base: base.clone(),
        quotes,
    })
}

fn parse_feed_decimal(s: &str) -> Option<Decimal> {
    Decimal::from_str(&normalize_decimal_string(s.trim())).ok()
}

fn normalize_decimal_string(s: &str) -> String {
    s.replace(',', ".")
}

#[derive(Debug, Deserialize)]
struct JsonRates {
    #[serde(alias = "base_code")]
    base: String,
    rates: HashMap<String, serde_json::Value>,
}

/// REST rate API: each number is the count of units per one unit of `base`.
pub fn parse_json(text: &str) -> Result<UpstreamQuotes, RateError> {
    let payload: JsonRates =
        serde_json::from_str(text).map_err(|e| RateError::MalformedPayload(e.to_string()))?;
    let base: CurrencyCode = payload
        .base
        .parse()
        .map_err(|_| RateError::MalformedPayload(format!("bad base '{}'", payload.base)))?;

    let mut quotes = Vec::with_capacity(payload.rates.len());
    for (raw_code, raw_rate) in &payload.rates {
        let Ok(code) = raw_code.parse::<CurrencyCode>() else {
            warn!("Skipping rate with bad code '{raw_code}'");
            continue;
        };
        let Some(units_per_base) = raw_rate.as_f64() else {
            warn!("Skipping {code}: rate {raw_rate} is not a number");
            continue;
        };
        let units = Decimal::from_f64(units_per_base).filter(|u| *u > Decimal::ZERO);
        match units.and_then(|u| Decimal::ONE.checked_div(u)) {
            Some(value_in_base) => quotes.push(Quote {
                code,
                value_in_base,
            }),
            None => warn!("Skipping {code}: rate {units_per_base}"),
        }
    }

    Ok(UpstreamQuotes { base, quotes })
}
