use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{NaiveDateTime, Utc};
use log::debug;
use rust_decimal::Decimal;
use tokio::sync::RwLock;

use super::RateStore;
use crate::error::RateError;
use crate::exchange_rate::{ExchangeRate, NewExchangeRate};

/// In-process store with the same constraints as the Postgres schema.
#[derive(Default)]
pub struct MemoryRateStore {
    rows: RwLock<BTreeMap<(String, NaiveDateTime), ExchangeRate>>,
}

impl MemoryRateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored snapshots.
    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }

    /// True when nothing has been stored yet.
    pub async fn is_empty(&self) -> bool {
        self.rows.read().await.is_empty()
    }
}

fn check_row(rate: &NewExchangeRate) -> Result<(), RateError> {
    if rate.currency_code.len() != 3 {
        return Err(RateError::Transaction(format!(
            "currency code '{}' doesn't fit VARCHAR(3)",
            rate.currency_code
        )));
    }
    if rate.rate <= Decimal::ZERO {
        return Err(RateError::Transaction(format!(
            "rate {} for {} violates rate > 0",
            rate.rate, rate.currency_code
        )));
    }
    Ok(())
}

#[async_trait]
impl RateStore for MemoryRateStore {
    async fn init(&self) -> Result<(), RateError> {
        Ok(())
    }

    async fn insert_rates(&self, rates: &[NewExchangeRate]) -> Result<u64, RateError> {
        // Validate everything first so a bad row leaves the map untouched.
        for rate in rates {
            check_row(rate)?;
        }

        let created_at = Utc::now().naive_utc();
        let mut rows = self.rows.write().await;
        let mut inserted = 0;
        for rate in rates {
            let key = (rate.currency_code.clone(), rate.timestamp_utc);
            if rows.contains_key(&key) {
                continue;
            }
            rows.insert(
                key,
                ExchangeRate {
                    id: rate.id,
                    currency_code: rate.currency_code.clone(),
                    rate: rate.rate,
                    timestamp_utc: rate.timestamp_utc,
                    created_at,
                },
            );
            inserted += 1;
        }
        debug!("Stored {inserted} of {} rows", rates.len());
        Ok(inserted)
    }

    async fn latest_rates(&self) -> Result<HashMap<String, ExchangeRate>, RateError> {
        let rows = self.rows.read().await;
        let mut latest: HashMap<String, ExchangeRate> = HashMap::new();
        // Keys are ordered by timestamp within each code, so the last one wins.
        for ((code, _), row) in rows.iter() {
            latest.insert(code.clone(), row.clone());
        }
        Ok(latest)
    }

    async fn latest_rate(&self, currency_code: &str) -> Result<Option<ExchangeRate>, RateError> {
        let rows = self.rows.read().await;
        Ok(rows
            .values()
            .filter(|row| row.currency_code == currency_code)
            .max_by_key(|row| row.timestamp_utc)
            .cloned())
    }

    async fn currency_codes(&self) -> Result<Vec<String>, RateError> {
        let rows = self.rows.read().await;
        let mut codes: Vec<String> = rows.keys().map(|(code, _)| code.clone()).collect();
        codes.dedup();
        Ok(codes)
    }
}
