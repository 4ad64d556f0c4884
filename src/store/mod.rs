pub mod memory;
pub mod postgres;

use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::RateError;
use crate::exchange_rate::{ExchangeRate, NewExchangeRate};

pub use memory::MemoryRateStore;
pub use postgres::PgRateStore;

/// Append-only snapshot storage, unique on `(currency_code, timestamp_utc)`.
#[async_trait]
pub trait RateStore: Send + Sync {
    /// Creates the schema if it doesn't exist.
    async fn init(&self) -> Result<(), RateError>;

    /// Writes a whole cycle in one transaction. Rows colliding with an
    /// existing `(currency_code, timestamp_utc)` are skipped; any other
    /// failure rolls back every row. Returns the number of rows inserted.
    async fn insert_rates(&self, rates: &[NewExchangeRate]) -> Result<u64, RateError>;

    /// Latest snapshot per currency, keyed by code.
    async fn latest_rates(&self) -> Result<HashMap<String, ExchangeRate>, RateError>;

    async fn latest_rate(&self, currency_code: &str) -> Result<Option<ExchangeRate>, RateError>;

    /// Every code ever stored, sorted.
    async fn currency_codes(&self) -> Result<Vec<String>, RateError>;
}
