use std::collections::HashMap;

use async_trait::async_trait;
use log::{debug, error, info};
use sqlx::{PgPool, postgres::PgPoolOptions};

use super::RateStore;
use crate::error::RateError;
use crate::exchange_rate::{ExchangeRate, NewExchangeRate};

const CREATE_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS exchange_rates (
    id UUID PRIMARY KEY,
    currency_code VARCHAR(3) NOT NULL,
    rate NUMERIC NOT NULL CHECK (rate > 0),
    timestamp_utc TIMESTAMP WITHOUT TIME ZONE NOT NULL,
    created_at TIMESTAMP WITHOUT TIME ZONE NOT NULL DEFAULT (NOW() AT TIME ZONE 'utc')
)"#;

const CREATE_INDEX: &str = r#"
CREATE UNIQUE INDEX IF NOT EXISTS currency_timestamp_idx
ON exchange_rates (currency_code, timestamp_utc)"#;

const INSERT_RATE: &str = r#"
INSERT INTO exchange_rates (id, currency_code, rate, timestamp_utc)
VALUES ($1, $2, $3, $4)
ON CONFLICT (currency_code, timestamp_utc) DO NOTHING"#;

const SELECT_LATEST: &str = r#"
SELECT DISTINCT ON (currency_code) id, currency_code, rate, timestamp_utc, created_at
FROM exchange_rates
ORDER BY currency_code, timestamp_utc DESC"#;

#[derive(Clone)]
pub struct PgRateStore {
    pool: PgPool,
}

impl PgRateStore {
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, RateError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;
        Ok(Self { pool })
    }
}

#[async_trait]
impl RateStore for PgRateStore {
    async fn init(&self) -> Result<(), RateError> {
        sqlx::query(CREATE_TABLE).execute(&self.pool).await?;
        sqlx::query(CREATE_INDEX).execute(&self.pool).await?;
        info!("Database schema is ready");
        Ok(())
    }

    async fn insert_rates(&self, rates: &[NewExchangeRate]) -> Result<u64, RateError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| RateError::Transaction(e.to_string()))?;

        let mut inserted = 0;
        for rate in rates {
            let result = sqlx::query(INSERT_RATE)
                .bind(rate.id)
                .bind(&rate.currency_code)
                .bind(rate.rate)
                .bind(rate.timestamp_utc)
                .execute(&mut *tx)
                .await;

            match result {
                Ok(done) => inserted += done.rows_affected(),
                Err(e) => {
                    error!("Insert of {} failed, rolling back: {e}", rate.currency_code);
                    tx.rollback()
                        .await
                        .map_err(|e| RateError::Transaction(e.to_string()))?;
                    return Err(RateError::Transaction(format!(
                        "insert of {} failed: {e}",
                        rate.currency_code
                    )));
                }
            }
        }

        tx.commit()
            .await
            .map_err(|e| RateError::Transaction(e.to_string()))?;
        debug!("Committed {inserted} of {} rows", rates.len());
        Ok(inserted)
    }

    async fn latest_rates(&self) -> Result<HashMap<String, ExchangeRate>, RateError> {
        let rows: Vec<ExchangeRate> = sqlx::query_as(SELECT_LATEST).fetch_all(&self.pool).await?;
        Ok(rows
            .into_iter()
            .map(|row| (row.currency_code.clone(), row))
            .collect())
    }

    async fn latest_rate(&self, currency_code: &str) -> Result<Option<ExchangeRate>, RateError> {
        let row: Option<ExchangeRate> = sqlx::query_as(
            r#"
            SELECT id, currency_code, rate, timestamp_utc, created_at
            FROM exchange_rates
            WHERE currency_code = $1
            ORDER BY timestamp_utc DESC
            LIMIT 1"#,
        )
        .bind(currency_code)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn currency_codes(&self) -> Result<Vec<String>, RateError> {
        let codes: Vec<String> = sqlx::query_scalar(
            "SELECT DISTINCT currency_code FROM exchange_rates ORDER BY currency_code",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(codes)
    }
}
