use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use uuid::Uuid;

/// One stored snapshot: value of one unit of `currency_code` in base-currency units.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct ExchangeRate {
    pub id: Uuid,
    pub currency_code: String,
    pub rate: Decimal,
    pub timestamp_utc: NaiveDateTime,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewExchangeRate {
    pub id: Uuid,
    pub currency_code: String,
    pub rate: Decimal,
    pub timestamp_utc: NaiveDateTime,
}

impl NewExchangeRate {
    pub fn new(currency_code: &str, rate: Decimal, timestamp_utc: NaiveDateTime) -> Self {
        Self {
            id: Uuid::new_v4(),
            currency_code: currency_code.to_string(),
            rate,
            timestamp_utc,
        }
    }
}
