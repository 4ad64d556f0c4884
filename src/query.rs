use std::{collections::HashMap, sync::Arc};

use log::{debug, info, warn};
use rust_decimal::{
    Decimal, RoundingStrategy,
    prelude::{FromPrimitive, ToPrimitive},
};

use crate::currency::{CurrencyCode, FALLBACK_CURRENCIES};
use crate::error::RateError;
use crate::exchange_rate::ExchangeRate;
use crate::store::RateStore;
use crate::updater::RateUpdater;

const RESULT_DP: u32 = 4;
const RATE_DP: u32 = 6;

/// `result` is rounded to 4 places and `rate` to 6.
#[derive(Debug, Clone, PartialEq)]
pub struct Conversion {
    pub from: CurrencyCode,
    pub to: CurrencyCode,
    pub amount: f64,
    pub result: f64,
    pub rate: f64,
}

pub struct RateQueryService {
    store: Arc<dyn RateStore>,
    updater: Arc<RateUpdater>,
}

impl RateQueryService {
    pub fn new(store: Arc<dyn RateStore>, updater: Arc<RateUpdater>) -> Self {
        Self { store, updater }
    }

    pub fn updater(&self) -> &RateUpdater {
        &self.updater
    }

    /// Every code ever stored, or the static fallback list for an empty store.
    pub async fn list_currencies(&self) -> Result<Vec<CurrencyCode>, RateError> {
        let stored = self.store.currency_codes().await?;
        if stored.is_empty() {
            return Ok(fallback_currencies());
        }

        Ok(stored
            .iter()
            .filter_map(|code| code.parse().ok())
            .collect())
    }

    /// Latest snapshot for `code`. Codes that can't exist are simply not found.
    pub async fn latest_rate(&self, code: &str) -> Result<ExchangeRate, RateError> {
        let code: CurrencyCode = code
            .parse()
            .map_err(|_| RateError::NotFound(code.trim().to_ascii_uppercase()))?;
        self.store
            .latest_rate(code.as_str())
            .await?
            .ok_or_else(|| RateError::NotFound(code.to_string()))
    }

    /// Converts `amount` of `from` into `to` through the common base.
    ///
    /// Missing rates trigger one refresh and one re-read; there is no further retry.
    pub async fn convert(&self, from: &str, to: &str, amount: f64) -> Result<Conversion, RateError> {
        let from: CurrencyCode = from.parse()?;
        let to: CurrencyCode = to.parse()?;
        if !amount.is_finite() || amount < 0.0 {
            return Err(RateError::InvalidRequest(format!(
                "amount must be a finite non-negative number, got {amount}"
            )));
        }

        if from == to {
            return Ok(Conversion {
                from,
                to,
                amount,
                result: amount,
                rate: 1.0,
            });
        }

        let rates = self.store.latest_rates().await?;
        let (from_rate, to_rate) = match pair_rates(&rates, &from, &to) {
            Some(pair) => pair,
            None => {
                info!("Rates for {from}/{to} are missing, updating");
                if let Err(e) = self.updater.refresh().await {
                    warn!("On-demand update failed: {e}");
                }
                let rates = self.store.latest_rates().await?;
                pair_rates(&rates, &from, &to).ok_or_else(|| RateError::RatesUnavailable {
                    from: from.to_string(),
                    to: to.to_string(),
                })?
            }
        };

        let rate = from_rate
            .checked_div(to_rate)
            .ok_or_else(|| RateError::RatesUnavailable {
                from: from.to_string(),
                to: to.to_string(),
            })?;
        let result = Decimal::from_f64(amount)
            .and_then(|amount| amount.checked_mul(rate))
            .ok_or_else(|| RateError::Computation(format!("{amount} {from} at rate {rate}")))?;
        debug!("{amount} {from} -> {to}: {from}={from_rate}, {to}={to_rate}, rate={rate}, result={result}");

        Ok(Conversion {
            from,
            to,
            amount,
            result: rounded(result, RESULT_DP)?,
            rate: rounded(rate, RATE_DP)?,
        })
    }
}

fn rounded(value: Decimal, dp: u32) -> Result<f64, RateError> {
    value
        .round_dp_with_strategy(dp, RoundingStrategy::MidpointAwayFromZero)
        .to_f64()
        .ok_or_else(|| RateError::Computation(format!("{value} doesn't fit f64")))
}

pub fn fallback_currencies() -> Vec<CurrencyCode> {
    FALLBACK_CURRENCIES
        .iter()
        .filter_map(|code| code.parse().ok())
        .collect()
}

fn pair_rates(
    rates: &HashMap<String, ExchangeRate>,
    from: &CurrencyCode,
    to: &CurrencyCode,
) -> Option<(Decimal, Decimal)> {
    let from_rate = rates.get(from.as_str())?.rate;
    let to_rate = rates.get(to.as_str())?.rate;
    Some((from_rate, to_rate))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange_rate::NewExchangeRate;
    use crate::store::MemoryRateStore;
    use crate::updater::tests::StubSource;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Counts reads on top of an in-memory store.
    struct CountingStore {
        inner: MemoryRateStore,
        reads: AtomicUsize,
    }

    #[async_trait]
    impl RateStore for CountingStore {
        async fn init(&self) -> Result<(), RateError> {
            self.inner.init().await
        }

        async fn insert_rates(&self, rates: &[NewExchangeRate]) -> Result<u64, RateError> {
            self.inner.insert_rates(rates).await
        }

        async fn latest_rates(&self) -> Result<HashMap<String, ExchangeRate>, RateError> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            self.inner.latest_rates().await
        }

        async fn latest_rate(&self, code: &str) -> Result<Option<ExchangeRate>, RateError> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            self.inner.latest_rate(code).await
        }

        async fn currency_codes(&self) -> Result<Vec<String>, RateError> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            self.inner.currency_codes().await
        }
    }

    fn assert_close(actual: f64, expected: f64) {
        assert!((actual - expected).abs() < 1e-9, "{actual} != {expected}");
    }

    async fn service_with(source: Arc<StubSource>) -> (RateQueryService, Arc<MemoryRateStore>) {
        let store = Arc::new(MemoryRateStore::new());
        let updater = Arc::new(RateUpdater::new(
            source,
            store.clone(),
            "USD".parse().unwrap(),
        ));
        (RateQueryService::new(store.clone(), updater), store)
    }

    /// RUB at 92.5 and EUR at 0.93 per USD.
    fn scenario_source() -> Arc<StubSource> {
        Arc::new(StubSource::ok(
            "USD",
            &[("RUB", "0.0108108108108108108108108108"), ("EUR", "1.0752688172043010752688172043")],
        ))
    }

    #[tokio::test]
    async fn same_currency_skips_the_store() {
        let store = Arc::new(CountingStore {
            inner: MemoryRateStore::new(),
            reads: AtomicUsize::new(0),
        });
        let updater = Arc::new(RateUpdater::new(
            Arc::new(StubSource::failing()),
            store.clone(),
            "USD".parse().unwrap(),
        ));
        let service = RateQueryService::new(store.clone(), updater);

        let conversion = service.convert("GBP", "gbp", 12.5).await.unwrap();

        assert_eq!(conversion.result, 12.5);
        assert_eq!(conversion.rate, 1.0);
        assert_eq!(store.reads.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn same_currency_keeps_amounts_beyond_decimal_range() {
        let (service, _) = service_with(Arc::new(StubSource::failing())).await;

        let conversion = service.convert("USD", "USD", 1e30).await.unwrap();

        assert_eq!(conversion.result, 1e30);
        assert_eq!(conversion.rate, 1.0);
    }

    #[tokio::test]
    async fn cross_overflow_is_a_computation_error() {
        let (service, _) = service_with(scenario_source()).await;
        service.updater().refresh().await.unwrap();

        let err = service.convert("EUR", "RUB", 1e30).await.unwrap_err();

        assert!(matches!(err, RateError::Computation(_)), "{err}");
    }

    #[tokio::test]
    async fn cross_rate_goes_through_the_base() {
        let source = scenario_source();
        let (service, _) = service_with(source.clone()).await;
        service.updater().refresh().await.unwrap();

        let conversion = service.convert("RUB", "EUR", 100.0).await.unwrap();

        assert_close(conversion.rate, 0.010054);
        assert_close(conversion.result, 1.0054);
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test]
    async fn rates_compose_transitively() {
        let source = Arc::new(StubSource::ok(
            "RUB",
            &[("USD", "92.5"), ("EUR", "99.46"), ("CNY", "12.85")],
        ));
        let (service, _) = service_with(source).await;
        service.updater().refresh().await.unwrap();

        let ab = service.convert("EUR", "CNY", 1.0).await.unwrap().rate;
        let bc = service.convert("CNY", "RUB", 1.0).await.unwrap().rate;
        let ac = service.convert("EUR", "RUB", 1.0).await.unwrap().rate;

        assert!((ab * bc - ac).abs() < 1e-4, "{ab} * {bc} != {ac}");
    }

    #[tokio::test]
    async fn missing_pair_triggers_exactly_one_update() {
        let source = Arc::new(StubSource::ok("USD", &[("EUR", "1.07")]));
        let (service, _) = service_with(source.clone()).await;

        let err = service.convert("EUR", "XYZ", 10.0).await.unwrap_err();

        assert!(matches!(err, RateError::RatesUnavailable { .. }));
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test]
    async fn empty_store_is_filled_on_demand() {
        let source = scenario_source();
        let (service, store) = service_with(source.clone()).await;

        let conversion = service.convert("EUR", "USD", 2.0).await.unwrap();

        assert_eq!(source.calls(), 1);
        assert_close(conversion.result, 2.1505);
        assert_eq!(store.len().await, 3);
    }

    #[tokio::test]
    async fn invalid_input_is_rejected_before_any_update() {
        let source = scenario_source();
        let (service, _) = service_with(source.clone()).await;

        for (from, to, amount) in [
            ("USD", "EUR", -1.0),
            ("USD", "EUR", f64::NAN),
            ("USD", "EUR", f64::INFINITY),
            ("US", "EUR", 1.0),
            ("USD", "EURO", 1.0),
        ] {
            let err = service.convert(from, to, amount).await.unwrap_err();
            assert!(matches!(err, RateError::InvalidRequest(_)), "{from} {to} {amount}");
        }
        assert_eq!(source.calls(), 0);
    }

    #[tokio::test]
    async fn currencies_fall_back_when_store_is_empty() {
        let (service, _) = service_with(Arc::new(StubSource::failing())).await;

        let codes: Vec<String> = service
            .list_currencies()
            .await
            .unwrap()
            .into_iter()
            .map(String::from)
            .collect();

        assert_eq!(codes, vec!["EUR", "RUB", "USD"]);
    }

    #[tokio::test]
    async fn unknown_currency_is_not_found() {
        let (service, _) = service_with(scenario_source()).await;
        service.updater().refresh().await.unwrap();

        assert!(matches!(
            service.latest_rate("xxx").await.unwrap_err(),
            RateError::NotFound(code) if code == "XXX"
        ));
        assert!(matches!(
            service.latest_rate(" abcd").await.unwrap_err(),
            RateError::NotFound(code) if code == "ABCD"
        ));
        assert_eq!(service.latest_rate("usd").await.unwrap().rate, Decimal::ONE);
    }
}
