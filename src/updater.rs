use std::sync::{
    Arc, Mutex as StdMutex,
    atomic::{AtomicU64, Ordering},
};
use std::time::Duration;

use chrono::{NaiveDateTime, Utc};
use log::{error, info, warn};
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};

use crate::currency::CurrencyCode;
use crate::error::RateError;
use crate::exchange_rate::NewExchangeRate;
use crate::normalize::normalize;
use crate::store::RateStore;
use crate::upstream::RateSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateState {
    Idle,
    Fetching,
    Normalizing,
    Writing,
    /// Last cycle failed. Held until the next cycle starts.
    Failed,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdaterStatus {
    pub state: UpdateState,
    pub cycles: u64,
    pub last_success: Option<NaiveDateTime>,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    pub timestamp_utc: NaiveDateTime,
    pub currencies: usize,
    pub inserted: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum UpdateOutcome {
    Completed(CycleReport),
    /// Another trigger's cycle finished while this one waited.
    Joined,
}

pub struct RateUpdater {
    source: Arc<dyn RateSource>,
    store: Arc<dyn RateStore>,
    base: CurrencyCode,
    cycle_lock: Mutex<()>,
    finished: AtomicU64,
    status: StdMutex<UpdaterStatus>,
}

impl RateUpdater {
    pub fn new(source: Arc<dyn RateSource>, store: Arc<dyn RateStore>, base: CurrencyCode) -> Self {
        Self {
            source,
            store,
            base,
            cycle_lock: Mutex::new(()),
            finished: AtomicU64::new(0),
            status: StdMutex::new(UpdaterStatus {
                state: UpdateState::Idle,
                cycles: 0,
                last_success: None,
                last_error: None,
            }),
        }
    }

    pub fn status(&self) -> UpdaterStatus {
        self.status
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Runs one cycle unless one is already in flight, in which case this
    /// waits for it and returns `Joined`.
    pub async fn refresh(&self) -> Result<UpdateOutcome, RateError> {
        let seen = self.finished.load(Ordering::Acquire);
        let _guard = self.cycle_lock.lock().await;
        if self.finished.load(Ordering::Acquire) != seen {
            info!("Rate update already ran while waiting, skipping");
            return Ok(UpdateOutcome::Joined);
        }

        let result = self.run_cycle(Utc::now().naive_utc()).await;
        self.finished.fetch_add(1, Ordering::AcqRel);
        result.map(UpdateOutcome::Completed)
    }

    /// One fetch/normalize/write cycle stamped with `timestamp_utc`. Callers
    /// outside this module go through `refresh`, which holds the cycle lock.
    pub(crate) async fn run_cycle(
        &self,
        timestamp_utc: NaiveDateTime,
    ) -> Result<CycleReport, RateError> {
        info!("Starting rate update at {timestamp_utc}");
        match self.fetch_normalize_write(timestamp_utc).await {
            Ok(report) => {
                info!(
                    "Rates updated at {}: {} currencies, {} new rows",
                    report.timestamp_utc, report.currencies, report.inserted
                );
                self.update_status(|status| {
                    status.state = UpdateState::Idle;
                    status.cycles += 1;
                    status.last_success = Some(timestamp_utc);
                    status.last_error = None;
                });
                Ok(report)
            }
            Err(e) => {
                error!("Rate update failed: {e}");
                self.update_status(|status| {
                    status.state = UpdateState::Failed;
                    status.cycles += 1;
                    status.last_error = Some(e.to_string());
                });
                Err(e)
            }
        }
    }

    async fn fetch_normalize_write(
        &self,
        timestamp_utc: NaiveDateTime,
    ) -> Result<CycleReport, RateError> {
        self.set_state(UpdateState::Fetching);
        let upstream = self.source.fetch().await?;

        self.set_state(UpdateState::Normalizing);
        let rates = normalize(&upstream, &self.base)?;

        self.set_state(UpdateState::Writing);
        let rows: Vec<NewExchangeRate> = rates
            .iter()
            .map(|(code, rate)| NewExchangeRate::new(code.as_str(), *rate, timestamp_utc))
            .collect();
        let inserted = self.store.insert_rates(&rows).await?;

        Ok(CycleReport {
            timestamp_utc,
            currencies: rows.len(),
            inserted,
        })
    }

    fn set_state(&self, state: UpdateState) {
        self.update_status(|status| status.state = state);
    }

    fn update_status<F: FnOnce(&mut UpdaterStatus)>(&self, f: F) {
        let mut status = self
            .status
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut status);
    }

    /// Refreshes every `period`, first tick one period from now.
    pub fn spawn_schedule(self: &Arc<Self>, period: Duration) -> JoinHandle<()> {
        let updater = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(e) = updater.refresh().await {
                    warn!("Scheduled rate update failed, keeping previous data: {e}");
                }
            }
        })
    }
}
