use std::sync::Arc;

use actix_web::{App, HttpServer, middleware::Logger, web};
use anyhow::{Context, Result};
use log::{info, warn};

use currency_rates::api;
use currency_rates::config::{Config, StoreBackend};
use currency_rates::query::RateQueryService;
use currency_rates::store::{MemoryRateStore, PgRateStore, RateStore};
use currency_rates::updater::RateUpdater;
use currency_rates::upstream::HttpRateSource;

#[actix_web::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let store = open_store(&config).await?;
    store.init().await.context("Can't initialize the rate store")?;

    let source = HttpRateSource::new(&config.upstream)?;
    let updater = Arc::new(RateUpdater::new(
        Arc::new(source),
        Arc::clone(&store),
        config.base_currency.clone(),
    ));

    if let Err(e) = updater.refresh().await {
        warn!("Initial rate update failed, serving stored data: {e}");
    }
    updater.spawn_schedule(config.update_interval);

    let service = web::Data::new(RateQueryService::new(store, updater));

    info!("Listening on {}:{}", config.host, config.port);
    HttpServer::new(move || {
        App::new()
            .app_data(service.clone())
            .wrap(Logger::default())
            .configure(api::configure)
    })
    .bind((config.host.as_str(), config.port))
    .with_context(|| format!("Can't bind {}:{}", config.host, config.port))?
    .run()
    .await?;

    Ok(())
}

async fn open_store(config: &Config) -> Result<Arc<dyn RateStore>> {
    match config.database.backend {
        StoreBackend::Postgres => {
            let url = config
                .database
                .url
                .as_deref()
                .ok_or(anyhow::anyhow!("DATABASE_URL is not set"))?;
            let store = PgRateStore::connect(url, config.database.max_connections)
                .await
                .context("Can't connect to the database")?;
            Ok(Arc::new(store))
        }
        StoreBackend::Memory => {
            warn!("Using the in-memory store, rates won't survive a restart");
            Ok(Arc::new(MemoryRateStore::new()))
        }
    }
}
