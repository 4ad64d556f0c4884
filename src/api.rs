use actix_web::{HttpResponse, get, web};
use chrono::{DateTime, NaiveDateTime, Utc};
use log::error;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::currency::CurrencyCode;
use crate::error::RateError;
use crate::query::{RateQueryService, fallback_currencies};

#[derive(Debug, Serialize, Deserialize)]
pub struct CurrencyInfo {
    pub code: String,
    pub name: String,
}

impl From<&CurrencyCode> for CurrencyInfo {
    fn from(code: &CurrencyCode) -> Self {
        Self {
            code: code.to_string(),
            name: code.name().to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateResponse {
    pub currency: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub rate: Decimal,
    pub last_updated: NaiveDateTime,
}

#[derive(Debug, Deserialize)]
pub struct ConvertParams {
    pub from: Option<String>,
    pub to: Option<String>,
    pub amount: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ConvertResponse {
    pub from: String,
    pub to: String,
    pub amount: f64,
    pub result: f64,
    pub rate: f64,
    pub timestamp: DateTime<Utc>,
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api")
            .service(currencies)
            .service(rate)
            .service(convert)
            .service(status),
    );
}

#[get("/currencies")]
async fn currencies(service: web::Data<RateQueryService>) -> HttpResponse {
    let codes = match service.list_currencies().await {
        Ok(codes) => codes,
        Err(e) => {
            error!("Listing currencies failed, serving fallback list: {e}");
            fallback_currencies()
        }
    };
    let body: Vec<CurrencyInfo> = codes.iter().map(CurrencyInfo::from).collect();
    HttpResponse::Ok().json(body)
}

#[get("/rate/{currency}")]
async fn rate(
    service: web::Data<RateQueryService>,
    currency: web::Path<String>,
) -> Result<HttpResponse, RateError> {
    let latest = service.latest_rate(&currency).await?;
    Ok(HttpResponse::Ok().json(RateResponse {
        currency: latest.currency_code,
        rate: latest.rate,
        last_updated: latest.timestamp_utc,
    }))
}

#[get("/convert")]
async fn convert(
    service: web::Data<RateQueryService>,
    params: web::Query<ConvertParams>,
) -> Result<HttpResponse, RateError> {
    let params = params.into_inner();
    let (Some(from), Some(to), Some(amount)) = (params.from, params.to, params.amount) else {
        return Err(RateError::InvalidRequest(
            "from, to and amount are required".to_string(),
        ));
    };
    let amount: f64 = amount
        .trim()
        .parse()
        .map_err(|_| RateError::InvalidRequest(format!("amount '{amount}' is not a number")))?;

    let conversion = service.convert(&from, &to, amount).await?;
    Ok(HttpResponse::Ok().json(ConvertResponse {
        from: conversion.from.to_string(),
        to: conversion.to.to_string(),
        amount: conversion.amount,
        result: conversion.result,
        rate: conversion.rate,
        timestamp: Utc::now(),
    }))
}

#[get("/status")]
async fn status(service: web::Data<RateQueryService>) -> HttpResponse {
    HttpResponse::Ok().json(service.updater().status())
}
