use actix_web::{HttpResponse, ResponseError, http::StatusCode};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RateError {
    #[error("upstream unavailable after {attempts} attempt(s): {reason}")]
    UpstreamUnavailable { attempts: u32, reason: String },

    #[error("malformed upstream payload: {0}")]
    MalformedPayload(String),

    #[error("normalization failed: {0}")]
    Normalization(String),

    #[error("transaction failed: {0}")]
    Transaction(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("conversion overflowed: {0}")]
    Computation(String),

    #[error("rates for {from}/{to} are unavailable, try again later")]
    RatesUnavailable { from: String, to: String },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("currency not found: {0}")]
    NotFound(String),
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl ResponseError for RateError {
    fn status_code(&self) -> StatusCode {
        match self {
            RateError::InvalidRequest(_) | RateError::RatesUnavailable { .. } => {
                StatusCode::BAD_REQUEST
            }
            RateError::NotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        // Internal details stay in the log.
        let error = match self.status_code() {
            StatusCode::INTERNAL_SERVER_ERROR => {
                log::error!("Request failed: {self}");
                "internal server error".to_string()
            }
            _ => self.to_string(),
        };
        HttpResponse::build(self.status_code()).json(ErrorBody { error })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_taxonomy_to_status_codes() {
        assert_eq!(
            RateError::InvalidRequest("amount".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            RateError::RatesUnavailable {
                from: "AAA".into(),
                to: "BBB".into()
            }
            .status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            RateError::NotFound("XXX".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            RateError::Computation("1e30 * 2".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            RateError::Transaction("boom".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
