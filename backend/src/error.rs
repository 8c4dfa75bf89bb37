use std::time::Duration;

use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use common::req::{ErrorBody, UnknownMeasurementType};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("invalid range: {0}")]
    InvalidRange(String),

    #[error("invalid query parameters: {0}")]
    InvalidParameter(String),

    #[error(transparent)]
    UnknownMeasurementType(#[from] UnknownMeasurementType),

    #[error("measurement store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("measurement store did not answer within {0:?}")]
    StoreTimeout(Duration),
}

impl QueryError {
    pub fn kind(&self) -> &'static str {
        match self {
            QueryError::InvalidRange(_) => "InvalidRange",
            QueryError::InvalidParameter(_) => "InvalidParameter",
            QueryError::UnknownMeasurementType(_) => "UnknownMeasurementType",
            QueryError::StoreUnavailable(_) => "StoreUnavailable",
            QueryError::StoreTimeout(_) => "StoreTimeout",
        }
    }

    pub fn body(&self) -> ErrorBody {
        ErrorBody {
            kind: self.kind().to_owned(),
            message: self.to_string(),
        }
    }
}

impl ResponseError for QueryError {
    fn status_code(&self) -> StatusCode {
        match self {
            QueryError::InvalidRange(_)
            | QueryError::InvalidParameter(_)
            | QueryError::UnknownMeasurementType(_) => StatusCode::BAD_REQUEST,
            QueryError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            QueryError::StoreTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(self.body())
    }
}
