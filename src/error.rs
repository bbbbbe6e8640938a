use std::fmt;

use actix_web::error::BlockingError;
use actix_web::{HttpResponse, ResponseError};
use serde::Serialize;

/// Unified error type for every handler. Storage failures are never shown to
/// the user in detail; they all render as one generic "an error occurred"
/// response while the specifics go to the log.
#[derive(Debug)]
pub enum GbbError {
    Database(diesel::result::Error),
    Pool(r2d2::Error),
    Canceled,
}

impl fmt::Display for GbbError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GbbError::Database(error) => write!(f, "database error: {}", error),
            GbbError::Pool(error) => write!(f, "connection pool error: {}", error),
            GbbError::Canceled => write!(f, "blocking operation canceled"),
        }
    }
}

impl std::error::Error for GbbError {}

impl From<diesel::result::Error> for GbbError {
    fn from(error: diesel::result::Error) -> Self {
        GbbError::Database(error)
    }
}

impl From<r2d2::Error> for GbbError {
    fn from(error: r2d2::Error) -> Self {
        GbbError::Pool(error)
    }
}

impl From<BlockingError> for GbbError {
    fn from(_: BlockingError) -> Self {
        GbbError::Canceled
    }
}

#[derive(Serialize)]
struct GenericErrorResponse {
    success: bool,
}

impl ResponseError for GbbError {
    fn error_response(&self) -> HttpResponse {
        log::error!("request failed: {}", self);
        HttpResponse::InternalServerError().json(GenericErrorResponse { success: false })
    }
}
