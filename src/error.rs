use log::{error, warn};
use rocket::{
    http::{Header, Status, StatusClass},
    response::{self, Responder},
    serde::json::{json, Json, Value},
    Request, Response,
};
use thiserror::Error;

use crate::{logging::RequestId, rate_limit::RateLimitStatus, store::StoreError};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid request: {0}")]
    Validation(String),
    #[error("Rate limited until {}", .0.reset_at)]
    RateLimited(RateLimitStatus),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("Internal failure: {0}")]
    Internal(String),
}

impl Error {
    pub fn status(&self) -> Status {
        match self {
            Self::Validation(_) => Status::BadRequest,
            Self::RateLimited(_) => Status::TooManyRequests,
            Self::NotFound(_) => Status::NotFound,
            Self::Store(_) | Self::Internal(_) => Status::InternalServerError,
        }
    }

    /// What the client gets told. Diagnostics stay in the log.
    pub fn public_message(&self) -> &'static str {
        match self {
            Self::Validation(_) => "Invalid request",
            Self::RateLimited(_) => "Too many requests, please try again later",
            Self::NotFound(_) => "Not found",
            Self::Store(_) | Self::Internal(_) => "Internal server error",
        }
    }
}

impl<'r, 'o: 'r> Responder<'r, 'o> for Error {
    fn respond_to(self, req: &'r Request<'_>) -> response::Result<'o> {
        let body = json!({ "error": self.public_message() });
        self.respond_with(req, body)
    }
}

impl Error {
    fn respond_with<'r, 'o: 'r>(self, req: &'r Request<'_>, body: Value) -> response::Result<'o> {
        let id = req.local_cache(RequestId::next);
        let status = self.status();
        match status.class() {
            StatusClass::ServerError => error!("req{id}: {self}"),
            _ => warn!("req{id}: {self}"),
        }

        let mut response = Response::build_from(Json(body).respond_to(req)?);
        response.status(status);
        if let Self::RateLimited(limit) = &self {
            response
                .header(Header::new(
                    "X-RateLimit-Remaining",
                    limit.remaining.to_string(),
                ))
                .header(Header::new(
                    "X-RateLimit-Reset",
                    limit.reset_at.timestamp().to_string(),
                ));
        }
        response.ok()
    }
}

/// An [`Error`] from an endpoint whose failures are reported as
/// `{"success": false, "error": ...}`, matching its business outcomes.
#[derive(Debug)]
pub struct Unsuccessful(pub Error);

impl From<Error> for Unsuccessful {
    fn from(error: Error) -> Self {
        Self(error)
    }
}

impl<'r, 'o: 'r> Responder<'r, 'o> for Unsuccessful {
    fn respond_to(self, req: &'r Request<'_>) -> response::Result<'o> {
        let body = json!({ "success": false, "error": self.0.public_message() });
        self.0.respond_with(req, body)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::Utc;

    use super::*;

    #[test]
    fn messages_hide_diagnostics() {
        let errors = [
            Error::Validation("candidate 123 cannot receive votes".to_string()),
            Error::Store(StoreError::Timeout(Duration::from_secs(5))),
            Error::Internal("task panicked".to_string()),
            Error::RateLimited(RateLimitStatus {
                allowed: false,
                remaining: 0,
                reset_at: Utc::now(),
            }),
        ];
        let statuses = errors.iter().map(Error::status).collect::<Vec<_>>();
        assert_eq!(
            statuses,
            vec![
                Status::BadRequest,
                Status::InternalServerError,
                Status::InternalServerError,
                Status::TooManyRequests
            ]
        );
        for error in &errors {
            assert!(!error.public_message().contains("123"));
            assert!(!error.public_message().contains("panicked"));
        }
    }
}
