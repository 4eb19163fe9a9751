//! The voter-facing flows: checking eligibility, casting a whole ballot and
//! casting a single vote against a public key.

use log::warn;
use rocket::serde::json::json;

use crate::{
    audit::AuditLogger,
    error::{Error, Result},
    model::{
        common::RequestMeta,
        db::{AuditEvent, AuditEventType},
    },
    rate_limit::RateLimiter,
};

mod eligibility;
mod secure;
mod submission;

pub use eligibility::{Eligibility, EligibilityChecker, IneligibleReason};
pub use secure::SecureVoteService;
pub use submission::{SubmissionCoordinator, SubmissionOutcome};

/// Rate limiting keys, one per endpoint.
pub mod endpoint {
    pub const CHECK_ELIGIBILITY: &str = "check-eligibility";
    pub const SUBMIT_VOTES: &str = "submit-votes";
    pub const SECURE_VOTE: &str = "secure-vote";
    pub const VERIFY_VOTE: &str = "verify-vote";
}

/// Count the request against the caller's window, auditing a denial.
pub async fn throttle(
    limiter: &RateLimiter,
    audit: &AuditLogger,
    request: &RequestMeta,
    endpoint: &str,
) -> Result<()> {
    match limiter.enforce(request.client_identifier(), endpoint).await {
        Ok(_) => Ok(()),
        Err(Error::RateLimited(status)) => {
            audit.record(AuditEvent::new(
                AuditEventType::RateLimitExceeded,
                json!({
                    "endpoint": endpoint,
                    "identifier": request.client_identifier(),
                    "reset_at": status.reset_at,
                }),
                request,
            ));
            Err(Error::RateLimited(status))
        }
        Err(err) => {
            warn!("Rate limiter unavailable for {endpoint}: {err}");
            Err(err)
        }
    }
}
