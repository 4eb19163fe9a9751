use std::time::Duration;

use rocket::serde::json::json;
use serde::{Deserialize, Serialize};

use super::{endpoint, throttle};
use crate::{
    audit::AuditLogger,
    clock::ClockHandle,
    error::Result,
    model::{
        common::{normalize_email, Election, ElectionStatus, EligibleVoter, RequestMeta},
        db::{AuditEvent, AuditEventType},
        mongodb::Id,
    },
    rate_limit::RateLimiter,
    store::{within, StoreHandle, StoreResult},
};

/// Why a voter may not vote. Checks run in declaration order and the first
/// failure wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IneligibleReason {
    InvalidInput,
    NotRegistered,
    ElectionNotFound,
    ElectionNotActive,
    ElectionNotStarted,
    ElectionEnded,
    AlreadyVoted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Eligibility {
    Eligible {
        voter: EligibleVoter,
        election: Election,
    },
    Ineligible(IneligibleReason),
}

impl Eligibility {
    pub fn is_eligible(&self) -> bool {
        matches!(self, Self::Eligible { .. })
    }
}

#[derive(Clone)]
pub struct EligibilityChecker {
    store: StoreHandle,
    clock: ClockHandle,
    limiter: RateLimiter,
    audit: AuditLogger,
    deadline: Duration,
}

impl EligibilityChecker {
    pub fn new(
        store: StoreHandle,
        clock: ClockHandle,
        limiter: RateLimiter,
        audit: AuditLogger,
        deadline: Duration,
    ) -> Self {
        Self {
            store,
            clock,
            limiter,
            audit,
            deadline,
        }
    }

    /// The public check: rate limited and audited.
    pub async fn check(
        &self,
        election_id: &str,
        voter_email: &str,
        request: &RequestMeta,
    ) -> Result<Eligibility> {
        throttle(&self.limiter, &self.audit, request, endpoint::CHECK_ELIGIBILITY).await?;
        let eligibility = self.evaluate(election_id, voter_email).await?;

        let mut event = AuditEvent::new(
            AuditEventType::EligibilityChecked,
            match &eligibility {
                Eligibility::Eligible { voter, .. } => json!({
                    "eligible": true,
                    "eligible_posts": voter.eligible_posts,
                }),
                Eligibility::Ineligible(reason) => json!({
                    "eligible": false,
                    "reason": reason,
                }),
            },
            request,
        );
        if let Eligibility::Eligible { voter, election } = &eligibility {
            event = event.election(election.id).voter(voter.id);
        }
        self.audit.record(event);

        Ok(eligibility)
    }

    /// Decide eligibility from the current state of the store, without rate
    /// limiting or auditing. Nothing is written.
    pub async fn evaluate(&self, election_id: &str, voter_email: &str) -> StoreResult<Eligibility> {
        use IneligibleReason::*;

        let email = normalize_email(voter_email);
        let election_id = match election_id.parse::<Id>() {
            Ok(id) if is_well_formed_email(&email) => id,
            _ => return Ok(Eligibility::Ineligible(InvalidInput)),
        };

        let voter = match within(self.deadline, self.store.eligible_voter(election_id, &email)).await? {
            Some(voter) => voter,
            None => return Ok(Eligibility::Ineligible(NotRegistered)),
        };

        let election = match within(self.deadline, self.store.election(election_id)).await? {
            Some(election) => election,
            None => return Ok(Eligibility::Ineligible(ElectionNotFound)),
        };

        let now = self.clock.now();
        if election.status != ElectionStatus::Active {
            return Ok(Eligibility::Ineligible(ElectionNotActive));
        }
        if now < election.start_time {
            return Ok(Eligibility::Ineligible(ElectionNotStarted));
        }
        if now > election.end_time {
            return Ok(Eligibility::Ineligible(ElectionEnded));
        }

        if voter.has_voted {
            return Ok(Eligibility::Ineligible(AlreadyVoted));
        }

        Ok(Eligibility::Eligible { voter, election })
    }
}

/// A deliberately loose shape check: one `@` with something either side and
/// a dot somewhere in the domain.
fn is_well_formed_email(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !email.chars().any(char::is_whitespace)
                && email.len() <= 254
        }
        None => false,
    }
}
