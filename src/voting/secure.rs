use std::time::Duration;

use log::info;
use rocket::serde::json::json;

use super::{endpoint, throttle};
use crate::{
    audit::AuditLogger,
    clock::ClockHandle,
    error::{Error, Result},
    ledger::{digest, BlockManager, NewEntry},
    model::{
        api::SecureVoteRequest,
        common::{CandidateStatus, RequestMeta},
        db::{AuditEvent, AuditEventType, EncryptedVote},
        mongodb::Id,
    },
    rate_limit::RateLimiter,
    store::{within, StoreHandle},
};

/// Casts single votes straight into the ledger against a caller-supplied
/// public key, with no voter registration behind them.
#[derive(Clone)]
pub struct SecureVoteService {
    store: StoreHandle,
    clock: ClockHandle,
    limiter: RateLimiter,
    audit: AuditLogger,
    ledger: BlockManager,
    deadline: Duration,
}

impl SecureVoteService {
    pub fn new(
        store: StoreHandle,
        clock: ClockHandle,
        limiter: RateLimiter,
        audit: AuditLogger,
        ledger: BlockManager,
        deadline: Duration,
    ) -> Self {
        Self {
            store,
            clock,
            limiter,
            audit,
            ledger,
            deadline,
        }
    }

    pub async fn cast(
        &self,
        vote: SecureVoteRequest,
        request: RequestMeta,
    ) -> Result<EncryptedVote> {
        throttle(&self.limiter, &self.audit, &request, endpoint::SECURE_VOTE).await?;

        let election_id = vote
            .election_id
            .parse::<Id>()
            .map_err(|_| Error::Validation("malformed election ID".to_string()))?;
        let candidate_id = vote
            .candidate_id
            .parse::<Id>()
            .map_err(|_| Error::Validation("malformed candidate ID".to_string()))?;
        let voter_public_key = vote.voter_public_key.trim();
        if voter_public_key.is_empty() {
            return Err(Error::Validation("missing voter public key".to_string()));
        }

        let now = self.clock.now();
        let election = within(self.deadline, self.store.election(election_id))
            .await?
            .ok_or_else(|| Error::Validation(format!("no election {election_id}")))?;
        if !election.is_open_at(now) {
            return Err(Error::Validation(format!(
                "election {election_id} is not accepting votes"
            )));
        }
        let candidate = within(self.deadline, self.store.candidate(candidate_id))
            .await?
            .filter(|c| c.election_id == election_id && c.status == CandidateStatus::Approved)
            .ok_or_else(|| {
                Error::Validation(format!(
                    "candidate {candidate_id} is not standing in election {election_id}"
                ))
            })?;

        let nonce: u64 = rand::random();
        let entry = self
            .ledger
            .record(NewEntry {
                vote_hash: digest::secure_vote_hash(
                    election_id,
                    candidate.id,
                    voter_public_key,
                    now,
                    nonce,
                ),
                election_id,
                encrypted_payload: digest::seal_payload(
                    election_id,
                    candidate.id,
                    voter_public_key,
                    rand::random(),
                ),
                voter_public_key: voter_public_key.to_string(),
                timestamp: now,
            })
            .await?;
        info!(
            "Secure vote {} recorded in block {}",
            entry.vote_hash, entry.block_number
        );

        self.audit.record(
            AuditEvent::new(
                AuditEventType::SecureVoteCast,
                json!({
                    "vote_hash": entry.vote_hash,
                    "block_number": entry.block_number,
                    "voter_public_key": entry.voter_public_key,
                }),
                &request,
            )
            .election(election_id),
        );
        Ok(entry)
    }
}
