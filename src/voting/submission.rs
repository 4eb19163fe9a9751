use std::collections::BTreeMap;
use std::time::Duration;

use log::{error, info, warn};
use rocket::serde::json::json;

use super::{endpoint, throttle, Eligibility, EligibilityChecker, IneligibleReason};
use crate::{
    audit::AuditLogger,
    clock::ClockHandle,
    error::{Error, Result},
    ledger::{digest, BlockManager, NewEntry},
    model::{
        api::SubmitVotesRequest,
        common::{normalize_email, Candidate, Election, EligibleVoter, RequestMeta},
        db::{AuditEvent, AuditEventType, EncryptedVote, Vote, VoteSubmission},
        mongodb::Id,
    },
    rate_limit::RateLimiter,
    store::{within, StoreError, StoreHandle, StoreResult},
};

/// The business result of a submission. Faults are errors instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmissionOutcome {
    Recorded {
        submission_hash: String,
        votes_recorded: usize,
    },
    AlreadyVoted,
    NotEligible(IneligibleReason),
}

/// Records a voter's whole ballot exactly once.
///
/// The unique `(election_id, voter_id)` key on submissions decides between
/// concurrent attempts; everything else is written only by the attempt that
/// won it. If any later step fails, every record the attempt made is removed
/// again, submission last, so the voter can simply retry.
#[derive(Clone)]
pub struct SubmissionCoordinator {
    store: StoreHandle,
    clock: ClockHandle,
    limiter: RateLimiter,
    audit: AuditLogger,
    eligibility: EligibilityChecker,
    ledger: BlockManager,
    deadline: Duration,
}

/// One validated selection.
struct Selection {
    position: String,
    candidate: Candidate,
    vote_hash: String,
}

impl SubmissionCoordinator {
    pub fn new(
        store: StoreHandle,
        clock: ClockHandle,
        limiter: RateLimiter,
        audit: AuditLogger,
        eligibility: EligibilityChecker,
        ledger: BlockManager,
        deadline: Duration,
    ) -> Self {
        Self {
            store,
            clock,
            limiter,
            audit,
            eligibility,
            ledger,
            deadline,
        }
    }

    pub async fn submit(
        &self,
        ballot: SubmitVotesRequest,
        request: RequestMeta,
    ) -> Result<SubmissionOutcome> {
        throttle(&self.limiter, &self.audit, &request, endpoint::SUBMIT_VOTES).await?;
        if ballot.votes.is_empty() {
            return Err(Error::Validation("ballot contains no votes".to_string()));
        }

        // Never trust an earlier eligibility check.
        let (voter, election) = match self
            .eligibility
            .evaluate(&ballot.election_id, &ballot.voter_email)
            .await?
        {
            Eligibility::Eligible { voter, election } => (voter, election),
            Eligibility::Ineligible(reason) => {
                self.reject(None, json!({ "reason": reason }), &request);
                return Ok(match reason {
                    IneligibleReason::AlreadyVoted => SubmissionOutcome::AlreadyVoted,
                    reason => SubmissionOutcome::NotEligible(reason),
                });
            }
        };

        let now = self.clock.now();
        let email = normalize_email(&ballot.voter_email);
        let selected = match self.validate(&election, &voter, &ballot.votes).await {
            Ok(selected) => selected,
            Err(err @ Error::Validation(_)) => {
                self.reject(
                    Some((&election, &voter)),
                    json!({ "reason": "invalid_ballot", "detail": err.to_string() }),
                    &request,
                );
                return Err(err);
            }
            Err(err) => return Err(err),
        };
        let candidate_ids: BTreeMap<String, Id> = selected
            .iter()
            .map(|(position, candidate)| (position.clone(), candidate.id))
            .collect();
        let submission_hash = digest::submission_hash(election.id, &email, &candidate_ids, now);
        let selections: Vec<_> = selected
            .into_iter()
            .map(|(position, candidate)| Selection {
                vote_hash: digest::vote_hash(&submission_hash, &position),
                position,
                candidate,
            })
            .collect();

        let submission = VoteSubmission {
            id: Id::new(),
            election_id: election.id,
            voter_id: voter.id,
            submission_hash: submission_hash.clone(),
            submitted_at: now,
            request: request.clone(),
        };
        match within(self.deadline, self.store.insert_submission(&submission)).await {
            Ok(()) => {}
            Err(StoreError::Duplicate) => {
                info!(
                    "Concurrent submission for voter {} in election {} lost",
                    voter.id, election.id
                );
                self.reject(
                    Some((&election, &voter)),
                    json!({ "reason": IneligibleReason::AlreadyVoted }),
                    &request,
                );
                return Ok(SubmissionOutcome::AlreadyVoted);
            }
            Err(err) => {
                // The insert may have landed anyway; left alone it would lock
                // the voter out with nothing recorded.
                warn!(
                    "Submission {} failed to insert: {err}",
                    submission.submission_hash
                );
                self.delete_submission(&submission).await;
                return Err(err.into());
            }
        }

        let recorded = match self.record(&submission, &voter, &selections).await {
            Ok(recorded) => recorded,
            Err(err) => {
                warn!(
                    "Submission {} failed part way, rolling back: {err}",
                    submission.submission_hash
                );
                self.roll_back(&submission, &selections).await;
                self.audit.record(
                    AuditEvent::new(
                        AuditEventType::SubmissionRolledBack,
                        json!({
                            "submission_hash": submission.submission_hash,
                            "cause": err.to_string(),
                        }),
                        &request,
                    )
                    .election(election.id)
                    .voter(voter.id),
                );
                return Err(err.into());
            }
        };

        for (selection, entry) in selections.iter().zip(&recorded) {
            self.audit.record(
                AuditEvent::new(
                    AuditEventType::VoteCast,
                    json!({
                        "submission_hash": submission.submission_hash,
                        "vote_hash": selection.vote_hash,
                        "position": selection.position,
                        "candidate_id": selection.candidate.id.to_string(),
                        "block_number": entry.block_number,
                    }),
                    &request,
                )
                .election(election.id)
                .voter(voter.id),
            );
        }

        Ok(SubmissionOutcome::Recorded {
            submission_hash,
            votes_recorded: recorded.len(),
        })
    }

    /// Check every selection, in position order. Any bad selection rejects
    /// the whole ballot.
    async fn validate(
        &self,
        election: &Election,
        voter: &EligibleVoter,
        votes: &BTreeMap<String, String>,
    ) -> Result<BTreeMap<String, Candidate>> {
        let mut selected = BTreeMap::new();
        for (position, candidate_id) in votes {
            if !voter.eligible_posts.contains(position) {
                return Err(Error::Validation(format!(
                    "voter {} may not vote for position '{position}'",
                    voter.id
                )));
            }
            let candidate_id = candidate_id.parse::<Id>().map_err(|_| {
                Error::Validation(format!("malformed candidate ID for '{position}'"))
            })?;
            let candidate = within(self.deadline, self.store.candidate(candidate_id))
                .await?
                .ok_or_else(|| Error::Validation(format!("no candidate {candidate_id}")))?;
            if !candidate.accepts(election.id, position) {
                return Err(Error::Validation(format!(
                    "candidate {candidate_id} cannot receive votes for '{position}'"
                )));
            }
            selected.insert(position.clone(), candidate);
        }
        Ok(selected)
    }

    /// Everything after the submission insert: ledger entries, votes, then the
    /// voter's flag.
    async fn record(
        &self,
        submission: &VoteSubmission,
        voter: &EligibleVoter,
        selections: &[Selection],
    ) -> StoreResult<Vec<EncryptedVote>> {
        let voter_public_key = digest::pseudonymous_key(voter.id);
        let mut recorded = Vec::with_capacity(selections.len());
        for selection in selections {
            // The ledger entry goes first: a vote never exists without a block.
            let entry = self
                .ledger
                .record(NewEntry {
                    vote_hash: selection.vote_hash.clone(),
                    election_id: submission.election_id,
                    encrypted_payload: digest::seal_payload(
                        submission.election_id,
                        selection.candidate.id,
                        &voter_public_key,
                        rand::random(),
                    ),
                    voter_public_key: voter_public_key.clone(),
                    timestamp: submission.submitted_at,
                })
                .await?;
            recorded.push(entry);

            let vote = Vote {
                id: Id::new(),
                election_id: submission.election_id,
                voter_id: voter.id,
                candidate_id: selection.candidate.id,
                position: selection.position.clone(),
                submission_hash: submission.submission_hash.clone(),
                vote_hash: selection.vote_hash.clone(),
                created_at: submission.submitted_at,
            };
            within(self.deadline, self.store.insert_vote(&vote)).await?;
        }

        within(
            self.deadline,
            self.store.mark_voted(voter.id, submission.submitted_at),
        )
        .await?;
        Ok(recorded)
    }

    /// Undo a partially recorded submission. Each step is attempted even if
    /// an earlier one failed; failures are logged since the caller is already
    /// getting an error.
    ///
    /// Entries are looked up by hash rather than trusted from `record`, as a
    /// write that timed out may still have landed. For the same reason the
    /// voter's flag is reset even though `record` reported no success.
    async fn roll_back(&self, submission: &VoteSubmission, selections: &[Selection]) {
        if let Err(err) = within(
            self.deadline,
            self.store
                .unmark_voted(submission.voter_id, submission.submitted_at),
        )
        .await
        {
            error!(
                "Could not reset voter {} during rollback: {err}",
                submission.voter_id
            );
        }
        for selection in selections {
            match within(self.deadline, self.store.encrypted_vote(&selection.vote_hash)).await {
                Ok(Some(entry)) => self.ledger.remove(&entry).await,
                Ok(None) => {}
                Err(err) => error!(
                    "Could not look up ledger entry {} during rollback: {err}",
                    selection.vote_hash
                ),
            }
        }
        if let Err(err) = within(
            self.deadline,
            self.store.delete_votes(&submission.submission_hash),
        )
        .await
        {
            error!(
                "Could not delete votes of submission {} during rollback: {err}",
                submission.submission_hash
            );
        }
        self.delete_submission(submission).await;
    }

    /// Remove this attempt's submission, never a concurrent winner's.
    async fn delete_submission(&self, submission: &VoteSubmission) {
        if let Err(err) = within(
            self.deadline,
            self.store.delete_submission(
                submission.election_id,
                submission.voter_id,
                &submission.submission_hash,
            ),
        )
        .await
        {
            error!(
                "Could not delete submission {}: {err}",
                submission.submission_hash
            );
        }
    }

    fn reject(
        &self,
        subject: Option<(&Election, &EligibleVoter)>,
        data: rocket::serde::json::Value,
        request: &RequestMeta,
    ) {
        let mut event = AuditEvent::new(AuditEventType::SubmissionRejected, data, request);
        if let Some((election, voter)) = subject {
            event = event.election(election.id).voter(voter.id);
        }
        self.audit.record(event);
    }
}
