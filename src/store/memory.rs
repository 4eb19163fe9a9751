use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rocket::tokio::{task, time::sleep};

use super::{Store, StoreError, StoreResult};
use crate::model::{
    common::{Candidate, Election, EligibleVoter},
    db::{AuditEvent, EncryptedVote, RateLimitWindow, Vote, VoteBlock, VoteSubmission},
    mongodb::Id,
};

/// An in-process store with the same semantics as [`super::MongoStore`].
///
/// One mutex stands in for MongoDB's per-document atomicity. Every call
/// yields to the scheduler before touching state, so concurrent flows
/// interleave between store calls much as they would against a real
/// database.
///
/// Besides backing local development, this is the store tests run against:
/// it can be seeded with the records the admin flows would own, tampered
/// with, slowed down, and told to fail specific operations. A write can also
/// be told to land and then stall, which is how a deadline firing after the
/// database already applied a write looks to the caller.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
}

#[derive(Default)]
struct State {
    elections: HashMap<Id, Election>,
    voters: HashMap<Id, EligibleVoter>,
    candidates: HashMap<Id, Candidate>,
    submissions: HashMap<(Id, Id), VoteSubmission>,
    votes: HashMap<String, Vote>,
    blocks: BTreeMap<u64, VoteBlock>,
    entries: HashMap<String, EncryptedVote>,
    audit: Vec<AuditEvent>,
    windows: HashMap<(String, String), RateLimitWindow>,
    /// Remaining injected failures per operation name.
    faults: HashMap<&'static str, u32>,
    /// Injected latency per operation name.
    latency: HashMap<&'static str, Duration>,
    /// One-shot stalls after the write of an operation is applied.
    stalls: HashMap<&'static str, Duration>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        // A panic while holding the lock cannot leave a half-applied write
        // behind, so poisoning carries no information here.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Common prologue of every operation: yield, apply injected latency,
    /// then apply any injected failure.
    async fn enter(&self, op: &'static str) -> StoreResult<()> {
        task::yield_now().await;
        let delay = self.state().latency.get(op).copied();
        if let Some(delay) = delay {
            sleep(delay).await;
        }
        let mut state = self.state();
        if let Some(remaining) = state.faults.get_mut(op) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(StoreError::Unavailable(format!("injected failure in {op}")));
            }
        }
        Ok(())
    }

    /// Common epilogue of every write: apply any injected stall, with the
    /// write's effects already visible.
    async fn settle<T>(&self, op: &'static str, result: StoreResult<T>) -> StoreResult<T> {
        let stall = self.state().stalls.remove(op);
        if let Some(stall) = stall {
            sleep(stall).await;
        }
        result
    }

    // Seeding, standing in for the external admin flows.

    pub fn insert_election(&self, election: Election) {
        self.state().elections.insert(election.id, election);
    }

    pub fn insert_eligible_voter(&self, voter: EligibleVoter) {
        self.state().voters.insert(voter.id, voter);
    }

    pub fn insert_candidate(&self, candidate: Candidate) {
        self.state().candidates.insert(candidate.id, candidate);
    }

    // Fault injection.

    /// Make the next `times` calls of operation `op` fail.
    pub fn fail(&self, op: &'static str, times: u32) {
        self.state().faults.insert(op, times);
    }

    /// Delay every call of operation `op`.
    pub fn delay(&self, op: &'static str, by: Duration) {
        self.state().latency.insert(op, by);
    }

    /// Let the next call of write operation `op` apply its write, then stall
    /// for `by` before returning.
    pub fn stall(&self, op: &'static str, by: Duration) {
        self.state().stalls.insert(op, by);
    }

    // Inspection and tampering.

    pub fn eligible_voter_by_id(&self, id: Id) -> Option<EligibleVoter> {
        self.state().voters.get(&id).cloned()
    }

    pub fn submissions(&self) -> Vec<VoteSubmission> {
        self.state().submissions.values().cloned().collect()
    }

    pub fn votes(&self) -> Vec<Vote> {
        self.state().votes.values().cloned().collect()
    }

    pub fn audit_events(&self) -> Vec<AuditEvent> {
        self.state().audit.clone()
    }

    pub fn all_blocks(&self) -> Vec<VoteBlock> {
        self.state().blocks.values().cloned().collect()
    }

    pub fn all_entries(&self) -> Vec<EncryptedVote> {
        let mut entries: Vec<_> = self.state().entries.values().cloned().collect();
        entries.sort_by_key(|e| (e.block_number, e.slot));
        entries
    }

    /// Rewrite a stored block in place.
    pub fn tamper_block(&self, block_number: u64, edit: impl FnOnce(&mut VoteBlock)) {
        if let Some(block) = self.state().blocks.get_mut(&block_number) {
            edit(block);
        }
    }

    /// Rewrite a stored ledger entry in place.
    pub fn tamper_entry(&self, vote_hash: &str, edit: impl FnOnce(&mut EncryptedVote)) {
        if let Some(entry) = self.state().entries.get_mut(vote_hash) {
            edit(entry);
        }
    }
}

#[rocket::async_trait]
impl Store for MemoryStore {
    async fn election(&self, id: Id) -> StoreResult<Option<Election>> {
        self.enter("election").await?;
        Ok(self.state().elections.get(&id).cloned())
    }

    async fn eligible_voter(
        &self,
        election_id: Id,
        email: &str,
    ) -> StoreResult<Option<EligibleVoter>> {
        self.enter("eligible_voter").await?;
        Ok(self
            .state()
            .voters
            .values()
            .find(|v| v.election_id == election_id && v.has_email(email))
            .cloned())
    }

    async fn candidate(&self, id: Id) -> StoreResult<Option<Candidate>> {
        self.enter("candidate").await?;
        Ok(self.state().candidates.get(&id).cloned())
    }

    async fn mark_voted(&self, voter_id: Id, at: DateTime<Utc>) -> StoreResult<()> {
        self.enter("mark_voted").await?;
        let result = {
            let mut state = self.state();
            match state.voters.get_mut(&voter_id) {
                Some(voter) => {
                    voter.has_voted = true;
                    voter.voted_at = Some(at);
                    Ok(())
                }
                None => Err(StoreError::Missing(format!("Eligible voter {voter_id}"))),
            }
        };
        self.settle("mark_voted", result).await
    }

    async fn unmark_voted(&self, voter_id: Id, at: DateTime<Utc>) -> StoreResult<()> {
        self.enter("unmark_voted").await?;
        {
            let mut state = self.state();
            if let Some(voter) = state.voters.get_mut(&voter_id) {
                if voter.voted_at == Some(at) {
                    voter.has_voted = false;
                    voter.voted_at = None;
                }
            }
        }
        self.settle("unmark_voted", Ok(())).await
    }

    async fn insert_submission(&self, submission: &VoteSubmission) -> StoreResult<()> {
        self.enter("insert_submission").await?;
        let result = {
            let mut state = self.state();
            let key = (submission.election_id, submission.voter_id);
            if state.submissions.contains_key(&key) {
                Err(StoreError::Duplicate)
            } else {
                state.submissions.insert(key, submission.clone());
                Ok(())
            }
        };
        self.settle("insert_submission", result).await
    }

    async fn delete_submission(
        &self,
        election_id: Id,
        voter_id: Id,
        submission_hash: &str,
    ) -> StoreResult<()> {
        self.enter("delete_submission").await?;
        {
            let mut state = self.state();
            let key = (election_id, voter_id);
            if state
                .submissions
                .get(&key)
                .map_or(false, |s| s.submission_hash == submission_hash)
            {
                state.submissions.remove(&key);
            }
        }
        self.settle("delete_submission", Ok(())).await
    }

    async fn insert_vote(&self, vote: &Vote) -> StoreResult<()> {
        self.enter("insert_vote").await?;
        let result = {
            let mut state = self.state();
            if state.votes.contains_key(&vote.vote_hash) {
                Err(StoreError::Duplicate)
            } else {
                state.votes.insert(vote.vote_hash.clone(), vote.clone());
                Ok(())
            }
        };
        self.settle("insert_vote", result).await
    }

    async fn delete_votes(&self, submission_hash: &str) -> StoreResult<u64> {
        self.enter("delete_votes").await?;
        let mut state = self.state();
        let before = state.votes.len();
        state
            .votes
            .retain(|_, vote| vote.submission_hash != submission_hash);
        Ok((before - state.votes.len()) as u64)
    }

    async fn latest_block(&self) -> StoreResult<Option<VoteBlock>> {
        self.enter("latest_block").await?;
        Ok(self.state().blocks.values().next_back().cloned())
    }

    async fn block_by_number(&self, block_number: u64) -> StoreResult<Option<VoteBlock>> {
        self.enter("block_by_number").await?;
        Ok(self.state().blocks.get(&block_number).cloned())
    }

    async fn block_by_id(&self, id: Id) -> StoreResult<Option<VoteBlock>> {
        self.enter("block_by_id").await?;
        Ok(self.state().blocks.values().find(|b| b.id == id).cloned())
    }

    async fn blocks(&self) -> StoreResult<Vec<VoteBlock>> {
        self.enter("blocks").await?;
        Ok(self.all_blocks())
    }

    async fn insert_block(&self, block: &VoteBlock) -> StoreResult<()> {
        self.enter("insert_block").await?;
        let mut state = self.state();
        if state.blocks.contains_key(&block.block_number) {
            return Err(StoreError::Duplicate);
        }
        state.blocks.insert(block.block_number, block.clone());
        Ok(())
    }

    async fn reserve_slot(&self, block_number: u64) -> StoreResult<Option<u32>> {
        self.enter("reserve_slot").await?;
        let mut state = self.state();
        Ok(state
            .blocks
            .get_mut(&block_number)
            .filter(|block| !block.is_full())
            .map(|block| {
                block.reserved_slots += 1;
                block.reserved_slots - 1
            }))
    }

    async fn bump_revision(&self, block_number: u64) -> StoreResult<u64> {
        self.enter("bump_revision").await?;
        let mut state = self.state();
        let block = state
            .blocks
            .get_mut(&block_number)
            .ok_or_else(|| StoreError::Missing(format!("Block {block_number}")))?;
        block.revision += 1;
        Ok(block.revision)
    }

    async fn write_block_digest(
        &self,
        block_number: u64,
        merkle_root: &str,
        votes_count: u32,
        revision: u64,
    ) -> StoreResult<bool> {
        self.enter("write_block_digest").await?;
        let mut state = self.state();
        match state.blocks.get_mut(&block_number) {
            Some(block) if block.merkle_revision < revision => {
                block.merkle_root = merkle_root.to_string();
                block.votes_count = votes_count;
                block.merkle_revision = revision;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn insert_encrypted_vote(&self, vote: &EncryptedVote) -> StoreResult<()> {
        self.enter("insert_encrypted_vote").await?;
        let result = {
            let mut state = self.state();
            if state.entries.contains_key(&vote.vote_hash) {
                Err(StoreError::Duplicate)
            } else {
                state.entries.insert(vote.vote_hash.clone(), vote.clone());
                Ok(())
            }
        };
        self.settle("insert_encrypted_vote", result).await
    }

    async fn encrypted_vote(&self, vote_hash: &str) -> StoreResult<Option<EncryptedVote>> {
        self.enter("encrypted_vote").await?;
        Ok(self.state().entries.get(vote_hash).cloned())
    }

    async fn delete_encrypted_vote(&self, vote_hash: &str) -> StoreResult<()> {
        self.enter("delete_encrypted_vote").await?;
        self.state().entries.remove(vote_hash);
        self.settle("delete_encrypted_vote", Ok(())).await
    }

    async fn block_vote_hashes(&self, block_number: u64) -> StoreResult<Vec<String>> {
        self.enter("block_vote_hashes").await?;
        let state = self.state();
        let mut entries: Vec<_> = state
            .entries
            .values()
            .filter(|e| e.block_number == block_number)
            .collect();
        entries.sort_by_key(|e| e.slot);
        Ok(entries.into_iter().map(|e| e.vote_hash.clone()).collect())
    }

    async fn encrypted_votes(&self) -> StoreResult<Vec<EncryptedVote>> {
        self.enter("encrypted_votes").await?;
        Ok(self.all_entries())
    }

    async fn insert_audit_event(&self, event: &AuditEvent) -> StoreResult<()> {
        self.enter("insert_audit_event").await?;
        self.state().audit.push(event.clone());
        Ok(())
    }

    async fn find_window(
        &self,
        identifier: &str,
        endpoint: &str,
    ) -> StoreResult<Option<RateLimitWindow>> {
        self.enter("find_window").await?;
        let key = (identifier.to_string(), endpoint.to_string());
        Ok(self.state().windows.get(&key).cloned())
    }

    async fn increment_window(
        &self,
        identifier: &str,
        endpoint: &str,
        active_since: DateTime<Utc>,
        max_requests: u32,
    ) -> StoreResult<Option<RateLimitWindow>> {
        self.enter("increment_window").await?;
        let key = (identifier.to_string(), endpoint.to_string());
        let mut state = self.state();
        Ok(state
            .windows
            .get_mut(&key)
            .filter(|w| w.window_start > active_since && w.request_count < max_requests)
            .map(|window| {
                window.request_count += 1;
                window.clone()
            }))
    }

    async fn start_window(
        &self,
        identifier: &str,
        endpoint: &str,
        now: DateTime<Utc>,
        active_since: DateTime<Utc>,
    ) -> StoreResult<RateLimitWindow> {
        self.enter("start_window").await?;
        let key = (identifier.to_string(), endpoint.to_string());
        let mut state = self.state();
        if let Some(live) = state.windows.get(&key) {
            if live.window_start > active_since {
                return Err(StoreError::Duplicate);
            }
        }
        let window = RateLimitWindow {
            identifier: identifier.to_string(),
            endpoint: endpoint.to_string(),
            window_start: now,
            request_count: 1,
        };
        state.windows.insert(key, window.clone());
        Ok(window)
    }
}
