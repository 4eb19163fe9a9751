//! Persistence for the ledger.
//!
//! Every component receives an [`StoreHandle`] at construction. All
//! coordination between concurrent requests happens here, through unique
//! keys and conditional updates, so the components themselves hold no shared
//! mutable state.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rocket::tokio::time::timeout;
use thiserror::Error;

use crate::model::{
    common::{Candidate, Election, EligibleVoter},
    db::{AuditEvent, EncryptedVote, RateLimitWindow, Vote, VoteBlock, VoteSubmission},
    mongodb::Id,
};

mod memory;
mod mongo;

pub use memory::MemoryStore;
pub use mongo::MongoStore;

pub type StoreResult<T> = Result<T, StoreError>;

/// Shared handle to whichever backend the process was configured with.
pub type StoreHandle = Arc<dyn Store>;

#[derive(Debug, Error)]
pub enum StoreError {
    /// A unique key rejected the write.
    #[error("Duplicate key")]
    Duplicate,
    #[error(transparent)]
    Db(#[from] mongodb::error::Error),
    #[error("Record missing: {0}")]
    Missing(String),
    #[error("Store unavailable: {0}")]
    Unavailable(String),
    #[error("Store call exceeded its deadline of {0:?}")]
    Timeout(Duration),
}

/// Run a store call with a bounded deadline.
pub async fn within<T, F>(deadline: Duration, call: F) -> StoreResult<T>
where
    F: Future<Output = StoreResult<T>>,
{
    timeout(deadline, call)
        .await
        .unwrap_or(Err(StoreError::Timeout(deadline)))
}

#[rocket::async_trait]
pub trait Store: Send + Sync {
    // Records owned by the admin flows.

    async fn election(&self, id: Id) -> StoreResult<Option<Election>>;

    /// Find the voter registered for `election_id` under `email` (already
    /// normalized), matching either of their addresses.
    async fn eligible_voter(
        &self,
        election_id: Id,
        email: &str,
    ) -> StoreResult<Option<EligibleVoter>>;

    async fn candidate(&self, id: Id) -> StoreResult<Option<Candidate>>;

    /// Flip `has_voted` and stamp `voted_at`.
    async fn mark_voted(&self, voter_id: Id, at: DateTime<Utc>) -> StoreResult<()>;

    /// Undo [`Store::mark_voted`], but only if `voted_at` is still `at`.
    async fn unmark_voted(&self, voter_id: Id, at: DateTime<Utc>) -> StoreResult<()>;

    // Submissions.

    /// Fails with [`StoreError::Duplicate`] if the voter already has a
    /// submission for the election.
    async fn insert_submission(&self, submission: &VoteSubmission) -> StoreResult<()>;

    /// Delete the voter's submission if it is the one with `submission_hash`.
    async fn delete_submission(
        &self,
        election_id: Id,
        voter_id: Id,
        submission_hash: &str,
    ) -> StoreResult<()>;

    async fn insert_vote(&self, vote: &Vote) -> StoreResult<()>;

    /// Delete every vote produced by the given submission, returning how many went.
    async fn delete_votes(&self, submission_hash: &str) -> StoreResult<u64>;

    // Blocks.

    /// The block with the highest `block_number`.
    async fn latest_block(&self) -> StoreResult<Option<VoteBlock>>;

    async fn block_by_number(&self, block_number: u64) -> StoreResult<Option<VoteBlock>>;

    async fn block_by_id(&self, id: Id) -> StoreResult<Option<VoteBlock>>;

    /// All blocks in `block_number` order.
    async fn blocks(&self) -> StoreResult<Vec<VoteBlock>>;

    /// Fails with [`StoreError::Duplicate`] if the block number is taken.
    async fn insert_block(&self, block: &VoteBlock) -> StoreResult<()>;

    /// Atomically take the next free slot of a block, or `None` if it is full.
    async fn reserve_slot(&self, block_number: u64) -> StoreResult<Option<u32>>;

    /// Atomically increment the block's revision, returning the new value.
    async fn bump_revision(&self, block_number: u64) -> StoreResult<u64>;

    /// Store a recomputed merkle root, unless one computed at a later
    /// revision is already stored. Returns whether the write happened.
    async fn write_block_digest(
        &self,
        block_number: u64,
        merkle_root: &str,
        votes_count: u32,
        revision: u64,
    ) -> StoreResult<bool>;

    // Ledger entries.

    /// Fails with [`StoreError::Duplicate`] if the vote hash is taken.
    async fn insert_encrypted_vote(&self, vote: &EncryptedVote) -> StoreResult<()>;

    async fn encrypted_vote(&self, vote_hash: &str) -> StoreResult<Option<EncryptedVote>>;

    async fn delete_encrypted_vote(&self, vote_hash: &str) -> StoreResult<()>;

    /// Hashes of the entries assigned to a block, in slot order.
    async fn block_vote_hashes(&self, block_number: u64) -> StoreResult<Vec<String>>;

    /// Every ledger entry, ordered by block and slot.
    async fn encrypted_votes(&self) -> StoreResult<Vec<EncryptedVote>>;

    // Audit trail.

    async fn insert_audit_event(&self, event: &AuditEvent) -> StoreResult<()>;

    // Rate limiting.

    async fn find_window(
        &self,
        identifier: &str,
        endpoint: &str,
    ) -> StoreResult<Option<RateLimitWindow>>;

    /// Count a request against a window that started after `active_since`
    /// and still has fewer than `max_requests` requests. Returns the updated
    /// window, or `None` if there is no such window.
    async fn increment_window(
        &self,
        identifier: &str,
        endpoint: &str,
        active_since: DateTime<Utc>,
        max_requests: u32,
    ) -> StoreResult<Option<RateLimitWindow>>;

    /// Open a fresh window at `now` with one request counted, replacing a
    /// window that started at or before `active_since`. Fails with
    /// [`StoreError::Duplicate`] if a live window exists.
    async fn start_window(
        &self,
        identifier: &str,
        endpoint: &str,
        now: DateTime<Utc>,
        active_since: DateTime<Utc>,
    ) -> StoreResult<RateLimitWindow>;
}
