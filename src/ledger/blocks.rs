use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, error, warn};

use super::digest;
use crate::{
    clock::ClockHandle,
    model::{
        db::{EncryptedVote, VerificationStatus, VoteBlock},
        mongodb::Id,
    },
    store::{within, StoreError, StoreHandle, StoreResult},
};

/// Attempts at finding an open block before giving up. Each failed attempt
/// means another writer filled or created a block in between, so running
/// out takes sustained, extreme contention.
const MAX_ATTEMPTS: usize = 16;

/// A vote record ready for the ledger, minus its block placement.
#[derive(Debug, Clone)]
pub struct NewEntry {
    pub vote_hash: String,
    pub election_id: Id,
    pub encrypted_payload: String,
    pub voter_public_key: String,
    /// Millisecond precision; covered by the signature.
    pub timestamp: DateTime<Utc>,
}

/// Maintains the block chain and assigns every ledger entry to exactly one
/// block.
///
/// Block numbers are allocated by conditional insert: two writers racing to
/// roll over both try to insert block `n + 1`, the store's unique key on
/// `block_number` lets exactly one through, and the loser retries against the
/// block that won. Slots within a block are handed out by atomic reservation,
/// so a block never takes more than its capacity.
#[derive(Clone)]
pub struct BlockManager {
    store: StoreHandle,
    clock: ClockHandle,
    capacity: u32,
    deadline: Duration,
}

impl BlockManager {
    pub fn new(store: StoreHandle, clock: ClockHandle, capacity: u32, deadline: Duration) -> Self {
        Self {
            store,
            clock,
            capacity: capacity.max(1),
            deadline,
        }
    }

    /// The open block with the highest number, creating it (or the genesis
    /// block) if the latest block is full.
    pub async fn current_block(&self) -> StoreResult<VoteBlock> {
        for _ in 0..MAX_ATTEMPTS {
            let latest = within(self.deadline, self.store.latest_block()).await?;
            if let Some(block) = &latest {
                if !block.is_full() {
                    return Ok(block.clone());
                }
            }

            let block = VoteBlock::following(
                latest.as_ref(),
                self.capacity,
                self.clock.now(),
                rand::random(),
            );
            match within(self.deadline, self.store.insert_block(&block)).await {
                Ok(()) => {
                    debug!(
                        "Opened block {} ({}), capacity {}",
                        block.block_number, block.block_hash, block.capacity
                    );
                    return Ok(block);
                }
                Err(StoreError::Duplicate) => {
                    debug!(
                        "Lost race to open block {}, retrying",
                        block.block_number
                    );
                }
                Err(err) => return Err(err),
            }
        }
        Err(StoreError::Unavailable(
            "could not obtain an open block".to_string(),
        ))
    }

    /// Persist an entry in the current block and refresh the block's merkle
    /// root.
    ///
    /// On error the entry is not in the ledger. A slot reserved for an entry
    /// that then failed to persist stays unused.
    pub async fn record(&self, entry: NewEntry) -> StoreResult<EncryptedVote> {
        for _ in 0..MAX_ATTEMPTS {
            let block = self.current_block().await?;
            let slot = match within(self.deadline, self.store.reserve_slot(block.block_number))
                .await?
            {
                Some(slot) => slot,
                // Filled up since we read it.
                None => continue,
            };

            let record = EncryptedVote {
                id: Id::new(),
                digital_signature: digest::signature(
                    &entry.vote_hash,
                    &entry.voter_public_key,
                    entry.timestamp,
                ),
                vote_hash: entry.vote_hash,
                election_id: entry.election_id,
                encrypted_payload: entry.encrypted_payload,
                voter_public_key: entry.voter_public_key,
                block_id: block.id,
                block_number: block.block_number,
                slot,
                verification_status: VerificationStatus::Pending,
                timestamp: entry.timestamp,
            };
            match within(self.deadline, self.store.insert_encrypted_vote(&record)).await {
                Ok(()) => {}
                Err(StoreError::Duplicate) => return Err(StoreError::Duplicate),
                Err(err) => {
                    // The insert may have landed before the error surfaced.
                    warn!(
                        "Insert of {} into block {} failed: {err}",
                        record.vote_hash, block.block_number
                    );
                    self.remove(&record).await;
                    return Err(err);
                }
            }

            if let Err(err) = self.refresh(block.block_number).await {
                // Keep the merkle root honest: take the entry back out.
                warn!(
                    "Could not refresh block {} after adding {}: {err}",
                    block.block_number, record.vote_hash
                );
                self.remove(&record).await;
                return Err(err);
            }
            return Ok(record);
        }
        Err(StoreError::Unavailable(
            "could not reserve a block slot".to_string(),
        ))
    }

    /// Take an entry back out of the ledger. Used to compensate a failed
    /// multi-step write; failures are logged, as there is nobody left to
    /// report them to.
    ///
    /// The block is refreshed even if the delete failed, so its merkle root
    /// matches whatever entries it ends up holding.
    pub async fn remove(&self, record: &EncryptedVote) {
        if let Err(err) = within(
            self.deadline,
            self.store.delete_encrypted_vote(&record.vote_hash),
        )
        .await
        {
            error!("Failed to remove ledger entry {}: {err}", record.vote_hash);
        }
        if let Err(err) = self.refresh(record.block_number).await {
            error!(
                "Failed to refresh block {} after removing {}: {err}",
                record.block_number, record.vote_hash
            );
        }
    }

    /// Recompute and store a block's merkle root and vote count.
    ///
    /// Bumping the revision before reading means the refresh with the highest
    /// revision saw every change completed before it, and the store only
    /// accepts a digest newer than the one it holds.
    async fn refresh(&self, block_number: u64) -> StoreResult<()> {
        let revision = within(self.deadline, self.store.bump_revision(block_number)).await?;
        let hashes = within(self.deadline, self.store.block_vote_hashes(block_number)).await?;
        let root = digest::merkle_root(&hashes);
        let written = within(
            self.deadline,
            self.store
                .write_block_digest(block_number, &root, hashes.len() as u32, revision),
        )
        .await?;
        if !written {
            debug!("Merkle refresh of block {block_number} at revision {revision} superseded");
        }
        Ok(())
    }
}
