use chrono::{DateTime, Utc};
use mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime;
use serde::{Deserialize, Serialize};

use crate::ledger::digest;
use crate::model::mongodb::Id;

/// `previous_block_hash` of the genesis block.
pub const GENESIS_PREVIOUS_HASH: &str =
    "0000000000000000000000000000000000000000000000000000000000000000";

/// A capacity-bounded, hash-linked batch of ledger entries.
///
/// A block is OPEN while it has unreserved slots and FULL once every slot is
/// reserved. The header (`block_number`, `previous_block_hash`, `created_at`,
/// `nonce`, `block_hash`) never changes after insertion; only the slot
/// counter and the `merkle_root`/`votes_count` pair move.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteBlock {
    #[serde(rename = "_id")]
    pub id: Id,
    pub block_number: u64,
    pub previous_block_hash: String,
    pub block_hash: String,
    pub merkle_root: String,
    pub nonce: u32,
    pub capacity: u32,
    /// Slots handed out so far; never exceeds `capacity`.
    pub reserved_slots: u32,
    /// Entries actually assigned, as of the last merkle refresh.
    pub votes_count: u32,
    /// Bumped after every change to the block's entries.
    pub revision: u64,
    /// The `revision` the stored `merkle_root` was computed at.
    pub merkle_revision: u64,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
}

impl VoteBlock {
    /// Build the block that follows `previous`, or the genesis block.
    ///
    /// `created_at` must already be truncated to milliseconds, since that is
    /// all the store keeps and the block hash covers it.
    pub fn following(
        previous: Option<&VoteBlock>,
        capacity: u32,
        created_at: DateTime<Utc>,
        nonce: u32,
    ) -> Self {
        let (block_number, previous_block_hash) = match previous {
            Some(prev) => (prev.block_number + 1, prev.block_hash.clone()),
            None => (1, GENESIS_PREVIOUS_HASH.to_string()),
        };
        let block_hash = digest::block_hash(block_number, &previous_block_hash, created_at, nonce);
        Self {
            id: Id::new(),
            block_number,
            previous_block_hash,
            block_hash,
            merkle_root: digest::merkle_root(std::iter::empty::<&str>()),
            nonce,
            capacity,
            reserved_slots: 0,
            votes_count: 0,
            revision: 0,
            merkle_revision: 0,
            created_at,
        }
    }

    pub fn is_full(&self) -> bool {
        self.reserved_slots >= self.capacity
    }

    pub fn is_genesis(&self) -> bool {
        self.block_number == 1
    }
}

#[cfg(test)]
mod tests {
    use chrono::SubsecRound;

    use super::*;

    #[test]
    fn chain_links() {
        let now = Utc::now().trunc_subsecs(3);
        let genesis = VoteBlock::following(None, 2, now, 7);
        assert_eq!(genesis.block_number, 1);
        assert_eq!(genesis.previous_block_hash, GENESIS_PREVIOUS_HASH);
        assert!(genesis.is_genesis());
        assert!(!genesis.is_full());

        let second = VoteBlock::following(Some(&genesis), 2, now, 7);
        assert_eq!(second.block_number, 2);
        assert_eq!(second.previous_block_hash, genesis.block_hash);
        assert_ne!(second.block_hash, genesis.block_hash);
    }
}
