//! The public, JSON-friendly view of the ledger. Voter identities never
//! appear here; entries carry only their hashes, seals and key.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{
    db::{EncryptedVote, VerificationStatus, VoteBlock},
    mongodb::Id,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockHeader {
    pub id: String,
    pub block_number: u64,
    pub previous_block_hash: String,
    pub block_hash: String,
    pub merkle_root: String,
    pub nonce: u32,
    pub capacity: u32,
    pub votes_count: u32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerEntry {
    pub id: String,
    pub vote_hash: String,
    pub election_id: String,
    pub encrypted_payload: String,
    pub digital_signature: String,
    pub voter_public_key: String,
    pub block_id: String,
    pub block_number: u64,
    pub slot: u32,
    pub timestamp: DateTime<Utc>,
}

/// A full snapshot, as consumed by the verification tool.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LedgerDump {
    pub blocks: Vec<BlockHeader>,
    pub votes: Vec<LedgerEntry>,
}

impl From<VoteBlock> for BlockHeader {
    fn from(block: VoteBlock) -> Self {
        Self {
            id: block.id.to_string(),
            block_number: block.block_number,
            previous_block_hash: block.previous_block_hash,
            block_hash: block.block_hash,
            merkle_root: block.merkle_root,
            nonce: block.nonce,
            capacity: block.capacity,
            votes_count: block.votes_count,
            created_at: block.created_at,
        }
    }
}

impl TryFrom<BlockHeader> for VoteBlock {
    type Error = mongodb::bson::oid::Error;

    /// Rebuild a block for offline checking. Bookkeeping the header does not
    /// carry (slot reservations, revisions) is reconstructed from the count.
    fn try_from(header: BlockHeader) -> Result<Self, Self::Error> {
        Ok(Self {
            id: header.id.parse::<Id>()?,
            block_number: header.block_number,
            previous_block_hash: header.previous_block_hash,
            block_hash: header.block_hash,
            merkle_root: header.merkle_root,
            nonce: header.nonce,
            capacity: header.capacity,
            reserved_slots: header.votes_count,
            votes_count: header.votes_count,
            revision: 0,
            merkle_revision: 0,
            created_at: header.created_at,
        })
    }
}

impl From<EncryptedVote> for LedgerEntry {
    fn from(vote: EncryptedVote) -> Self {
        Self {
            id: vote.id.to_string(),
            vote_hash: vote.vote_hash,
            election_id: vote.election_id.to_string(),
            encrypted_payload: vote.encrypted_payload,
            digital_signature: vote.digital_signature,
            voter_public_key: vote.voter_public_key,
            block_id: vote.block_id.to_string(),
            block_number: vote.block_number,
            slot: vote.slot,
            timestamp: vote.timestamp,
        }
    }
}

impl TryFrom<LedgerEntry> for EncryptedVote {
    type Error = mongodb::bson::oid::Error;

    fn try_from(entry: LedgerEntry) -> Result<Self, Self::Error> {
        Ok(Self {
            id: entry.id.parse::<Id>()?,
            vote_hash: entry.vote_hash,
            election_id: entry.election_id.parse::<Id>()?,
            encrypted_payload: entry.encrypted_payload,
            digital_signature: entry.digital_signature,
            voter_public_key: entry.voter_public_key,
            block_id: entry.block_id.parse::<Id>()?,
            block_number: entry.block_number,
            slot: entry.slot,
            verification_status: VerificationStatus::Pending,
            timestamp: entry.timestamp,
        })
    }
}

impl LedgerDump {
    pub fn new(blocks: Vec<VoteBlock>, votes: Vec<EncryptedVote>) -> Self {
        Self {
            blocks: blocks.into_iter().map(Into::into).collect(),
            votes: votes.into_iter().map(Into::into).collect(),
        }
    }

    /// Convert back into stored form for checking.
    #[allow(clippy::type_complexity)]
    pub fn into_records(
        self,
    ) -> Result<(Vec<VoteBlock>, Vec<EncryptedVote>), mongodb::bson::oid::Error> {
        let blocks = self
            .blocks
            .into_iter()
            .map(VoteBlock::try_from)
            .collect::<Result<_, _>>()?;
        let votes = self
            .votes
            .into_iter()
            .map(EncryptedVote::try_from)
            .collect::<Result<_, _>>()?;
        Ok((blocks, votes))
    }
}
