use chrono::{DateTime, Utc};
use mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime;
use serde::{Deserialize, Serialize};

use crate::model::mongodb::Id;

/// Verification state recorded on a ledger entry. Verification itself never
/// writes, so entries keep the state they were recorded with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    Pending,
}

/// A vote's ledger record: its sealed payload, its simplified signature and
/// its place in the block chain.
///
/// The "encryption" and "signature" here are hash-based stand-ins, not real
/// asymmetric cryptography.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedVote {
    #[serde(rename = "_id")]
    pub id: Id,
    pub vote_hash: String,
    pub election_id: Id,
    pub encrypted_payload: String,
    pub digital_signature: String,
    pub voter_public_key: String,
    pub block_id: Id,
    pub block_number: u64,
    /// Position within the block; merkle roots are computed in slot order.
    pub slot: u32,
    pub verification_status: VerificationStatus,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub timestamp: DateTime<Utc>,
}
