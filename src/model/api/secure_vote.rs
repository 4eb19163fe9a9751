use serde::{Deserialize, Serialize};

use crate::model::db::EncryptedVote;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecureVoteRequest {
    pub election_id: String,
    pub candidate_id: String,
    pub voter_public_key: String,
}

/// Receipt for a vote cast against a public key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecureVoteResponse {
    pub vote_hash: String,
    pub block_id: String,
    pub block_number: u64,
    pub digital_signature: String,
}

impl From<EncryptedVote> for SecureVoteResponse {
    fn from(vote: EncryptedVote) -> Self {
        Self {
            vote_hash: vote.vote_hash,
            block_id: vote.block_id.to_string(),
            block_number: vote.block_number,
            digital_signature: vote.digital_signature,
        }
    }
}
