use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ledger::{VerificationDetails, VerificationReport};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyVoteRequest {
    pub vote_hash: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyVoteResponse {
    pub verified: bool,
    pub block_number: Option<u64>,
    pub timestamp: Option<DateTime<Utc>>,
    pub verification_details: VerificationDetails,
}

impl From<VerificationReport> for VerifyVoteResponse {
    fn from(report: VerificationReport) -> Self {
        Self {
            verified: report.verified(),
            block_number: report.block_number,
            timestamp: report.timestamp,
            verification_details: report.details,
        }
    }
}
