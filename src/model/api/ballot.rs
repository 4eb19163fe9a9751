use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::voting::{IneligibleReason, SubmissionOutcome};

/// A whole ballot: one candidate ID per position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitVotesRequest {
    pub election_id: String,
    pub votes: BTreeMap<String, String>,
    pub voter_email: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SubmitVotesResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub submission_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub votes_recorded: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<IneligibleReason>,
}

impl From<SubmissionOutcome> for SubmitVotesResponse {
    fn from(outcome: SubmissionOutcome) -> Self {
        match outcome {
            SubmissionOutcome::Recorded {
                submission_hash,
                votes_recorded,
            } => Self {
                success: true,
                submission_hash: Some(submission_hash),
                votes_recorded: Some(votes_recorded),
                ..Default::default()
            },
            SubmissionOutcome::AlreadyVoted => Self {
                error: Some("already_voted".to_string()),
                ..Default::default()
            },
            SubmissionOutcome::NotEligible(reason) => Self {
                error: Some("not_eligible".to_string()),
                reason: Some(reason),
                ..Default::default()
            },
        }
    }
}
