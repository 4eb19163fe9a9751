use chrono::{DateTime, Utc};
use mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime;
use serde::{Deserialize, Serialize};

use crate::model::{common::RequestMeta, mongodb::Id};

/// A voter's one-time ballot for an election.
///
/// There is at most one of these per `(election_id, voter_id)`; the unique
/// index on that pair is what makes voting exactly-once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteSubmission {
    #[serde(rename = "_id")]
    pub id: Id,
    pub election_id: Id,
    pub voter_id: Id,
    pub submission_hash: String,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub submitted_at: DateTime<Utc>,
    pub request: RequestMeta,
}

/// One selection within a submission: a candidate for a position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vote {
    #[serde(rename = "_id")]
    pub id: Id,
    pub election_id: Id,
    pub voter_id: Id,
    pub candidate_id: Id,
    pub position: String,
    /// Foreign key into the submission that produced this vote.
    pub submission_hash: String,
    /// `digest(submission_hash | position)`, also the key of the vote's ledger record.
    pub vote_hash: String,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
}
