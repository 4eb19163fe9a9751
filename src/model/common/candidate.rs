use serde::{Deserialize, Serialize};

use crate::model::mongodb::Id;

/// Review state of a candidate. Only approved candidates can receive votes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateStatus {
    Pending,
    Approved,
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    #[serde(rename = "_id")]
    pub id: Id,
    pub election_id: Id,
    pub name: String,
    /// The post this candidate is standing for.
    pub position: String,
    pub status: CandidateStatus,
}

impl Candidate {
    /// Can this candidate receive a vote for `position` in `election_id`?
    pub fn accepts(&self, election_id: Id, position: &str) -> bool {
        self.election_id == election_id
            && self.status == CandidateStatus::Approved
            && self.position == position
    }
}
