use serde::{Deserialize, Serialize};

use crate::voting::{Eligibility, IneligibleReason};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EligibilityRequest {
    pub election_id: String,
    pub voter_email: String,
}

/// Either `{eligible: false, reason}` or the voter's profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EligibilityResponse {
    Eligible {
        eligible: bool,
        election_id: String,
        election_title: String,
        eligible_posts: Vec<String>,
        voter_name: String,
        voter_email: String,
    },
    Ineligible {
        eligible: bool,
        reason: IneligibleReason,
    },
}

impl From<Eligibility> for EligibilityResponse {
    fn from(eligibility: Eligibility) -> Self {
        match eligibility {
            Eligibility::Ineligible(reason) => Self::Ineligible {
                eligible: false,
                reason,
            },
            Eligibility::Eligible { voter, election } => Self::Eligible {
                eligible: true,
                election_id: election.id.to_string(),
                election_title: election.title,
                eligible_posts: voter.eligible_posts.into_iter().collect(),
                voter_name: voter.name,
                voter_email: voter.primary_email,
            },
        }
    }
}
