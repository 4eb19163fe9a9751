use chrono::{DateTime, Utc};
use mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime;
use rocket::serde::json::Value;
use serde::{Deserialize, Serialize};

use crate::model::{common::RequestMeta, mongodb::Id};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    EligibilityChecked,
    VoteCast,
    SubmissionRejected,
    SubmissionRolledBack,
    SecureVoteCast,
    VoteVerified,
    RateLimitExceeded,
}

/// An immutable audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    #[serde(rename = "_id")]
    pub id: Id,
    pub event_type: AuditEventType,
    pub election_id: Option<Id>,
    pub voter_id: Option<Id>,
    pub event_data: Value,
    pub request: RequestMeta,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub timestamp: DateTime<Utc>,
}

impl AuditEvent {
    pub fn new(event_type: AuditEventType, event_data: Value, request: &RequestMeta) -> Self {
        Self {
            id: Id::new(),
            event_type,
            election_id: None,
            voter_id: None,
            event_data,
            request: request.clone(),
            timestamp: Utc::now(),
        }
    }

    pub fn election(mut self, election_id: Id) -> Self {
        self.election_id = Some(election_id);
        self
    }

    pub fn voter(mut self, voter_id: Id) -> Self {
        self.voter_id = Some(voter_id);
        self
    }
}
