use chrono::{DateTime, Utc};
use mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime;
use serde::{Deserialize, Serialize};

use crate::model::mongodb::Id;

/// Lifecycle state of an election.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElectionStatus {
    Draft,
    Active,
    Paused,
    Completed,
}

/// An election as seen by the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Election {
    #[serde(rename = "_id")]
    pub id: Id,
    pub title: String,
    pub status: ElectionStatus,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub start_time: DateTime<Utc>,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub end_time: DateTime<Utc>,
}

impl Election {
    /// Is the election accepting ballots at the given instant?
    pub fn is_open_at(&self, now: DateTime<Utc>) -> bool {
        self.status == ElectionStatus::Active && self.start_time <= now && now <= self.end_time
    }
}


#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    #[test]
    fn open_window_is_inclusive() {
        let now = Utc::now();
        let mut election = Election::example_running(now);
        assert!(election.is_open_at(now));
        assert!(election.is_open_at(election.start_time));
        assert!(election.is_open_at(election.end_time));
        assert!(!election.is_open_at(election.end_time + Duration::milliseconds(1)));

        election.status = ElectionStatus::Paused;
        assert!(!election.is_open_at(now));
    }
}
