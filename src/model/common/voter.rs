use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime;
use serde::{Deserialize, Serialize};

use crate::model::mongodb::Id;

/// A voter registered for one election.
///
/// `has_voted` and `voted_at` are the only fields the ledger ever writes, and
/// only once all of the voter's ballot has been recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EligibleVoter {
    #[serde(rename = "_id")]
    pub id: Id,
    pub election_id: Id,
    pub name: String,
    pub primary_email: String,
    pub secondary_email: Option<String>,
    /// Positions this voter may vote for.
    pub eligible_posts: BTreeSet<String>,
    pub has_voted: bool,
    #[serde(default, with = "optional_datetime")]
    pub voted_at: Option<DateTime<Utc>>,
}

impl EligibleVoter {
    /// Does either registered address match `email` (already normalized)?
    pub fn has_email(&self, email: &str) -> bool {
        normalize_email(&self.primary_email) == email
            || self
                .secondary_email
                .as_deref()
                .map_or(false, |secondary| normalize_email(secondary) == email)
    }
}

/// Emails are matched case-insensitively, ignoring surrounding whitespace.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

mod optional_datetime {
    use super::*;
    use serde::{Deserializer, Serializer};

    #[derive(Serialize, Deserialize)]
    struct Wrapper(#[serde(with = "chrono_datetime_as_bson_datetime")] DateTime<Utc>);

    pub fn serialize<S: Serializer>(
        value: &Option<DateTime<Utc>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        value.map(Wrapper).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<DateTime<Utc>>, D::Error> {
        Ok(Option::<Wrapper>::deserialize(deserializer)?.map(|w| w.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_either_address() {
        let voter = EligibleVoter {
            id: Id::new(),
            election_id: Id::new(),
            name: "Ada".to_string(),
            primary_email: "Ada@Example.org".to_string(),
            secondary_email: Some("ada.l@uni.example".to_string()),
            eligible_posts: BTreeSet::new(),
            has_voted: false,
            voted_at: None,
        };
        assert!(voter.has_email(&normalize_email(" ada@example.ORG ")));
        assert!(voter.has_email("ada.l@uni.example"));
        assert!(!voter.has_email("someone@else.example"));
    }
}
