use chrono::{DateTime, Utc};
use mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime;
use serde::{Deserialize, Serialize};

/// The request counter for one `(identifier, endpoint)` pair in its current
/// fixed window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitWindow {
    pub identifier: String,
    pub endpoint: String,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub window_start: DateTime<Utc>,
    pub request_count: u32,
}
