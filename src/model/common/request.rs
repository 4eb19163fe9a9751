use std::convert::Infallible;

use rocket::request::{FromRequest, Outcome, Request};
use serde::{Deserialize, Serialize};

/// Metadata about the HTTP request that caused a write, kept alongside
/// submissions and audit events.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestMeta {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

impl RequestMeta {
    /// The identifier used for per-client rate limiting.
    pub fn client_identifier(&self) -> &str {
        self.ip_address.as_deref().unwrap_or("unknown")
    }
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for RequestMeta {
    type Error = Infallible;

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        Outcome::Success(RequestMeta {
            ip_address: req.client_ip().map(|ip| ip.to_string()),
            user_agent: req.headers().get_one("User-Agent").map(str::to_string),
        })
    }
}
