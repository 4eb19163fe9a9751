//! Records owned by the external admin flows. The ledger only reads these.

mod candidate;
mod election;
mod request;
mod voter;

pub use candidate::{Candidate, CandidateStatus};
pub use election::{Election, ElectionStatus};
pub use request::RequestMeta;
pub use voter::{normalize_email, EligibleVoter};
