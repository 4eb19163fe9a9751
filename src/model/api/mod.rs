//! Request and response bodies of the JSON API.

mod ballot;
mod eligibility;
mod ledger;
mod secure_vote;
mod verification;

pub use ballot::{SubmitVotesRequest, SubmitVotesResponse};
pub use eligibility::{EligibilityRequest, EligibilityResponse};
pub use ledger::{BlockHeader, LedgerDump, LedgerEntry};
pub use secure_vote::{SecureVoteRequest, SecureVoteResponse};
pub use verification::{VerifyVoteRequest, VerifyVoteResponse};
