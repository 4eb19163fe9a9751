//! DB-compatible (e.g. de/serialisable) types written by the ledger.
//!
//! The types in this module are serialised in an DB-friendly way, e.g.:
//!
//! - IDs and datetimes are serialised in MongoDB's own format.

mod audit;
pub use audit::{AuditEvent, AuditEventType};

mod block;
pub use block::{VoteBlock, GENESIS_PREVIOUS_HASH};

mod encrypted_vote;
pub use encrypted_vote::{EncryptedVote, VerificationStatus};

mod rate_limit;
pub use rate_limit::RateLimitWindow;

mod submission;
pub use submission::{Vote, VoteSubmission};
