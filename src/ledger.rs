//! The vote ledger: hash-chained, capacity-bounded blocks of vote records,
//! and the read-only verifier that checks them.

pub mod digest;

mod blocks;
pub use blocks::{BlockManager, NewEntry};

mod verifier;
pub use verifier::{check_entry, verify_dump, ChainReport, VerificationDetails, VerificationReport, VoteVerifier};
