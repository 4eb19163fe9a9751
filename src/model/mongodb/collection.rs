use std::ops::Deref;

use log::debug;
use mongodb::{
    bson::doc, error::Error as DbError, options::IndexOptions, Collection, Database, IndexModel,
};

use crate::model::{
    common::{Candidate, Election, EligibleVoter},
    db::{AuditEvent, EncryptedVote, RateLimitWindow, Vote, VoteBlock, VoteSubmission},
};

/// A type that can be directly inserted/read to/from the database.
pub trait MongoCollection {
    /// The name of the collection.
    const NAME: &'static str;
}

/// A database collection of the given type.
pub struct Coll<T>(Collection<T>);

impl<T> Coll<T>
where
    T: MongoCollection,
{
    /// Get a handle on this collection in the given database.
    pub fn from_db(db: &Database) -> Self {
        Self(db.collection(T::NAME))
    }
}

// `Derive(Clone)` would only derive if `T: Clone`, but we don't need that bound.
impl<T> Clone for Coll<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T> Deref for Coll<T> {
    type Target = Collection<T>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

// Collections maintained by the admin flows.
impl MongoCollection for Election {
    const NAME: &'static str = "elections";
}
impl MongoCollection for EligibleVoter {
    const NAME: &'static str = "eligible_voters";
}
impl MongoCollection for Candidate {
    const NAME: &'static str = "candidates";
}

// Collections written by the ledger.
impl MongoCollection for VoteSubmission {
    const NAME: &'static str = "vote_submissions";
}
impl MongoCollection for Vote {
    const NAME: &'static str = "votes";
}
impl MongoCollection for EncryptedVote {
    const NAME: &'static str = "encrypted_votes";
}
impl MongoCollection for VoteBlock {
    const NAME: &'static str = "vote_blocks";
}
impl MongoCollection for AuditEvent {
    const NAME: &'static str = "audit_logs";
}
impl MongoCollection for RateLimitWindow {
    const NAME: &'static str = "rate_limits";
}

/// Ensure that all the required indexes exist on the given database.
///
/// The unique indexes here are load-bearing: they are what makes voting
/// exactly-once and block numbers unambiguous.
///
/// This operation is idempotent.
pub async fn ensure_indexes_exist(db: &Database) -> Result<(), DbError> {
    debug!("Ensuring collection indexes exist");

    let unique = IndexOptions::builder().unique(true).build();

    // One submission per voter per election.
    let submission_index = IndexModel::builder()
        .keys(doc! {"election_id": 1, "voter_id": 1})
        .options(unique.clone())
        .build();
    Coll::<VoteSubmission>::from_db(db)
        .create_index(submission_index, None)
        .await?;

    // One vote per position per submission.
    let vote_index = IndexModel::builder()
        .keys(doc! {"vote_hash": 1})
        .options(unique.clone())
        .build();
    Coll::<Vote>::from_db(db)
        .create_index(vote_index, None)
        .await?;

    // Ledger entries: unique hash, and ordered lookup within a block.
    let entry_index = IndexModel::builder()
        .keys(doc! {"vote_hash": 1})
        .options(unique.clone())
        .build();
    let slot_index = IndexModel::builder()
        .keys(doc! {"block_number": 1, "slot": 1})
        .options(unique.clone())
        .build();
    Coll::<EncryptedVote>::from_db(db)
        .create_indexes([entry_index, slot_index], None)
        .await?;

    // Block numbers are allocated by conditional insert against this index.
    let block_index = IndexModel::builder()
        .keys(doc! {"block_number": 1})
        .options(unique.clone())
        .build();
    Coll::<VoteBlock>::from_db(db)
        .create_index(block_index, None)
        .await?;

    // One live window per client per endpoint.
    let window_index = IndexModel::builder()
        .keys(doc! {"identifier": 1, "endpoint": 1})
        .options(unique)
        .build();
    Coll::<RateLimitWindow>::from_db(db)
        .create_index(window_index, None)
        .await?;

    Ok(())
}
