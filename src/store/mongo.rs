use chrono::{DateTime, Utc};
use mongodb::{
    bson::{doc, DateTime as BsonDateTime},
    options::{
        Collation, CollationStrength, FindOneAndUpdateOptions, FindOneOptions, FindOptions,
        ReturnDocument,
    },
    Database,
};
use rocket::futures::TryStreamExt;

use super::{Store, StoreError, StoreResult};
use crate::model::{
    common::{Candidate, Election, EligibleVoter},
    db::{AuditEvent, EncryptedVote, RateLimitWindow, Vote, VoteBlock, VoteSubmission},
    mongodb::{is_duplicate_key_error, Coll, Id},
};

/// The production store, backed by MongoDB.
///
/// Atomicity comes from MongoDB's single-document guarantees: unique indexes
/// (see [`crate::model::mongodb::ensure_indexes_exist`]) and
/// `findOneAndUpdate` with conditional filters.
pub struct MongoStore {
    db: Database,
}

impl MongoStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    fn coll<T: crate::model::mongodb::MongoCollection>(&self) -> Coll<T> {
        Coll::from_db(&self.db)
    }
}

/// Map duplicate key errors onto [`StoreError::Duplicate`].
fn insert_result<T>(result: Result<T, mongodb::error::Error>) -> StoreResult<()> {
    match result {
        Ok(_) => Ok(()),
        Err(err) if is_duplicate_key_error(&err) => Err(StoreError::Duplicate),
        Err(err) => Err(err.into()),
    }
}

fn after_update() -> FindOneAndUpdateOptions {
    FindOneAndUpdateOptions::builder()
        .return_document(ReturnDocument::After)
        .build()
}

#[rocket::async_trait]
impl Store for MongoStore {
    async fn election(&self, id: Id) -> StoreResult<Option<Election>> {
        Ok(self.coll::<Election>().find_one(id.as_doc(), None).await?)
    }

    async fn eligible_voter(
        &self,
        election_id: Id,
        email: &str,
    ) -> StoreResult<Option<EligibleVoter>> {
        let filter = doc! {
            "election_id": election_id,
            "$or": [{"primary_email": email}, {"secondary_email": email}],
        };
        // Case-insensitive match, whatever casing the admin flows stored.
        let collation = Collation::builder()
            .locale("en")
            .strength(CollationStrength::Secondary)
            .build();
        let options = FindOneOptions::builder().collation(collation).build();
        Ok(self
            .coll::<EligibleVoter>()
            .find_one(filter, options)
            .await?)
    }

    async fn candidate(&self, id: Id) -> StoreResult<Option<Candidate>> {
        Ok(self.coll::<Candidate>().find_one(id.as_doc(), None).await?)
    }

    async fn mark_voted(&self, voter_id: Id, at: DateTime<Utc>) -> StoreResult<()> {
        let update = doc! {
            "$set": {"has_voted": true, "voted_at": BsonDateTime::from_chrono(at)},
        };
        let result = self
            .coll::<EligibleVoter>()
            .update_one(voter_id.as_doc(), update, None)
            .await?;
        if result.matched_count == 0 {
            return Err(StoreError::Missing(format!("Eligible voter {voter_id}")));
        }
        Ok(())
    }

    async fn unmark_voted(&self, voter_id: Id, at: DateTime<Utc>) -> StoreResult<()> {
        let filter = doc! {"_id": voter_id, "voted_at": BsonDateTime::from_chrono(at)};
        let update = doc! {
            "$set": {"has_voted": false},
            "$unset": {"voted_at": ""},
        };
        self.coll::<EligibleVoter>()
            .update_one(filter, update, None)
            .await?;
        Ok(())
    }

    async fn insert_submission(&self, submission: &VoteSubmission) -> StoreResult<()> {
        insert_result(
            self.coll::<VoteSubmission>()
                .insert_one(submission, None)
                .await,
        )
    }

    async fn delete_submission(
        &self,
        election_id: Id,
        voter_id: Id,
        submission_hash: &str,
    ) -> StoreResult<()> {
        let filter = doc! {
            "election_id": election_id,
            "voter_id": voter_id,
            "submission_hash": submission_hash,
        };
        self.coll::<VoteSubmission>()
            .delete_one(filter, None)
            .await?;
        Ok(())
    }

    async fn insert_vote(&self, vote: &Vote) -> StoreResult<()> {
        insert_result(self.coll::<Vote>().insert_one(vote, None).await)
    }

    async fn delete_votes(&self, submission_hash: &str) -> StoreResult<u64> {
        let filter = doc! {"submission_hash": submission_hash};
        let result = self.coll::<Vote>().delete_many(filter, None).await?;
        Ok(result.deleted_count)
    }

    async fn latest_block(&self) -> StoreResult<Option<VoteBlock>> {
        let options = FindOneOptions::builder()
            .sort(doc! {"block_number": -1})
            .build();
        Ok(self.coll::<VoteBlock>().find_one(None, options).await?)
    }

    async fn block_by_number(&self, block_number: u64) -> StoreResult<Option<VoteBlock>> {
        let filter = doc! {"block_number": block_number as i64};
        Ok(self.coll::<VoteBlock>().find_one(filter, None).await?)
    }

    async fn block_by_id(&self, id: Id) -> StoreResult<Option<VoteBlock>> {
        Ok(self.coll::<VoteBlock>().find_one(id.as_doc(), None).await?)
    }

    async fn blocks(&self) -> StoreResult<Vec<VoteBlock>> {
        let options = FindOptions::builder().sort(doc! {"block_number": 1}).build();
        Ok(self
            .coll::<VoteBlock>()
            .find(None, options)
            .await?
            .try_collect()
            .await?)
    }

    async fn insert_block(&self, block: &VoteBlock) -> StoreResult<()> {
        insert_result(self.coll::<VoteBlock>().insert_one(block, None).await)
    }

    async fn reserve_slot(&self, block_number: u64) -> StoreResult<Option<u32>> {
        let filter = doc! {
            "block_number": block_number as i64,
            "$expr": {"$lt": ["$reserved_slots", "$capacity"]},
        };
        let update = doc! {"$inc": {"reserved_slots": 1}};
        let block = self
            .coll::<VoteBlock>()
            .find_one_and_update(filter, update, after_update())
            .await?;
        // The slot taken is the one before the new count.
        Ok(block.map(|block| block.reserved_slots - 1))
    }

    async fn bump_revision(&self, block_number: u64) -> StoreResult<u64> {
        let filter = doc! {"block_number": block_number as i64};
        let update = doc! {"$inc": {"revision": 1}};
        self.coll::<VoteBlock>()
            .find_one_and_update(filter, update, after_update())
            .await?
            .map(|block| block.revision)
            .ok_or_else(|| StoreError::Missing(format!("Block {block_number}")))
    }

    async fn write_block_digest(
        &self,
        block_number: u64,
        merkle_root: &str,
        votes_count: u32,
        revision: u64,
    ) -> StoreResult<bool> {
        let filter = doc! {
            "block_number": block_number as i64,
            "merkle_revision": {"$lt": revision as i64},
        };
        let update = doc! {
            "$set": {
                "merkle_root": merkle_root,
                "votes_count": votes_count,
                "merkle_revision": revision as i64,
            }
        };
        let result = self
            .coll::<VoteBlock>()
            .update_one(filter, update, None)
            .await?;
        Ok(result.modified_count == 1)
    }

    async fn insert_encrypted_vote(&self, vote: &EncryptedVote) -> StoreResult<()> {
        insert_result(self.coll::<EncryptedVote>().insert_one(vote, None).await)
    }

    async fn encrypted_vote(&self, vote_hash: &str) -> StoreResult<Option<EncryptedVote>> {
        let filter = doc! {"vote_hash": vote_hash};
        Ok(self.coll::<EncryptedVote>().find_one(filter, None).await?)
    }

    async fn delete_encrypted_vote(&self, vote_hash: &str) -> StoreResult<()> {
        let filter = doc! {"vote_hash": vote_hash};
        self.coll::<EncryptedVote>()
            .delete_one(filter, None)
            .await?;
        Ok(())
    }

    async fn block_vote_hashes(&self, block_number: u64) -> StoreResult<Vec<String>> {
        let filter = doc! {"block_number": block_number as i64};
        let options = FindOptions::builder().sort(doc! {"slot": 1}).build();
        Ok(self
            .coll::<EncryptedVote>()
            .find(filter, options)
            .await?
            .map_ok(|vote| vote.vote_hash)
            .try_collect()
            .await?)
    }

    async fn encrypted_votes(&self) -> StoreResult<Vec<EncryptedVote>> {
        let options = FindOptions::builder()
            .sort(doc! {"block_number": 1, "slot": 1})
            .build();
        Ok(self
            .coll::<EncryptedVote>()
            .find(None, options)
            .await?
            .try_collect()
            .await?)
    }

    async fn insert_audit_event(&self, event: &AuditEvent) -> StoreResult<()> {
        self.coll::<AuditEvent>().insert_one(event, None).await?;
        Ok(())
    }

    async fn find_window(
        &self,
        identifier: &str,
        endpoint: &str,
    ) -> StoreResult<Option<RateLimitWindow>> {
        let filter = doc! {"identifier": identifier, "endpoint": endpoint};
        Ok(self
            .coll::<RateLimitWindow>()
            .find_one(filter, None)
            .await?)
    }

    async fn increment_window(
        &self,
        identifier: &str,
        endpoint: &str,
        active_since: DateTime<Utc>,
        max_requests: u32,
    ) -> StoreResult<Option<RateLimitWindow>> {
        let filter = doc! {
            "identifier": identifier,
            "endpoint": endpoint,
            "window_start": {"$gt": BsonDateTime::from_chrono(active_since)},
            "request_count": {"$lt": max_requests},
        };
        let update = doc! {"$inc": {"request_count": 1}};
        Ok(self
            .coll::<RateLimitWindow>()
            .find_one_and_update(filter, update, after_update())
            .await?)
    }

    async fn start_window(
        &self,
        identifier: &str,
        endpoint: &str,
        now: DateTime<Utc>,
        active_since: DateTime<Utc>,
    ) -> StoreResult<RateLimitWindow> {
        // Only an expired window matches; if a live one exists the upsert
        // collides with the unique index instead.
        let filter = doc! {
            "identifier": identifier,
            "endpoint": endpoint,
            "window_start": {"$lte": BsonDateTime::from_chrono(active_since)},
        };
        let update = doc! {
            "$set": {"window_start": BsonDateTime::from_chrono(now), "request_count": 1},
        };
        let options = FindOneAndUpdateOptions::builder()
            .upsert(true)
            .return_document(ReturnDocument::After)
            .build();
        match self
            .coll::<RateLimitWindow>()
            .find_one_and_update(filter, update, options)
            .await
        {
            Ok(Some(window)) => Ok(window),
            Ok(None) => Err(StoreError::Missing(format!(
                "Rate limit window for {identifier} on {endpoint}"
            ))),
            Err(err) if is_duplicate_key_error(&err) => Err(StoreError::Duplicate),
            Err(err) => Err(err.into()),
        }
    }
}
