//! Every digest the ledger computes. All of them are SHA-256, rendered as
//! lowercase hex.
//!
//! Multi-field digests feed each field followed by a `|` separator so field
//! boundaries cannot shift. The signature and payload seal are hash-based
//! stand-ins for real asymmetric cryptography: they detect tampering with the
//! stored record, nothing more.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use data_encoding::HEXLOWER;
use rocket::serde::json::Value;
use sha2::{Digest, Sha256};

use crate::model::mongodb::Id;

const SEPARATOR: &[u8] = b"|";

/// Digest of the given fields.
pub fn digest<I, T>(fields: I) -> String
where
    I: IntoIterator<Item = T>,
    T: AsRef<[u8]>,
{
    let mut hasher = Sha256::new();
    for field in fields {
        hasher.update(field.as_ref());
        hasher.update(SEPARATOR);
    }
    HEXLOWER.encode(&hasher.finalize())
}

/// `digest(number | previous_hash | timestamp | nonce)`.
pub fn block_hash(
    block_number: u64,
    previous_hash: &str,
    created_at: DateTime<Utc>,
    nonce: u32,
) -> String {
    digest([
        block_number.to_string(),
        previous_hash.to_string(),
        created_at.timestamp_millis().to_string(),
        nonce.to_string(),
    ])
}

/// Digest over the ordered concatenation of a block's vote hashes.
///
/// Vote hashes are fixed-width, so no separators are needed.
pub fn merkle_root<I, T>(vote_hashes: I) -> String
where
    I: IntoIterator<Item = T>,
    T: AsRef<str>,
{
    let mut hasher = Sha256::new();
    for hash in vote_hashes {
        hasher.update(hash.as_ref().as_bytes());
    }
    HEXLOWER.encode(&hasher.finalize())
}

/// `digest(vote_hash | voter_public_key | timestamp)`.
pub fn signature(vote_hash: &str, voter_public_key: &str, timestamp: DateTime<Utc>) -> String {
    digest([
        vote_hash,
        voter_public_key,
        &timestamp.timestamp_millis().to_string(),
    ])
}

/// Identifies one voter's one-time ballot.
pub fn submission_hash(
    election_id: Id,
    voter_email: &str,
    selections: &BTreeMap<String, Id>,
    timestamp: DateTime<Utc>,
) -> String {
    let serialized = Value::Object(
        selections
            .iter()
            .map(|(position, candidate)| (position.clone(), Value::String(candidate.to_string())))
            .collect(),
    )
    .to_string();
    digest([
        election_id.to_string(),
        voter_email.to_string(),
        serialized,
        timestamp.timestamp_millis().to_string(),
    ])
}

/// `digest(submission_hash | position)`.
pub fn vote_hash(submission_hash: &str, position: &str) -> String {
    digest([submission_hash, position])
}

/// Hash of a vote cast directly against a public key.
pub fn secure_vote_hash(
    election_id: Id,
    candidate_id: Id,
    voter_public_key: &str,
    timestamp: DateTime<Utc>,
    nonce: u64,
) -> String {
    digest([
        election_id.to_string(),
        candidate_id.to_string(),
        voter_public_key.to_string(),
        timestamp.timestamp_millis().to_string(),
        nonce.to_string(),
    ])
}

/// Opaque seal standing in for an encrypted ballot payload.
pub fn seal_payload(
    election_id: Id,
    candidate_id: Id,
    voter_public_key: &str,
    nonce: u64,
) -> String {
    digest([
        election_id.to_string(),
        candidate_id.to_string(),
        voter_public_key.to_string(),
        nonce.to_string(),
    ])
}

/// Stable pseudonymous key for a registered voter, so ballots cast by email
/// get verifiable ledger entries without exposing the voter.
pub fn pseudonymous_key(voter_id: Id) -> String {
    digest(["voter".to_string(), voter_id.to_string()])
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn empty_merkle_root_is_sha256_of_nothing() {
        assert_eq!(
            merkle_root(Vec::<String>::new()),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn lowercase_hex() {
        let hash = digest(["anything"]);
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)));
    }

    #[test]
    fn field_boundaries_matter() {
        assert_ne!(digest(["ab", "c"]), digest(["a", "bc"]));
    }

    #[test]
    fn merkle_root_is_order_sensitive() {
        let a = digest(["a"]);
        let b = digest(["b"]);
        assert_ne!(merkle_root([&a, &b]), merkle_root([&b, &a]));
        assert_eq!(merkle_root([&a, &b]), merkle_root(vec![a.clone(), b.clone()]));
    }

    #[test]
    fn block_hash_covers_every_header_field() {
        let t = Utc.timestamp_millis_opt(1_700_000_000_123).unwrap();
        let base = block_hash(3, "prev", t, 42);
        assert_eq!(base, block_hash(3, "prev", t, 42));
        assert_ne!(base, block_hash(4, "prev", t, 42));
        assert_ne!(base, block_hash(3, "prev2", t, 42));
        assert_ne!(base, block_hash(3, "prev", t + chrono::Duration::milliseconds(1), 42));
        assert_ne!(base, block_hash(3, "prev", t, 43));
    }

    #[test]
    fn submission_hash_ignores_map_insertion_order() {
        let election = Id::new();
        let (c1, c2) = (Id::new(), Id::new());
        let t = Utc.timestamp_millis_opt(1_700_000_000_000).unwrap();

        let mut forward = BTreeMap::new();
        forward.insert("president".to_string(), c1);
        forward.insert("treasurer".to_string(), c2);
        let mut backward = BTreeMap::new();
        backward.insert("treasurer".to_string(), c2);
        backward.insert("president".to_string(), c1);

        assert_eq!(
            submission_hash(election, "a@b.c", &forward, t),
            submission_hash(election, "a@b.c", &backward, t)
        );
        let hash = submission_hash(election, "a@b.c", &forward, t);
        assert_ne!(vote_hash(&hash, "president"), vote_hash(&hash, "treasurer"));
    }
}
