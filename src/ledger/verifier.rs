use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::warn;
use rocket::serde::json::json;
use serde::Serialize;

use super::digest;
use crate::{
    audit::AuditLogger,
    model::{
        common::RequestMeta,
        db::{AuditEvent, AuditEventType, EncryptedVote, VoteBlock},
    },
    store::{within, StoreHandle, StoreResult},
};

/// Outcome of each independent integrity check on one vote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationDetails {
    pub vote_exists: bool,
    /// The block header still hashes to its stored `block_hash`.
    pub block_integrity: bool,
    /// The simplified signature over the vote matches.
    pub signature_valid: bool,
    /// The block's stored merkle root matches its current entries.
    pub merkle_verification: bool,
    /// The block's `previous_block_hash` is its predecessor's hash.
    pub chain_integrity: bool,
}

impl VerificationDetails {
    pub fn verified(&self) -> bool {
        self.vote_exists
            && self.block_integrity
            && self.signature_valid
            && self.merkle_verification
            && self.chain_integrity
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationReport {
    pub vote_hash: String,
    pub block_number: Option<u64>,
    pub timestamp: Option<DateTime<Utc>>,
    pub details: VerificationDetails,
}

impl VerificationReport {
    pub fn verified(&self) -> bool {
        self.details.verified()
    }
}

/// Run every check on one entry.
///
/// `block` is the block the entry claims, `block_hashes` that block's current
/// entries in slot order and `predecessor` the block numbered one lower. This
/// is the one implementation of the checks, shared by the server and the
/// offline verification tool.
pub fn check_entry(
    entry: &EncryptedVote,
    block: Option<&VoteBlock>,
    block_hashes: &[String],
    predecessor: Option<&VoteBlock>,
) -> VerificationDetails {
    let signature_valid = digest::signature(&entry.vote_hash, &entry.voter_public_key, entry.timestamp)
        == entry.digital_signature;

    let block = match block {
        Some(block) => block,
        None => {
            return VerificationDetails {
                vote_exists: true,
                signature_valid,
                ..Default::default()
            }
        }
    };

    let block_integrity = digest::block_hash(
        block.block_number,
        &block.previous_block_hash,
        block.created_at,
        block.nonce,
    ) == block.block_hash;

    let merkle_verification = block_hashes.iter().any(|hash| *hash == entry.vote_hash)
        && digest::merkle_root(block_hashes) == block.merkle_root;

    let chain_integrity = block.is_genesis()
        || predecessor.map_or(false, |prev| {
            prev.block_number + 1 == block.block_number
                && prev.block_hash == block.previous_block_hash
        });

    VerificationDetails {
        vote_exists: true,
        block_integrity,
        signature_valid,
        merkle_verification,
        chain_integrity,
    }
}

/// Recomputes every integrity property of a vote from the stored ledger.
/// Never writes to the ledger.
#[derive(Clone)]
pub struct VoteVerifier {
    store: StoreHandle,
    audit: AuditLogger,
    deadline: Duration,
}

impl VoteVerifier {
    pub fn new(store: StoreHandle, audit: AuditLogger, deadline: Duration) -> Self {
        Self {
            store,
            audit,
            deadline,
        }
    }

    pub async fn verify(
        &self,
        vote_hash: &str,
        request: &RequestMeta,
    ) -> StoreResult<VerificationReport> {
        let report = self.inspect(vote_hash).await?;
        if report.details.vote_exists && !report.verified() {
            warn!(
                "Integrity failure on vote {vote_hash} in block {:?}: {:?}",
                report.block_number, report.details
            );
        }

        let event = AuditEvent::new(
            AuditEventType::VoteVerified,
            json!({
                "vote_hash": vote_hash,
                "verified": report.verified(),
                "block_number": report.block_number,
                "details": report.details,
            }),
            request,
        );
        self.audit.record(event);

        Ok(report)
    }

    async fn inspect(&self, vote_hash: &str) -> StoreResult<VerificationReport> {
        let entry = match within(self.deadline, self.store.encrypted_vote(vote_hash)).await? {
            Some(entry) => entry,
            None => {
                return Ok(VerificationReport {
                    vote_hash: vote_hash.to_string(),
                    block_number: None,
                    timestamp: None,
                    details: VerificationDetails::default(),
                })
            }
        };

        let block = within(self.deadline, self.store.block_by_id(entry.block_id)).await?;
        let (hashes, predecessor) = match &block {
            Some(block) => {
                let hashes = within(
                    self.deadline,
                    self.store.block_vote_hashes(block.block_number),
                )
                .await?;
                let predecessor = match block.block_number {
                    0 | 1 => None,
                    n => within(self.deadline, self.store.block_by_number(n - 1)).await?,
                };
                (hashes, predecessor)
            }
            None => (Vec::new(), None),
        };

        let details = check_entry(&entry, block.as_ref(), &hashes, predecessor.as_ref());
        Ok(VerificationReport {
            vote_hash: entry.vote_hash,
            block_number: block.map(|b| b.block_number),
            timestamp: Some(entry.timestamp),
            details,
        })
    }
}

/// Result of checking a whole ledger offline.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ChainReport {
    pub blocks: usize,
    pub votes: usize,
    /// Block numbers missing from an otherwise contiguous sequence from 1.
    pub missing_blocks: Vec<u64>,
    /// Votes that failed at least one check.
    pub failures: Vec<VerificationReport>,
}

impl ChainReport {
    pub fn verified(&self) -> bool {
        self.missing_blocks.is_empty() && self.failures.is_empty()
    }
}

/// Check every entry of a full ledger snapshot, plus block numbering.
pub fn verify_dump(blocks: &[VoteBlock], entries: &[EncryptedVote]) -> ChainReport {
    let by_number: HashMap<u64, &VoteBlock> =
        blocks.iter().map(|b| (b.block_number, b)).collect();
    let by_id: HashMap<_, &VoteBlock> = blocks.iter().map(|b| (b.id, b)).collect();

    let highest = blocks.iter().map(|b| b.block_number).max().unwrap_or(0);
    let missing_blocks = (1..=highest)
        .filter(|n| !by_number.contains_key(n))
        .collect();

    let mut hashes_by_block: HashMap<u64, Vec<(u32, String)>> = HashMap::new();
    for entry in entries {
        hashes_by_block
            .entry(entry.block_number)
            .or_default()
            .push((entry.slot, entry.vote_hash.clone()));
    }
    let hashes_by_block: HashMap<u64, Vec<String>> = hashes_by_block
        .into_iter()
        .map(|(number, mut hashes)| {
            hashes.sort();
            (number, hashes.into_iter().map(|(_, hash)| hash).collect())
        })
        .collect();

    let failures = entries
        .iter()
        .filter_map(|entry| {
            let block = by_id.get(&entry.block_id).copied();
            let hashes = block
                .and_then(|b| hashes_by_block.get(&b.block_number))
                .map(Vec::as_slice)
                .unwrap_or_default();
            let predecessor = block
                .filter(|b| b.block_number > 1)
                .and_then(|b| by_number.get(&(b.block_number - 1)).copied());
            let details = check_entry(entry, block, hashes, predecessor);
            (!details.verified()).then(|| VerificationReport {
                vote_hash: entry.vote_hash.clone(),
                block_number: block.map(|b| b.block_number),
                timestamp: Some(entry.timestamp),
                details,
            })
        })
        .collect();

    ChainReport {
        blocks: blocks.len(),
        votes: entries.len(),
        missing_blocks,
        failures,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::ledger::{BlockManager, NewEntry};
    use crate::model::mongodb::Id;
    use crate::store::MemoryStore;

    struct Fixture {
        store: MemoryStore,
        verifier: VoteVerifier,
        hashes: Vec<String>,
    }

    /// Five votes in blocks of two.
    async fn fixture() -> Fixture {
        let store = MemoryStore::new();
        let handle: StoreHandle = Arc::new(store.clone());
        let clock = ManualClock::default();
        let blocks = BlockManager::new(
            handle.clone(),
            Arc::new(clock.clone()),
            2,
            Duration::from_secs(1),
        );
        let mut hashes = Vec::new();
        for n in 0..5 {
            let vote_hash = digest::digest(["vote".to_string(), n.to_string()]);
            blocks
                .record(NewEntry {
                    vote_hash: vote_hash.clone(),
                    election_id: Id::new(),
                    encrypted_payload: "sealed".to_string(),
                    voter_public_key: format!("key-{n}"),
                    timestamp: clock.now(),
                })
                .await
                .unwrap();
            hashes.push(vote_hash);
            clock.advance(chrono::Duration::milliseconds(250));
        }
        let audit = AuditLogger::spawn(handle.clone(), 64, Duration::from_secs(1));
        let verifier = VoteVerifier::new(handle, audit, Duration::from_secs(1));
        Fixture {
            store,
            verifier,
            hashes,
        }
    }

    async fn details(fixture: &Fixture, n: usize) -> VerificationDetails {
        fixture
            .verifier
            .verify(&fixture.hashes[n], &RequestMeta::default())
            .await
            .unwrap()
            .details
    }

    fn all_true() -> VerificationDetails {
        VerificationDetails {
            vote_exists: true,
            block_integrity: true,
            signature_valid: true,
            merkle_verification: true,
            chain_integrity: true,
        }
    }

    #[rocket::async_test]
    async fn honest_ledger_verifies() {
        let fixture = fixture().await;
        for n in 0..5 {
            let report = fixture
                .verifier
                .verify(&fixture.hashes[n], &RequestMeta::default())
                .await
                .unwrap();
            assert!(report.verified(), "vote {n}: {:?}", report.details);
            assert_eq!(report.block_number, Some(n as u64 / 2 + 1));
        }
    }

    #[rocket::async_test]
    async fn unknown_vote() {
        let fixture = fixture().await;
        let report = fixture
            .verifier
            .verify(&digest::digest(["nope"]), &RequestMeta::default())
            .await
            .unwrap();
        assert!(!report.verified());
        assert_eq!(report.details, VerificationDetails::default());
        assert_eq!(report.block_number, None);
    }

    #[rocket::async_test]
    async fn forged_signature_flips_only_signature() {
        let fixture = fixture().await;
        fixture.store.tamper_entry(&fixture.hashes[2], |e| {
            e.digital_signature = digest::digest(["forged"]);
        });
        let expected = VerificationDetails {
            signature_valid: false,
            ..all_true()
        };
        assert_eq!(details(&fixture, 2).await, expected);
        assert_eq!(details(&fixture, 3).await, all_true());
    }

    #[rocket::async_test]
    async fn altered_block_hash_flips_only_block_integrity() {
        let fixture = fixture().await;
        fixture.store.tamper_block(2, |b| {
            b.block_hash = digest::digest(["forged"]);
        });
        let expected = VerificationDetails {
            block_integrity: false,
            ..all_true()
        };
        assert_eq!(details(&fixture, 2).await, expected);
        assert_eq!(details(&fixture, 3).await, expected);
        assert_eq!(details(&fixture, 0).await, all_true());
    }

    #[rocket::async_test]
    async fn altered_merkle_root_flips_only_merkle() {
        let fixture = fixture().await;
        fixture.store.tamper_block(2, |b| {
            b.merkle_root = digest::digest(["forged"]);
        });
        let expected = VerificationDetails {
            merkle_verification: false,
            ..all_true()
        };
        assert_eq!(details(&fixture, 2).await, expected);
        assert_eq!(details(&fixture, 4).await, all_true());
    }

    #[rocket::async_test]
    async fn relinked_block_flips_only_chain_integrity() {
        let fixture = fixture().await;
        // Point block 2 somewhere else and reseal its header, as a forger would.
        fixture.store.tamper_block(2, |b| {
            b.previous_block_hash = digest::digest(["elsewhere"]);
            b.block_hash =
                digest::block_hash(b.block_number, &b.previous_block_hash, b.created_at, b.nonce);
        });
        let expected = VerificationDetails {
            chain_integrity: false,
            ..all_true()
        };
        assert_eq!(details(&fixture, 2).await, expected);
        assert_eq!(details(&fixture, 0).await, all_true());
    }

    #[rocket::async_test]
    async fn raw_previous_hash_edit_breaks_header_too() {
        let fixture = fixture().await;
        fixture.store.tamper_block(3, |b| {
            b.previous_block_hash = digest::digest(["elsewhere"]);
        });
        let details = details(&fixture, 4).await;
        assert!(!details.chain_integrity);
        assert!(!details.block_integrity);
        assert!(details.signature_valid && details.merkle_verification);
    }

    #[rocket::async_test]
    async fn removed_entry_breaks_merkle() {
        let fixture = fixture().await;
        // Rewriting a sibling's hash changes the block's entry set.
        fixture.store.tamper_entry(&fixture.hashes[1], |e| {
            e.vote_hash = digest::digest(["swapped"]);
        });
        assert!(!details(&fixture, 0).await.merkle_verification);
    }

    #[rocket::async_test]
    async fn offline_dump_check() {
        let fixture = fixture().await;
        let blocks = fixture.store.all_blocks();
        let entries = fixture.store.all_entries();
        let report = verify_dump(&blocks, &entries);
        assert!(report.verified());
        assert_eq!((report.blocks, report.votes), (3, 5));

        // Drop the middle block.
        let gapped: Vec<_> = blocks
            .iter()
            .filter(|b| b.block_number != 2)
            .cloned()
            .collect();
        let report = verify_dump(&gapped, &entries);
        assert_eq!(report.missing_blocks, vec![2]);
        assert!(!report.verified());
        // Votes of block 2 lose their block; block 3 loses its predecessor.
        assert_eq!(report.failures.len(), 3);
    }
}
