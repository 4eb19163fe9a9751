//! A simple CLI tool for verifying a vote ledger offline.
//! This uses the internal server verification implementation, and is by definition
//! compatible with the output of our API endpoints.

use std::fmt::{Display, Formatter};
use std::fs::File;
use std::io::BufReader;

use clap::{Arg, ArgAction, ArgMatches, Command};
use rocket::serde::json::serde_json;

use vote_ledger::{
    ledger::{verify_dump, ChainReport, VerificationReport},
    model::api::LedgerDump,
};

const PROGRAM_NAME: &str = "verify-ledger";

const ABOUT_TEXT: &str = "Verify the integrity of a vote ledger.

EXIT CODES:
     0: Verification succeeded.
   255: Ran successfully, but verification failed.
 Other: Error.";

const LEDGER_PATH: &str = "LEDGER_PATH";

const LEDGER_PATH_HELP: &str = "The path to a JSON dump of the ledger,\n\
as returned by `GET /ledger`";

/// Construct the CLI configuration.
fn cli() -> Command {
    // Make the build dirty when the toml changes.
    include_str!("../Cargo.toml");

    clap::command!(PROGRAM_NAME).about(ABOUT_TEXT).arg(
        Arg::new(LEDGER_PATH)
            .help(LEDGER_PATH_HELP)
            .action(ArgAction::Set)
            .required(true),
    )
}

/// Errors that this program may produce.
#[derive(Debug, Eq, PartialEq)]
enum Error {
    /// IO error described by the inner message.
    IO(String),
    /// Failed to decode the JSON dump.
    Format(String),
    /// Verification failed; the report says where.
    Verification(ChainReport),
}

/// One failed vote, listing which checks it failed.
struct FailedVote<'a>(&'a VerificationReport);

impl Display for FailedVote<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let details = &self.0.details;
        let failed = [
            ("block integrity", details.block_integrity),
            ("signature", details.signature_valid),
            ("merkle root", details.merkle_verification),
            ("chain integrity", details.chain_integrity),
        ]
        .into_iter()
        .filter(|(_, passed)| !passed)
        .map(|(check, _)| check)
        .collect::<Vec<_>>();
        match self.0.block_number {
            Some(block) => write!(
                f,
                "Vote {} in block {} failed: {}.",
                self.0.vote_hash,
                block,
                failed.join(", ")
            ),
            None => write!(f, "Vote {} is not in any known block.", self.0.vote_hash),
        }
    }
}

/// Run verification.
fn verify(path: &str) -> Result<ChainReport, Error> {
    // Load the file.
    let file = BufReader::new(File::open(path).map_err(|e| Error::IO(e.to_string()))?);
    let dump: LedgerDump =
        serde_json::from_reader(file).map_err(|e| Error::Format(e.to_string()))?;
    let (blocks, votes) = dump
        .into_records()
        .map_err(|e| Error::Format(e.to_string()))?;

    // Run verification.
    let report = verify_dump(&blocks, &votes);
    if report.verified() {
        Ok(report)
    } else {
        Err(Error::Verification(report))
    }
}

/// Run verification, report the result, and return the exit code.
fn run(args: &ArgMatches) -> u8 {
    let Some(path) = args.get_one::<String>(LEDGER_PATH) else {
        println!("No ledger dump given.");
        return 1;
    };
    match verify(path) {
        Ok(report) => {
            println!("Verification succeeded.");
            println!(
                "{} block{}, {} vote{}.",
                report.blocks,
                if report.blocks != 1 { "s" } else { "" },
                report.votes,
                if report.votes != 1 { "s" } else { "" }
            );
            0
        }
        Err(Error::IO(msg)) => {
            println!("IO error: {}", msg);
            1
        }
        Err(Error::Format(msg)) => {
            println!("Invalid JSON: {}", msg);
            1
        }
        Err(Error::Verification(report)) => {
            println!("Verification failed:");
            for missing in &report.missing_blocks {
                println!("Block {} is missing from the chain.", missing);
            }
            for failure in &report.failures {
                println!("{}", FailedVote(failure));
            }
            255
        }
    }
}

fn main() {
    let args = cli().get_matches();
    let exit_code = run(&args);
    std::process::exit(exit_code.into())
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::Arc;
    use std::time::Duration;

    use vote_ledger::{
        clock::{Clock, ManualClock},
        ledger::{digest, BlockManager, NewEntry},
        model::mongodb::Id,
        store::MemoryStore,
    };

    use super::*;

    /// A ledger of five votes over three blocks.
    async fn ledger() -> MemoryStore {
        let store = MemoryStore::new();
        let clock = ManualClock::default();
        let manager = BlockManager::new(
            Arc::new(store.clone()),
            Arc::new(clock.clone()),
            2,
            Duration::from_secs(1),
        );
        let election_id = Id::new();
        for n in 0..5 {
            manager
                .record(NewEntry {
                    vote_hash: digest::digest(["cli".to_string(), n.to_string()]),
                    election_id,
                    encrypted_payload: digest::digest(["sealed".to_string(), n.to_string()]),
                    voter_public_key: format!("key-{n}"),
                    timestamp: clock.now(),
                })
                .await
                .unwrap();
        }
        store
    }

    /// Write the store's ledger out as `GET /ledger` would.
    fn dump(store: &MemoryStore) -> PathBuf {
        let dump = LedgerDump::new(store.all_blocks(), store.all_entries());
        let path = std::env::temp_dir().join(format!("ledger-{}.json", Id::new()));
        std::fs::write(&path, serde_json::to_string(&dump).unwrap()).unwrap();
        path
    }

    fn run_on(path: &str) -> u8 {
        let args = cli().try_get_matches_from([PROGRAM_NAME, path]).unwrap();
        run(&args)
    }

    #[rocket::async_test]
    async fn verification() {
        // This test actually enters backend code, so enable logging.
        log4rs_test_utils::test_logging::init_logging_once_for(["vote_ledger"], None, None);

        let store = ledger().await;
        let path = dump(&store);
        let report = verify(path.to_str().unwrap()).unwrap();
        assert_eq!((report.blocks, report.votes), (3, 5));
        assert_eq!(run_on(path.to_str().unwrap()), 0);

        store.tamper_block(2, |block| block.merkle_root = digest::digest(["forged"]));
        let path = dump(&store);
        match verify(path.to_str().unwrap()) {
            Err(Error::Verification(report)) => {
                assert_eq!(report.failures.len(), 2);
                assert!(report
                    .failures
                    .iter()
                    .all(|f| f.block_number == Some(2) && !f.details.merkle_verification));
            }
            other => panic!("expected a verification failure, got {other:?}"),
        }
        assert_eq!(run_on(path.to_str().unwrap()), 255);
    }

    #[rocket::async_test]
    async fn missing_block_is_reported() {
        let store = ledger().await;
        let mut dump_value = LedgerDump::new(store.all_blocks(), store.all_entries());
        dump_value.blocks.retain(|b| b.block_number != 2);
        dump_value.votes.retain(|v| v.block_number != 2);
        let path = std::env::temp_dir().join(format!("ledger-{}.json", Id::new()));
        std::fs::write(&path, serde_json::to_string(&dump_value).unwrap()).unwrap();

        match verify(path.to_str().unwrap()) {
            Err(Error::Verification(report)) => {
                assert_eq!(report.missing_blocks, vec![2]);
                // Block 3 no longer links to anything.
                assert_eq!(report.failures.len(), 1);
                assert!(report
                    .failures
                    .iter()
                    .all(|f| f.block_number == Some(3) && !f.details.chain_integrity));
            }
            other => panic!("expected a verification failure, got {other:?}"),
        }
    }

    #[test]
    fn bad_input_is_an_error() {
        let path = std::env::temp_dir().join(format!("ledger-{}.json", Id::new()));
        std::fs::write(&path, "{\"blocks\": 3}").unwrap();
        assert!(matches!(
            verify(path.to_str().unwrap()),
            Err(Error::Format(_))
        ));
        assert_eq!(run_on(path.to_str().unwrap()), 1);
        assert_eq!(run_on("not a real file"), 1);
    }

    #[test]
    fn bad_cli_usage() {
        // Something very wrong.
        let command_line = [PROGRAM_NAME, "this", "invocation", "is", "incorrect"];
        cli().try_get_matches_from(command_line).unwrap_err();

        // No options at all.
        let command_line = [PROGRAM_NAME];
        cli().try_get_matches_from(command_line).unwrap_err();
    }
}
