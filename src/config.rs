use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Duration;
use log::{error, info};
use mongodb::Client as MongoClient;
use rocket::{
    fairing::{Fairing, Info, Kind},
    Build, Rocket,
};
use serde::Deserialize;

use crate::{
    audit::AuditLogger,
    clock::ClockHandle,
    ledger::{BlockManager, VoteVerifier},
    model::mongodb::ensure_indexes_exist,
    rate_limit::RateLimiter,
    store::{MemoryStore, MongoStore, StoreHandle},
    voting::{EligibilityChecker, SecureVoteService, SubmissionCoordinator},
};

/// Application configuration, derived from `Rocket.toml` and `ROCKET_*`
/// environment variables. This struct becomes managed state and can be
/// inspected by any endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "defaults::block_capacity")]
    block_capacity: u32,
    #[serde(default = "defaults::rate_limit_max_requests")]
    rate_limit_max_requests: u32,
    #[serde(default = "defaults::rate_limit_window_secs")]
    rate_limit_window_secs: u32,
    #[serde(default = "defaults::store_deadline_ms")]
    store_deadline_ms: u64,
    #[serde(default = "defaults::audit_queue_size")]
    audit_queue_size: usize,
}

mod defaults {
    pub fn block_capacity() -> u32 {
        100
    }

    pub fn rate_limit_max_requests() -> u32 {
        10
    }

    pub fn rate_limit_window_secs() -> u32 {
        60
    }

    pub fn store_deadline_ms() -> u64 {
        5000
    }

    pub fn audit_queue_size() -> usize {
        1024
    }
}

impl Config {
    /// Votes per block. Only affects blocks created from now on.
    pub fn block_capacity(&self) -> u32 {
        self.block_capacity
    }

    /// Requests allowed per client, per endpoint, per window.
    pub fn rate_limit_max_requests(&self) -> u32 {
        self.rate_limit_max_requests
    }

    /// Length of a rate limiting window.
    pub fn rate_limit_window(&self) -> Duration {
        Duration::seconds(self.rate_limit_window_secs.into())
    }

    /// Deadline for any single store call.
    pub fn store_deadline(&self) -> StdDuration {
        StdDuration::from_millis(self.store_deadline_ms)
    }

    /// Audit events that may wait for the writer before new ones are dropped.
    pub fn audit_queue_size(&self) -> usize {
        self.audit_queue_size
    }
}

/// A fairing that loads the application config and puts it in managed state.
/// This could easily be achieved using `AdHoc::config`, but is written out
/// explicitly for symmetry with the other fairings and control over error
/// messages.
pub struct ConfigFairing;

#[rocket::async_trait]
impl Fairing for ConfigFairing {
    fn info(&self) -> Info {
        Info {
            name: "Config",
            kind: Kind::Ignite,
        }
    }

    async fn on_ignite(&self, mut rocket: Rocket<Build>) -> rocket::fairing::Result {
        // Load the config.
        let config = match rocket.figment().extract::<Config>() {
            Ok(config) => config,
            Err(e) => {
                error!("Failed to load application config");
                rocket::config::pretty_print_error(e);
                return Err(rocket);
            }
        };
        info!("Blocks hold {} votes", config.block_capacity());

        // Manage the state.
        rocket = rocket.manage(config);
        Ok(rocket)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
enum StoreBackend {
    #[default]
    MongoDb,
    Memory,
}

/// Configuration for the database.
#[derive(Deserialize)]
struct DbConfig {
    #[serde(default)]
    store_backend: StoreBackend,
    // secrets
    db_uri: Option<String>,
    #[serde(default = "default_db_name")]
    db_name: String,
}

fn default_db_name() -> String {
    "vote_ledger".to_string()
}

/// A fairing that loads the store config, connects to the database,
/// performs any setup necessary, and places a [`StoreHandle`] into managed
/// state.
pub struct DatabaseFairing;

#[rocket::async_trait]
impl Fairing for DatabaseFairing {
    fn info(&self) -> Info {
        Info {
            name: "Store",
            kind: Kind::Ignite,
        }
    }

    async fn on_ignite(&self, mut rocket: Rocket<Build>) -> rocket::fairing::Result {
        // Load the config.
        let config = match rocket.figment().extract::<DbConfig>() {
            Ok(config) => config,
            Err(e) => {
                error!("Failed to load database config");
                rocket::config::pretty_print_error(e);
                return Err(rocket);
            }
        };

        let store: StoreHandle = match config.store_backend {
            StoreBackend::Memory => {
                info!("Using the in-memory store; nothing will be persisted");
                Arc::new(MemoryStore::new())
            }
            StoreBackend::MongoDb => {
                let Some(db_uri) = config.db_uri else {
                    error!("`db_uri` must be set for the MongoDB store");
                    return Err(rocket);
                };
                info!("Loaded database config, connecting...");
                // Construct the connection.
                let client = match MongoClient::with_uri_str(db_uri).await {
                    Ok(client) => client,
                    Err(e) => {
                        error!("Failed to connect to database: {e}");
                        return Err(rocket);
                    }
                };
                let db = client.database(&config.db_name);

                // Ensure the required indexes exist.
                if let Err(e) = ensure_indexes_exist(&db).await {
                    error!("Failed to connect to database: {e}");
                    return Err(rocket);
                }
                info!("...database connection online!");
                Arc::new(MongoStore::new(db))
            }
        };

        // Manage the state.
        rocket = rocket.manage(store);
        Ok(rocket)
    }
}

/// A fairing that builds every ledger component from the config, the store
/// and the clock, and places each into managed state. Must be attached after
/// [`ConfigFairing`] and after the store has been provided.
pub struct LedgerFairing;

#[rocket::async_trait]
impl Fairing for LedgerFairing {
    fn info(&self) -> Info {
        Info {
            name: "Ledger",
            kind: Kind::Ignite,
        }
    }

    async fn on_ignite(&self, rocket: Rocket<Build>) -> rocket::fairing::Result {
        let config = rocket.state::<Config>().cloned();
        let store = rocket.state::<StoreHandle>().cloned();
        let clock = rocket.state::<ClockHandle>().cloned();
        let (Some(config), Some(store), Some(clock)) = (config, store, clock) else {
            error!("Ledger components need the config, a store and a clock");
            return Err(rocket);
        };
        let deadline = config.store_deadline();

        let limiter = RateLimiter::new(
            store.clone(),
            clock.clone(),
            config.rate_limit_max_requests(),
            config.rate_limit_window(),
            deadline,
        );
        let audit = AuditLogger::spawn(store.clone(), config.audit_queue_size(), deadline);
        let ledger = BlockManager::new(
            store.clone(),
            clock.clone(),
            config.block_capacity(),
            deadline,
        );
        let eligibility = EligibilityChecker::new(
            store.clone(),
            clock.clone(),
            limiter.clone(),
            audit.clone(),
            deadline,
        );
        let coordinator = SubmissionCoordinator::new(
            store.clone(),
            clock.clone(),
            limiter.clone(),
            audit.clone(),
            eligibility.clone(),
            ledger.clone(),
            deadline,
        );
        let secure = SecureVoteService::new(
            store.clone(),
            clock,
            limiter.clone(),
            audit.clone(),
            ledger,
            deadline,
        );
        let verifier = VoteVerifier::new(store, audit.clone(), deadline);
        info!("Ledger components ready");

        Ok(rocket
            .manage(limiter)
            .manage(audit)
            .manage(eligibility)
            .manage(coordinator)
            .manage(secure)
            .manage(verifier))
    }
}

#[cfg(test)]
mod tests {
    use rocket::figment::Figment;

    use super::*;

    #[test]
    fn defaults_apply() {
        let config: Config = Figment::new().extract().unwrap();
        assert_eq!(config.block_capacity(), 100);
        assert_eq!(config.rate_limit_max_requests(), 10);
        assert_eq!(config.rate_limit_window(), Duration::seconds(60));
        assert_eq!(config.store_deadline(), StdDuration::from_secs(5));
        assert_eq!(config.audit_queue_size(), 1024);
    }

    #[test]
    fn overrides_apply() {
        let config: Config = Figment::new()
            .merge(("block_capacity", 2))
            .merge(("store_backend", "memory"))
            .extract()
            .unwrap();
        assert_eq!(config.block_capacity(), 2);

        let db: DbConfig = Figment::new()
            .merge(("store_backend", "memory"))
            .extract()
            .unwrap();
        assert_eq!(db.store_backend, StoreBackend::Memory);
        assert!(db.db_uri.is_none());
        assert_eq!(db.db_name, "vote_ledger");
    }
}
