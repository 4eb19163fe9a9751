#[macro_use]
extern crate rocket;

#[cfg(test)]
#[macro_use]
extern crate backend_test;

use std::sync::Arc;

use rocket::{figment::Figment, Build, Rocket};

use crate::{
    api::cors::Cors,
    clock::{ClockHandle, SystemClock},
    config::{ConfigFairing, DatabaseFairing, LedgerFairing},
    logging::LoggerFairing,
    store::StoreHandle,
};

pub mod api;
pub mod audit;
pub mod clock;
pub mod config;
pub mod error;
pub mod ledger;
pub mod logging;
pub mod model;
pub mod rate_limit;
pub mod store;
pub mod voting;

#[cfg(test)]
mod fixtures;

/// Build the server from `Rocket.toml` and the environment, with whichever
/// store is configured and the system clock.
pub fn build() -> Rocket<Build> {
    let clock: ClockHandle = Arc::new(SystemClock);
    let rocket = rocket::build().manage(clock).attach(DatabaseFairing);
    mount(rocket)
}

/// Build the server around an existing store and clock, skipping the
/// database connection.
pub fn rocket_for_store(figment: Figment, store: StoreHandle, clock: ClockHandle) -> Rocket<Build> {
    mount(rocket::custom(figment).manage(store).manage(clock))
}

/// Everything but the store and the clock. The store must be managed, or
/// provided by a fairing attached before this.
fn mount(rocket: Rocket<Build>) -> Rocket<Build> {
    rocket
        .attach(ConfigFairing)
        .attach(LedgerFairing)
        .attach(LoggerFairing)
        .attach(Cors)
        .mount("/", api::routes())
        .register("/", api::catchers())
}
