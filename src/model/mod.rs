//! Data types handled by the ledger service.
//!
//! - [`common`] holds the records maintained by external admin flows, which
//!   this service only ever reads.
//! - [`db`] holds the records this service writes, in their stored form.
//! - [`api`] holds request and response bodies.
//! - [`mongodb`] holds the MongoDB glue: typed collections, IDs and indexes.

pub mod api;
pub mod common;
pub mod db;
pub mod mongodb;
