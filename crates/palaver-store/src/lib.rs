//! # palaver-store
//!
//! Local storage for groups, membership, and sender-key state, backed by
//! SQLite.
//!
//! Key material never hits the database in the clear: the engine hands
//! this crate opaque blobs that were already sealed with a key derived
//! from the local identity.  The crate exposes a synchronous `Database`
//! handle that wraps a `rusqlite::Connection` and provides typed CRUD
//! helpers for every domain model.

pub mod database;
pub mod groups;
pub mod keys;
pub mod members;
pub mod migrations;
pub mod models;

mod error;

pub use database::Database;
pub use error::StoreError;
pub use models::*;
