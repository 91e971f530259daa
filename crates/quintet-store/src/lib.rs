//! # quintet-store
//!
//! Durable local message table for a participant, backed by SQLite.
//!
//! Messages are written the moment they are sent or received. Outgoing
//! messages that could not reach any peer carry a `pending` flag, indexed
//! per room so the offline delivery queue can find them when a peer
//! connects. The crate exposes a synchronous `Database` handle that wraps a
//! `rusqlite::Connection`.

pub mod database;
pub mod messages;
pub mod migrations;
pub mod models;

mod error;

pub use database::Database;
pub use error::StoreError;
pub use models::*;
