//! # autosticker-store
//!
//! Local persistence for the linked-device session, backed by SQLite.
//!
//! The crate exposes a synchronous `Database` handle that wraps a
//! `rusqlite::Connection` and implements [`CredentialStore`], so a restart
//! reconnects with the stored session instead of pairing again.

pub mod credentials;
pub mod database;
pub mod migrations;

mod error;

pub use credentials::CredentialStore;
pub use database::Database;
pub use error::StoreError;
