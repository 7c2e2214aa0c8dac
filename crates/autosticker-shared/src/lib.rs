//! # autosticker-shared
//!
//! Types shared by every autosticker crate: recipient identities, the
//! transport event and envelope model, error enums, constants, and the
//! media sealing primitives used to build content-addressed uploads.

pub mod constants;
pub mod crypto;
pub mod error;
pub mod protocol;
pub mod types;
