//! # banter-store
//!
//! Chat message persistence for the banter backend.
//!
//! Exposes the [`MessageStore`] trait the ingest pipeline writes through,
//! plus the default `SQLite` implementation:
//!
//! - **[`connection`]**: `r2d2` connection pool with WAL mode and pragmas
//!   applied to every connection
//! - **[`migrations`]**: embedded, version-tracked schema setup
//! - **[`store`]**: [`SqliteMessageStore`] — save and per-session listing

#![deny(unsafe_code)]

pub mod connection;
pub mod errors;
pub mod migrations;
pub mod store;

pub use connection::{ConnectionConfig, ConnectionPool, new_file, new_in_memory};
pub use errors::{Result, StoreError};
pub use store::{MessageStore, SqliteMessageStore};
