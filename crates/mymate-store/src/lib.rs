//! # mymate-store
//!
//! SQLite persistence for the mymate chat core.
//!
//! The crate exposes a synchronous [`Database`] handle that wraps a
//! `rusqlite::Connection`, runs schema migrations on open, and provides typed
//! helpers for the two tables the chat core touches: the append-only
//! `chat_messages` log and the read-mostly `users` directory.

pub mod database;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod users;

mod error;

pub use database::Database;
pub use error::{Result, StoreError};
pub use models::*;
