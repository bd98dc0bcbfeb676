//! Durable storage for the relying context.
//!
//! Uses ReDB for embedded key-value storage with ACID transactions.
//! The relying context keeps exactly one entry (the cached token), but the
//! table is a plain string-keyed store so the layout can grow.

pub mod redb;

pub use self::redb::Storage;
