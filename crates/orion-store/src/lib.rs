//! # orion-store
//!
//! Durable storage for the Orion relay: the append-only item log and the
//! server settings record. Both live as pretty-printed JSON files in the
//! data directory.
//!
//! Every mutation is a read-modify-write performed under a single
//! per-store exclusion, and every write is published atomically
//! (temporary file, fsync, rename), so concurrent writers never lose an
//! update and a crash never leaves a truncated file behind. Readers take no
//! lock: they always observe either the previous or the next complete file.

pub mod items;
pub mod settings;

mod atomic;
mod error;

pub use error::{Result, StoreError};
pub use items::ItemStore;
pub use settings::SettingsStore;
