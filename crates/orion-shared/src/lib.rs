//! # orion-shared
//!
//! Types shared by the Orion relay crates: the durable item log, the
//! ephemeral "now playing" status, persisted server settings, and the push
//! envelope written to every live connection.

pub mod constants;
pub mod error;
pub mod protocol;
pub mod settings;
pub mod types;

pub use error::OrionError;
pub use protocol::PushMessage;
pub use settings::ServerSettings;
pub use types::{FileRef, FlowData, Item, ItemKind, MediaStatus, Role};
