//! steward-state — shared state for the Steward control plane.
//!
//! # Architecture
//!
//! - [`VersionedKeyStore`] holds every piece of state that subscribers
//!   watch: an opaque blob per key plus a snapshot id that strictly
//!   increases on every write. Writes notify registered
//!   [`ChangeListener`]s synchronously, which is how the long-poll host
//!   learns about changes.
//! - [`types`] defines the deployment/application model: configs,
//!   versions, status enums, and the JSON documents the controller
//!   publishes under the keys in [`keys`].
//! - [`wire`] holds the protobuf messages exchanged with cross-language
//!   clients.
//! - [`CheckpointStore`] persists application declarations in redb so the
//!   controller can recover after a restart.

pub mod checkpoint;
pub mod error;
pub mod keys;
pub mod store;
pub mod tables;
pub mod types;
pub mod wire;

pub use checkpoint::CheckpointStore;
pub use error::{StateError, StateResult, ValidationError};
pub use store::{ChangeListener, VersionedKeyStore};
pub use types::*;
