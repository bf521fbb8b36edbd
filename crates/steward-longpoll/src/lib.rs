//! steward-longpoll — change propagation over long-poll requests.
//!
//! Subscribers send the last snapshot id they have seen for each key they
//! watch. The host answers immediately if any watched key has advanced,
//! otherwise it parks the request until a write touches a watched key or
//! the timeout elapses.
//!
//! # Architecture
//!
//! ```text
//! VersionedKeyStore ──notify_changed──► WaiterRegistry
//!                                         │ oneshot per pending poll
//! LongPollHost::poll ◄────────────────────┘
//!   ├── register waiter
//!   ├── changed_since(watched) → Updated
//!   └── wait (timeout_at deadline) → re-evaluate | TimedOut
//!
//! LongPollClient
//!   └── LongPollSource::poll → per-key callbacks
//!         ├── LongPollHost (in process)
//!         └── HttpSource   (POST /api/v1/long_poll on a remote daemon)
//! ```
//!
//! A dropped poll future deregisters its waiter immediately, so abandoned
//! requests never accumulate between writes.

pub mod client;
pub mod host;
pub mod remote;

pub use client::{LongPollClient, LongPollError, LongPollSource, UpdateCallback};
pub use host::{LongPollHost, PollOutcome};
pub use remote::HttpSource;
