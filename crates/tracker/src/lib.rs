//! Job tracking on top of a [`clipwatch_provider::ProviderClient`].
//!
//! [`JobTracker`] is the entry point. It owns a [`JobPoller`] that
//! follows each active job, the in-memory job collection, and a
//! [`JobStore`] the collection is persisted to. Lifecycle changes are
//! published as [`TrackerEvent`]s on a broadcast channel.

pub mod config;
pub mod error;
pub mod events;
pub mod poller;
pub mod store;
pub mod tracker;

pub use config::TrackerConfig;
pub use error::{StoreError, TrackerError};
pub use events::TrackerEvent;
pub use poller::{JobPoller, PollOptions, SnapshotCallback};
pub use store::{JobStore, JsonFileStore, MemoryStore, StoreInfo};
pub use tracker::{JobOptions, JobTracker, Subscription};
