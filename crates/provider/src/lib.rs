//! Generation provider clients.
//!
//! [`ProviderClient`] is the capability set the tracker depends on
//! (`create`, `status`, `cancel`). Two interchangeable backends are
//! provided:
//!
//! - [`PollingProvider`] submits a prediction and answers `status` by
//!   asking the provider each time.
//! - [`BlockingProvider`] wraps any client and blocks inside `create`
//!   until the job reaches a terminal state (bounded by a timeout),
//!   answering later `status` calls from the remembered outcome.
//!
//! [`wait`] holds the bounded wait helpers shared by both.

pub mod api;
pub mod blocking;
pub mod client;
pub mod error;
pub mod polling;
pub mod wait;

pub use blocking::BlockingProvider;
pub use client::{GenerationInput, ProviderClient};
pub use error::{ProviderError, WaitError};
pub use polling::PollingProvider;
