//! Core types and pure logic for the clipwatch generation-job tracker.
//!
//! Nothing in this crate performs I/O. The provider client, poller and
//! durable store live in `clipwatch-provider` and `clipwatch-tracker`
//! and build on the types defined here.

pub mod collection;
pub mod error;
pub mod estimation;
pub mod job;
pub mod job_events;
pub mod snapshot;
pub mod types;
pub mod validation;
