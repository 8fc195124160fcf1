//! Pure scheduling logic for the sdqueue dispatcher.
//!
//! Nothing in this crate performs I/O or spawns tasks. It holds the
//! worker data model, checkpoint normalization, the affinity matcher,
//! the priority job queue and the admission helpers (permission levels
//! and rate limiting) so that the process crate and its tests can share
//! them.

pub mod affinity;
pub mod checkpoint;
pub mod error;
pub mod job_queue;
pub mod permissions;
pub mod rate_limit;
pub mod scheduling;
pub mod types;
pub mod worker_pool;
