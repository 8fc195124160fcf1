//! Job dispatch engine.
//!
//! - [`registry`]: worker state, probes, atomic busy claims.
//! - [`dispatcher`]: submit / execute / drain lifecycle over the job queue.
//! - [`job`]: job records, completion handles and status sinks.
//! - [`admission`], [`executor`], [`probe`]: the collaborator seams
//!   (permission gate, generation call, worker probe) with their
//!   production implementations.

pub mod admission;
pub mod dispatcher;
pub mod executor;
pub mod job;
pub mod probe;
pub mod registry;
