//! Caller identification extractors.
//!
//! - [`submitter::Submitter`] -- Reads the caller identity from `x-submitter-id`.
//! - [`submitter::RequireAdmin`] -- Requires [`PermissionLevel::Admin`].
//!
//! [`PermissionLevel::Admin`]: sdqueue_core::permissions::PermissionLevel::Admin

pub mod submitter;
