//! Scheduling constants and the per-job state machine.
//!
//! Lives in `core` so the dispatcher, the HTTP layer and tests agree on
//! priorities, default timings and which lifecycle transitions are legal.

use std::time::Duration;

use serde::Serialize;

// ---------------------------------------------------------------------------
// Priority constants
// ---------------------------------------------------------------------------

/// Priority value for urgent jobs. Dispatched before all others.
pub const PRIORITY_URGENT: i32 = 10;

/// Priority value for normal jobs. Default.
pub const PRIORITY_NORMAL: i32 = 0;

/// Priority value for background jobs. Dispatched last.
pub const PRIORITY_BACKGROUND: i32 = -10;

// ---------------------------------------------------------------------------
// Timing defaults
// ---------------------------------------------------------------------------

/// How often every worker is re-probed.
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(20);

/// Per-worker probe timeout, independent of the refresh cadence.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Hard limit on one generation call.
pub const DEFAULT_EXECUTION_TIMEOUT: Duration = Duration::from_secs(15 * 60);

/// Consecutive no-progress drain cycles before the drain loop backs off.
pub const DEFAULT_RETRY_CEILING: u32 = 10;

/// Pause between two no-progress drain cycles.
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_secs(5);

/// Delay before a fresh drain after the retry ceiling was hit.
pub const DEFAULT_RESCHEDULE_DELAY: Duration = Duration::from_secs(30);

// ---------------------------------------------------------------------------
// State machine
// ---------------------------------------------------------------------------

/// Lifecycle state of a job inside the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Admitted,
    Queued,
    Executing,
    Succeeded,
    Failed,
}

impl JobState {
    /// The set of states reachable from `self`.
    ///
    /// There is deliberately no edge from `Executing` back to `Queued`:
    /// a job that started running resolves, it is never re-queued.
    /// `Queued -> Failed` covers the pre-execution authorization check.
    pub fn valid_transitions(self) -> &'static [JobState] {
        use JobState::*;
        match self {
            Admitted => &[Queued, Executing],
            Queued => &[Queued, Executing, Failed],
            Executing => &[Succeeded, Failed],
            Succeeded | Failed => &[],
        }
    }

    pub fn can_transition(self, to: JobState) -> bool {
        self.valid_transitions().contains(&to)
    }

    /// Validate a transition, returning a message for invalid ones.
    pub fn validate_transition(self, to: JobState) -> Result<(), String> {
        if self.can_transition(to) {
            Ok(())
        } else {
            Err(format!("Invalid transition: {self:?} -> {to:?}"))
        }
    }
}
