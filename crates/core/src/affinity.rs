//! Worker selection for a job's requirements.
//!
//! [`select_worker`] is a pure function of the requirements and a registry
//! snapshot. It never claims anything: an [`AffinityMatch::Idle`] result
//! still has to be claimed through the registry, and the claim may lose a
//! race against another submitter.

use serde::{Deserialize, Serialize};

use crate::checkpoint::normalize_checkpoint;
use crate::worker_pool::{Feature, Worker};

/// What a job needs from the worker that runs it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requirements {
    /// Normalized checkpoint, `None` for "any loaded checkpoint".
    pub checkpoint: Option<String>,
    /// Optional feature the worker must have enabled.
    pub feature: Option<Feature>,
}

impl Requirements {
    /// Requirements for any worker with a loaded checkpoint.
    pub fn any() -> Self {
        Self::default()
    }

    /// Requirements pinned to a checkpoint. The name is normalized; a name
    /// that normalizes to nothing means "any".
    pub fn for_checkpoint(raw: &str) -> Self {
        Self {
            checkpoint: normalize_checkpoint(raw),
            feature: None,
        }
    }

    pub fn with_feature(mut self, feature: Feature) -> Self {
        self.feature = Some(feature);
        self
    }

    /// Whether `worker` satisfies these requirements, ignoring busy state.
    pub fn is_satisfied_by(&self, worker: &Worker) -> bool {
        if !worker.online {
            return false;
        }
        let checkpoint_ok = match (&self.checkpoint, &worker.current_checkpoint) {
            (Some(wanted), Some(loaded)) => wanted == loaded,
            (None, Some(_)) => true,
            (_, None) => false,
        };
        let feature_ok = match self.feature {
            Some(f) => worker.has_feature(f),
            None => true,
        };
        checkpoint_ok && feature_ok
    }
}

/// Outcome of a selection attempt.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AffinityMatch<'a> {
    /// A compatible worker that is not busy. Claim it before use.
    Idle(&'a Worker),
    /// Compatible workers exist, but all are busy. The job should wait.
    Occupied(&'a Worker),
    /// No online worker can serve the requirements at all.
    Unavailable,
}

impl<'a> AffinityMatch<'a> {
    /// The selected worker, if any.
    pub fn worker(&self) -> Option<&'a Worker> {
        match self {
            Self::Idle(w) | Self::Occupied(w) => Some(w),
            Self::Unavailable => None,
        }
    }
}

/// Select a worker for `requirements` from `snapshot`.
///
/// Tiers, first hit wins, ties broken by snapshot (configuration) order:
/// 1. compatible and not busy -> [`AffinityMatch::Idle`]
/// 2. compatible but busy -> [`AffinityMatch::Occupied`]
/// 3. otherwise [`AffinityMatch::Unavailable`]
pub fn select_worker<'a>(requirements: &Requirements, snapshot: &'a [Worker]) -> AffinityMatch<'a> {
    let mut first_busy: Option<&'a Worker> = None;

    for worker in snapshot.iter().filter(|w| requirements.is_satisfied_by(w)) {
        if !worker.busy {
            return AffinityMatch::Idle(worker);
        }
        if first_busy.is_none() {
            first_busy = Some(worker);
        }
    }

    match first_busy {
        Some(worker) => AffinityMatch::Occupied(worker),
        None => AffinityMatch::Unavailable,
    }
}
