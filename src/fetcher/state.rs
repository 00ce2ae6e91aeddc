use crate::cursor::{BatchField, FetchOutcome};
use crate::executor::CallbackHandle;
use std::fmt;

/// Lifecycle of a fetcher. `Scheduled` and `Finishing` count as active.
///
/// Idle -> Scheduled -> Finishing -> (Scheduled | Done). `Done` is final.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Phase {
    Idle,
    Scheduled {
        handle: CallbackHandle,
        batch_field: BatchField,
    },
    /// A completion is being processed; the callback may be running.
    Finishing,
    Done,
}

impl Phase {
    pub(super) fn is_active(&self) -> bool {
        matches!(self, Phase::Scheduled { .. } | Phase::Finishing)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Idle => f.write_str("idle"),
            Phase::Scheduled {
                handle,
                batch_field,
            } => write!(f, "scheduled {handle} awaiting {}", batch_field.name()),
            Phase::Finishing => f.write_str("finishing"),
            Phase::Done => f.write_str("done"),
        }
    }
}

#[derive(Debug)]
pub(super) struct FetchState {
    pub(super) phase: Phase,
    pub(super) cancel_requested: bool,
    /// Set once the owning `Fetcher` is dropped; no callback starts afterwards.
    pub(super) discarded: bool,
    pub(super) batches: u64,
    pub(super) outcome: Option<FetchOutcome>,
}

impl FetchState {
    pub(super) fn new() -> Self {
        Self {
            phase: Phase::Idle,
            cancel_requested: false,
            discarded: false,
            batches: 0,
            outcome: None,
        }
    }
}
