//! Request handles and lifecycle status.
//!
//! A [`RequestHandle`] is a generational index into the request registry.
//! When a registry slot is recycled its generation is bumped, so a handle
//! kept past its request's reaping is reported as [`RequestStatus::Expired`]
//! instead of silently aliasing whatever request now occupies the slot.

use std::fmt;

/// Opaque identifier for a submitted request, valid until reaped.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestHandle {
    index: u32,
    generation: u32,
}

impl RequestHandle {
    pub(crate) fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    /// Registry slot index.
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Generation of the registry slot when this handle was issued.
    pub fn generation(&self) -> u32 {
        self.generation
    }
}

impl fmt::Display for RequestHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "req-{}.{}", self.index, self.generation)
    }
}

/// Request lifecycle status.
///
/// Transitions are monotonic:
///
/// ```text
/// Queued --claim--> InProgress --finish--> {Complete | Aborted} --reap--> PendingDelete
/// ```
///
/// `Unknown` and `Expired` are never stored; they are lookup results for
/// handles the registry does not (or no longer) recognise.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestStatus {
    /// Handle was never issued by this queue.
    Unknown,
    /// Handle was issued but its request has been reaped.
    Expired,
    /// Waiting for a worker.
    Queued,
    /// Claimed by exactly one worker.
    InProgress,
    /// Finished; the result carries its own success flag.
    Complete,
    /// Cancelled, failed with a panic, or forced by shutdown/watchdog.
    Aborted,
    /// Being removed from the registry.
    PendingDelete,
}

impl RequestStatus {
    /// Returns true for `Complete` and `Aborted`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Aborted)
    }

    /// Returns true while a worker may still touch the request.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Queued | Self::InProgress)
    }

    /// Returns true for lookup misses.
    pub fn is_missing(&self) -> bool {
        matches!(self, Self::Unknown | Self::Expired)
    }

    /// Position along the lifecycle; used to assert monotonic transitions.
    pub(crate) fn rank(&self) -> u8 {
        match self {
            Self::Unknown | Self::Expired => 0,
            Self::Queued => 1,
            Self::InProgress => 2,
            Self::Complete | Self::Aborted => 3,
            Self::PendingDelete => 4,
        }
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown => write!(f, "Unknown"),
            Self::Expired => write!(f, "Expired"),
            Self::Queued => write!(f, "Queued"),
            Self::InProgress => write!(f, "InProgress"),
            Self::Complete => write!(f, "Complete"),
            Self::Aborted => write!(f, "Aborted"),
            Self::PendingDelete => write!(f, "PendingDelete"),
        }
    }
}
