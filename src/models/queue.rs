//! Virtual waiting-queue state.
//!
//! High-demand sales put sessions into a waiting room before the real
//! inventory page. This state is owned and transitioned only by the queue
//! navigator.

use std::time::{Duration, Instant};

/// Where a session stands with respect to a platform's virtual queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueStatus {
    NotInQueue,
    Queued,
    BypassAttempted,
    Released,
    Abandoned,
}

impl QueueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotInQueue => "not_in_queue",
            Self::Queued => "queued",
            Self::BypassAttempted => "bypass_attempted",
            Self::Released => "released",
            Self::Abandoned => "abandoned",
        }
    }

    /// True for states the navigator never transitions out of.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Released | Self::Abandoned)
    }
}

/// Queue progress for one platform/session pair.
#[derive(Debug, Clone)]
pub struct QueueState {
    pub status: QueueStatus,
    /// Estimated position, if the waiting room reports one.
    pub position: Option<u64>,
    /// Interval between status polls.
    pub poll_interval: Duration,
    /// When the session entered the queue.
    pub entered_at: Option<Instant>,
    /// Number of status polls issued.
    pub polls: u32,
}

impl QueueState {
    pub fn new(poll_interval: Duration) -> Self {
        Self {
            status: QueueStatus::NotInQueue,
            position: None,
            poll_interval,
            entered_at: None,
            polls: 0,
        }
    }

    /// Time spent waiting since queue entry.
    pub fn waited(&self) -> Duration {
        self.entered_at.map(|t| t.elapsed()).unwrap_or(Duration::ZERO)
    }
}
