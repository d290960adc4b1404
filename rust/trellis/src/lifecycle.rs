//! The lifecycle guard.
//!
//! One guard exists per application and is shared by every context of its
//! tree. It moves strictly forward:
//!
//! ```text
//! constructing ──► ready ──► closing ──► closed
//!       └──────────────────────►┘
//! ```
//!
//! Decorations may only be added while the guard reads `constructing`.

use std::{
    fmt,
    sync::atomic::{AtomicU8, Ordering},
};

use serde::{Deserialize, Serialize};

use crate::LifecycleError;

/// Lifecycle phase of an application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum Phase {
    /// Plugins are loading and decorations may be added
    Constructing = 0,
    /// The application is serving and its shape is frozen
    Ready = 1,
    /// Teardown has begun
    Closing = 2,
    /// Teardown has finished
    Closed = 3,
}

impl Phase {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Phase::Constructing,
            1 => Phase::Ready,
            2 => Phase::Closing,
            _ => Phase::Closed,
        }
    }

    /// Whether the guard may move from `self` to `to`.
    pub fn can_advance(self, to: Phase) -> bool {
        matches!(
            (self, to),
            (Phase::Constructing, Phase::Ready)
                | (Phase::Constructing, Phase::Closing)
                | (Phase::Ready, Phase::Closing)
                | (Phase::Closing, Phase::Closed)
        )
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Phase::Constructing => "constructing",
            Phase::Ready => "ready",
            Phase::Closing => "closing",
            Phase::Closed => "closed",
        })
    }
}

/// Atomic, forward-only lifecycle state.
#[derive(Debug)]
pub struct Lifecycle(AtomicU8);

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    /// A guard in the `constructing` phase.
    pub fn new() -> Self {
        Self(AtomicU8::new(Phase::Constructing as u8))
    }

    /// The current phase.
    pub fn phase(&self) -> Phase {
        Phase::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Whether decorations may still be added.
    pub fn is_constructing(&self) -> bool {
        self.phase() == Phase::Constructing
    }

    /// Move to `to`. Fails if `to` is not a legal successor of the current
    /// phase, including when another caller already moved the guard.
    pub fn advance(&self, to: Phase) -> Result<Phase, LifecycleError> {
        let mut current = self.0.load(Ordering::Acquire);
        loop {
            let from = Phase::from_u8(current);
            if !from.can_advance(to) {
                return Err(LifecycleError { from, to });
            }
            match self.0.compare_exchange_weak(
                current,
                to as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Ok(from),
                Err(actual) => current = actual,
            }
        }
    }
}
