// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Category pollers
//!
//! A poller performs one poll step per call: fetch everything newer than its
//! checkpoint, persist it, advance the checkpoint. A [`PollRunner`] drives a
//! poller on a fixed cadence.

pub mod cpu;
pub mod memory;
pub mod runner;

pub use cpu::CpuDataPoller;
pub use memory::MemoryDataPoller;
pub use runner::{PollRunner, RunnerStatsSnapshot, POLLING_DELAY};

use crate::error::Result;
use std::fmt;

/// Data category served by a service/poller pair.
///
/// Each registered service must own a distinct category; runners are keyed
/// by `(stream_id, Category)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Category {
    Memory,
    Cpu,
    /// Category of a service registered outside the built-in set
    Custom(&'static str),
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Memory => write!(f, "memory"),
            Self::Cpu => write!(f, "cpu"),
            Self::Custom(name) => write!(f, "{}", name),
        }
    }
}

/// A single poll step plus its finalization.
pub trait Poller: Send {
    /// Fetch and persist everything since the last checkpoint
    fn poll(&mut self) -> Result<()>;

    /// Finalize owned state. Called once, after the last poll.
    fn stop(&mut self) {}
}

/// Exclusive lower bound of the next poll request.
///
/// Never moves backward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Checkpoint(i64);

impl Checkpoint {
    pub fn new() -> Self {
        Self(i64::MIN)
    }

    pub fn get(self) -> i64 {
        self.0
    }

    /// Move to `end_timestamp` if it is strictly newer. Returns whether it moved.
    pub fn advance(&mut self, end_timestamp: i64) -> bool {
        if end_timestamp > self.0 {
            self.0 = end_timestamp;
            true
        } else {
            false
        }
    }
}

impl Default for Checkpoint {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checkpoint_is_monotonic() {
        let mut checkpoint = Checkpoint::new();
        assert_eq!(checkpoint.get(), i64::MIN);

        assert!(checkpoint.advance(100));
        assert!(!checkpoint.advance(100));
        assert!(!checkpoint.advance(50));
        assert_eq!(checkpoint.get(), 100);

        assert!(checkpoint.advance(101));
        assert_eq!(checkpoint.get(), 101);
    }

    #[test]
    fn test_category_display() {
        assert_eq!(Category::Memory.to_string(), "memory");
        assert_eq!(Category::Cpu.to_string(), "cpu");
        assert_eq!(Category::Custom("energy").to_string(), "energy");
        assert!(Category::Cpu < Category::Custom("a"));
    }
}
