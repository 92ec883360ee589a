//! Event-sourced aggregate contract.
//!
//! The domain layer decides (`handle`) and folds (`apply`); everything about
//! persistence, retries, and publication lives behind these two seams.

use crate::error::{DomainError, DomainResult};

/// Minimal identity + versioning interface every aggregate exposes.
pub trait AggregateRoot {
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    fn id(&self) -> &Self::Id;

    /// Stream revision: number of events folded into this instance so far.
    /// A fresh, never-persisted aggregate reports 0.
    fn version(&self) -> u64;
}

/// What stream version an append expects to find.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ExpectedVersion {
    /// No expectation; append unconditionally.
    Any,
    /// Append only if the stream is exactly at this version.
    Exact(u64),
}

impl ExpectedVersion {
    pub fn matches(self, actual: u64) -> bool {
        match self {
            ExpectedVersion::Any => true,
            ExpectedVersion::Exact(v) => v == actual,
        }
    }

    pub fn check(self, actual: u64) -> DomainResult<()> {
        if self.matches(actual) {
            Ok(())
        } else {
            Err(DomainError::conflict(format!(
                "optimistic concurrency check failed (expected: {self:?}, actual: {actual})"
            )))
        }
    }
}

/// Pure decision + evolution semantics.
///
/// `handle` inspects current state and returns the events a command produces,
/// without mutating anything. `apply` folds one event into state and bumps
/// `version()` by one. Neither may do IO; determinism is what makes replay
/// and rebuilds trustworthy.
pub trait Aggregate: AggregateRoot {
    type Command: Clone + core::fmt::Debug;
    type Event: Clone + core::fmt::Debug;
    type Error: core::fmt::Debug;

    fn apply(&mut self, event: &Self::Event);

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error>;
}
