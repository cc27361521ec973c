//! Per-item bookkeeping for batch migrations

use serde::Serialize;
use std::fmt;

/// An item that did not make it to the target, and why
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedItem {
    pub name: String,
    pub reason: String,
}

/// Where a single item ended up
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemOutcome {
    /// Created on the target
    Succeeded,
    /// The target already had it
    Skipped,
    /// Not migrated
    Failed(String),
}

/// Result of a batch operation. Every item lands in exactly one list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MigrationSummary {
    pub succeeded: Vec<String>,
    pub skipped: Vec<String>,
    pub failed: Vec<FailedItem>,
}

impl MigrationSummary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn succeed(&mut self, name: impl Into<String>) {
        self.succeeded.push(name.into());
    }

    pub fn skip(&mut self, name: impl Into<String>) {
        self.skipped.push(name.into());
    }

    pub fn fail(&mut self, name: impl Into<String>, reason: impl Into<String>) {
        self.failed.push(FailedItem {
            name: name.into(),
            reason: reason.into(),
        });
    }

    /// File an item under its outcome
    pub fn record(&mut self, name: impl Into<String>, outcome: ItemOutcome) {
        match outcome {
            ItemOutcome::Succeeded => self.succeed(name),
            ItemOutcome::Skipped => self.skip(name),
            ItemOutcome::Failed(reason) => self.fail(name, reason),
        }
    }

    /// Fail every name with the same reason
    pub fn fail_all<I, S>(&mut self, names: I, reason: &str)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for name in names {
            self.fail(name, reason);
        }
    }

    /// Append another summary
    pub fn merge(&mut self, other: MigrationSummary) {
        self.succeeded.extend(other.succeeded);
        self.skipped.extend(other.skipped);
        self.failed.extend(other.failed);
    }

    /// Items accounted for
    pub fn total(&self) -> usize {
        self.succeeded.len() + self.skipped.len() + self.failed.len()
    }

    /// No failures
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

impl fmt::Display for MigrationSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "succeeded={} skipped={} failed={}",
            self.succeeded.len(),
            self.skipped.len(),
            self.failed.len()
        )
    }
}
