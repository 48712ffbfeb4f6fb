//! Terminal-result counting for one session

use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::error;

use crate::{Error, Result};

/// Counts terminal results and reports completion exactly once
#[derive(Debug)]
pub struct CompletionTracker {
    expected: usize,
    recorded: AtomicUsize,
}

impl CompletionTracker {
    pub fn new(expected: usize) -> Self {
        Self {
            expected,
            recorded: AtomicUsize::new(0),
        }
    }

    /// Record one terminal result.
    ///
    /// Returns `Ok(true)` on the call that reaches the expected count and
    /// `Ok(false)` before it. Any call after completion is a caller bug and
    /// yields [`Error::CompletionOverrun`].
    pub fn record(&self) -> Result<bool> {
        let recorded = self.recorded.fetch_add(1, Ordering::AcqRel) + 1;

        if recorded > self.expected {
            error!(expected = self.expected, recorded, "Terminal result after completion");
            return Err(Error::CompletionOverrun {
                expected: self.expected,
                recorded,
            });
        }

        Ok(recorded == self.expected)
    }

    /// Results recorded so far, overruns included
    pub fn recorded(&self) -> usize {
        self.recorded.load(Ordering::Acquire)
    }
}
