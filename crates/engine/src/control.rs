//! Cancellation and progress reporting for long builds.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::{BooklistError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildPhase {
    Query,
    Sort,
    Group,
    Index,
    Persist,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuildProgress {
    pub phase: BuildPhase,
    pub processed: usize,
    pub total: usize,
}

type ProgressFn = dyn Fn(BuildProgress) + Send + Sync;

/// Shared cancel flag plus an optional progress sink, handed to each build.
#[derive(Clone, Default)]
pub struct BuildControl {
    cancelled: Arc<AtomicBool>,
    progress: Option<Arc<ProgressFn>>,
}

impl BuildControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_progress(mut self, sink: impl Fn(BuildProgress) + Send + Sync + 'static) -> Self {
        self.progress = Some(Arc::new(sink));
        self
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Checkpoint between build phases.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(BooklistError::Cancelled)
        } else {
            Ok(())
        }
    }

    pub fn report(&self, phase: BuildPhase, processed: usize, total: usize) {
        if let Some(sink) = &self.progress {
            sink(BuildProgress {
                phase,
                processed,
                total,
            });
        }
    }
}

impl fmt::Debug for BuildControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuildControl")
            .field("cancelled", &self.is_cancelled())
            .field("progress", &self.progress.is_some())
            .finish()
    }
}
