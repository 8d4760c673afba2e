//! Runs list builds on a dedicated background thread.
//!
//! Requests are queued FIFO and each one is stamped with a generation. Results
//! for anything but the newest generation are discarded on the receiving side,
//! so a caller only ever displays the list it asked for last.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::Context;
use booklist_core::{BookFilter, BookId};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError, bounded, unbounded};
use booklist_engine::style::resolve_style;
use booklist_engine::{
    BooklistCursor, BooklistError, BuildControl, BuildProgress, BuilderHandle, ScrollTarget,
};
use parking_lot::Mutex;

const WORKER_NAME: &str = "booklist-builder";
const PROGRESS_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildKind {
    /// Full structural build. `style` switches the builder to the named style
    /// first.
    Build {
        filter: BookFilter,
        style: Option<String>,
    },
    /// Re-query with the current filter, style and expansion state.
    Rebuild,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildRequest {
    pub kind: BuildKind,
    pub mark_book_id: Option<BookId>,
    pub previous_top: usize,
}

impl BuildRequest {
    pub fn build(filter: BookFilter, style: Option<String>) -> Self {
        Self {
            kind: BuildKind::Build { filter, style },
            mark_book_id: None,
            previous_top: 0,
        }
    }

    pub fn rebuild() -> Self {
        Self {
            kind: BuildKind::Rebuild,
            mark_book_id: None,
            previous_top: 0,
        }
    }

    pub fn with_mark(mut self, mark: Option<BookId>) -> Self {
        self.mark_book_id = mark;
        self
    }

    pub fn with_previous_top(mut self, previous_top: usize) -> Self {
        self.previous_top = previous_top;
        self
    }
}

/// A finished list and where it should be scrolled to.
#[derive(Debug)]
pub struct ListReady {
    pub cursor: BooklistCursor,
    pub target: ScrollTarget,
}

#[derive(Debug)]
pub struct BuildResult {
    pub generation: u64,
    pub outcome: Result<ListReady, BooklistError>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Idle,
    Running,
    Finished,
    Cancelled,
}

enum Job {
    Run {
        generation: u64,
        request: BuildRequest,
        control: BuildControl,
    },
    Shutdown,
}

struct Shared {
    state: Mutex<TaskState>,
    pending: Mutex<VecDeque<(u64, BuildControl)>>,
    latest: AtomicU64,
}

pub struct BuildCoordinator {
    jobs: Sender<Job>,
    results: Receiver<BuildResult>,
    progress_tx: Sender<BuildProgress>,
    progress_rx: Receiver<BuildProgress>,
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
}

impl BuildCoordinator {
    pub fn new(handle: BuilderHandle) -> anyhow::Result<Self> {
        let (jobs, job_rx) = unbounded();
        let (result_tx, results) = unbounded();
        let (progress_tx, progress_rx) = bounded(PROGRESS_CAPACITY);
        let shared = Arc::new(Shared {
            state: Mutex::new(TaskState::Idle),
            pending: Mutex::new(VecDeque::new()),
            latest: AtomicU64::new(0),
        });

        let worker_shared = Arc::clone(&shared);
        let worker = thread::Builder::new()
            .name(WORKER_NAME.to_string())
            .spawn(move || worker_loop(handle, job_rx, result_tx, worker_shared))
            .context("failed to spawn list build worker")?;

        Ok(Self {
            jobs,
            results,
            progress_tx,
            progress_rx,
            shared,
            worker: Some(worker),
        })
    }

    /// Queues a build and returns its generation.
    pub fn submit(&self, request: BuildRequest) -> u64 {
        let generation = self.shared.latest.fetch_add(1, Ordering::SeqCst) + 1;
        let sink = self.progress_tx.clone();
        let control = BuildControl::new().on_progress(move |progress| {
            if let Err(TrySendError::Disconnected(_)) = sink.try_send(progress) {
                tracing::trace!("progress receiver dropped");
            }
        });
        self.shared
            .pending
            .lock()
            .push_back((generation, control.clone()));

        tracing::debug!(generation, kind = ?request.kind, "submitting list build");
        let job = Job::Run {
            generation,
            request,
            control,
        };
        if self.jobs.send(job).is_err() {
            tracing::warn!(generation, "list build worker is gone");
        }
        generation
    }

    pub fn latest_generation(&self) -> u64 {
        self.shared.latest.load(Ordering::SeqCst)
    }

    /// The newest pending result, if one has arrived.
    pub fn try_result(&self) -> Option<BuildResult> {
        let mut newest = None;
        while let Ok(result) = self.results.try_recv() {
            if let Some(result) = self.keep_current(result) {
                newest = Some(result);
            }
        }
        newest
    }

    /// Blocks until the newest generation's result arrives or `timeout` passes.
    pub fn wait_result(&self, timeout: Duration) -> Option<BuildResult> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.results.recv_deadline(deadline) {
                Ok(result) => {
                    if let Some(result) = self.keep_current(result) {
                        return Some(result);
                    }
                }
                Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => return None,
            }
        }
    }

    fn keep_current(&self, result: BuildResult) -> Option<BuildResult> {
        let latest = self.latest_generation();
        if result.generation < latest {
            tracing::debug!(generation = result.generation, latest, "discarding stale list");
            return None;
        }
        Some(result)
    }

    pub fn progress(&self) -> &Receiver<BuildProgress> {
        &self.progress_rx
    }

    /// Cancels the running build and everything queued behind it.
    pub fn cancel(&self) {
        let pending = self.shared.pending.lock();
        for (generation, control) in pending.iter() {
            tracing::debug!(generation, "cancelling list build");
            control.cancel();
        }
    }

    pub fn state(&self) -> TaskState {
        *self.shared.state.lock()
    }

    /// Stops the worker after the job in progress and waits for it.
    pub fn shutdown(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        self.cancel();
        if self.jobs.send(Job::Shutdown).is_err() {
            tracing::debug!("list build worker already stopped");
        }
        if worker.join().is_err() {
            tracing::warn!("list build worker panicked");
        }
    }
}

impl Drop for BuildCoordinator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for BuildCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuildCoordinator")
            .field("state", &self.state())
            .field("latest", &self.latest_generation())
            .finish_non_exhaustive()
    }
}

fn worker_loop(
    handle: BuilderHandle,
    jobs: Receiver<Job>,
    results: Sender<BuildResult>,
    shared: Arc<Shared>,
) {
    while let Ok(job) = jobs.recv() {
        let (generation, request, control) = match job {
            Job::Run {
                generation,
                request,
                control,
            } => (generation, request, control),
            Job::Shutdown => break,
        };

        *shared.state.lock() = TaskState::Running;
        let outcome = run_build(&handle, request, &control);
        shared
            .pending
            .lock()
            .retain(|(queued, _)| *queued != generation);

        match outcome {
            Err(err) if err.is_cancelled() => {
                tracing::debug!(generation, "list build cancelled");
                *shared.state.lock() = TaskState::Cancelled;
            }
            outcome => {
                *shared.state.lock() = TaskState::Finished;
                if results.send(BuildResult { generation, outcome }).is_err() {
                    break;
                }
            }
        }
    }
    tracing::debug!("list build worker stopped");
}

fn run_build(
    handle: &BuilderHandle,
    request: BuildRequest,
    control: &BuildControl,
) -> Result<ListReady, BooklistError> {
    let target = {
        let mut builder = handle.lock();
        match request.kind {
            BuildKind::Build { filter, style } => {
                if let Some(name) = style {
                    let style = resolve_style(builder.storage(), &name)?;
                    builder.set_style(style)?;
                }
                builder.build_with(request.mark_book_id, filter, control)?;
            }
            BuildKind::Rebuild => {
                builder.rebuild_with(control)?;
            }
        }
        control.check()?;
        builder.target_position(request.previous_top, request.mark_book_id)?
    };
    let mut cursor = handle.get_list();
    if !cursor.is_empty() {
        cursor.move_to_position(target.position)?;
    }
    Ok(ListReady { cursor, target })
}

#[cfg(test)]
mod tests {
    use booklist_storage::Storage;
    use booklist_engine::BooklistBuilder;

    use super::*;
    use crate::testing::{authors, seed};

    const WAIT: Duration = Duration::from_secs(10);

    fn coordinator() -> anyhow::Result<(BuildCoordinator, BuilderHandle)> {
        let storage = Storage::open_in_memory()?;
        seed(&storage)?;
        let handle = BuilderHandle::new(BooklistBuilder::new(storage, "screen", authors())?);
        Ok((BuildCoordinator::new(handle.clone())?, handle))
    }

    #[test]
    fn builds_in_the_background() -> anyhow::Result<()> {
        let (coordinator, _) = coordinator()?;
        assert_eq!(coordinator.state(), TaskState::Idle);

        let generation = coordinator.submit(BuildRequest::build(BookFilter::all(), None));
        let result = coordinator.wait_result(WAIT).expect("a result");
        assert_eq!(result.generation, generation);
        let ready = result.outcome?;
        assert_eq!(ready.cursor.count(), 5);
        assert_eq!(ready.cursor.position(), Some(0));
        assert_eq!(coordinator.state(), TaskState::Finished);
        Ok(())
    }

    #[test]
    fn only_the_latest_result_is_delivered() -> anyhow::Result<()> {
        let (coordinator, _) = coordinator()?;
        coordinator.submit(BuildRequest::build(BookFilter::bookshelf("Poetry"), None));
        let latest = coordinator.submit(BuildRequest::build(BookFilter::all(), None));

        let result = coordinator.wait_result(WAIT).expect("a result");
        assert_eq!(result.generation, latest);
        assert_eq!(result.outcome?.cursor.count(), 5);
        assert!(coordinator.try_result().is_none());
        Ok(())
    }

    #[test]
    fn scrolls_to_the_marked_book() -> anyhow::Result<()> {
        let (coordinator, _) = coordinator()?;
        coordinator.submit(BuildRequest::build(BookFilter::all(), None));
        let first = coordinator.wait_result(WAIT).expect("a result").outcome?;
        let rama = first
            .cursor
            .rows()
            .find(|row| row.display() == "Rama")
            .map(|row| row.absolute_position())
            .expect("rama header");

        let request = BuildRequest::rebuild()
            .with_mark(Some(BookId(2)))
            .with_previous_top(0);
        coordinator.submit(request);
        let ready = coordinator.wait_result(WAIT).expect("a result").outcome?;
        assert!(ready.target.mark_found);
        let row = ready.cursor.row_view().expect("current row");
        assert_eq!(row.book_id(), Some(BookId(2)));
        assert_eq!(row.absolute_position(), rama + 1);
        Ok(())
    }

    #[test]
    fn unknown_styles_are_configuration_errors() -> anyhow::Result<()> {
        let (coordinator, _) = coordinator()?;
        coordinator.submit(BuildRequest::build(
            BookFilter::all(),
            Some("Nonexistent".to_string()),
        ));
        let err = coordinator
            .wait_result(WAIT)
            .expect("a result")
            .outcome
            .unwrap_err();
        assert!(err.is_fatal());
        Ok(())
    }

    #[test]
    fn cancelled_builds_send_nothing() -> anyhow::Result<()> {
        let (coordinator, handle) = coordinator()?;
        let generation = {
            // Hold the builder so the job is still queued when it is cancelled.
            let _builder = handle.lock();
            let generation = coordinator.submit(BuildRequest::build(BookFilter::all(), None));
            coordinator.cancel();
            generation
        };
        assert_eq!(generation, 1);
        assert!(coordinator.wait_result(Duration::from_millis(500)).is_none());
        assert_eq!(handle.lock().generation(), 0);
        Ok(())
    }

    #[test]
    fn reports_progress() -> anyhow::Result<()> {
        let (coordinator, _) = coordinator()?;
        coordinator.submit(BuildRequest::build(BookFilter::all(), None));
        coordinator.wait_result(WAIT).expect("a result").outcome?;
        let phases: Vec<_> = coordinator.progress().try_iter().map(|p| p.phase).collect();
        assert!(phases.contains(&booklist_engine::BuildPhase::Persist));
        Ok(())
    }

    #[test]
    fn shutdown_joins_the_worker() -> anyhow::Result<()> {
        let (mut coordinator, _) = coordinator()?;
        coordinator.submit(BuildRequest::build(BookFilter::all(), None));
        coordinator.shutdown();
        coordinator.shutdown();
        Ok(())
    }
}
