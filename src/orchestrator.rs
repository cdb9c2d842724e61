use std::{
    collections::HashSet,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, PoisonError,
    },
};

use log::{debug, info, warn};
use tokio::{sync::Semaphore, task::JoinHandle};

use crate::{
    model::RepositoryDescriptor,
    sync::{SyncEngine, SyncError, SyncOptions, SyncOutcome},
};

/// Where a run currently is. Runs move strictly forward through
/// `Idle → Fetching → Filtering → Syncing(1..=n) → Finalized`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Idle,
    Fetching,
    Filtering,
    Syncing { index: usize, total: usize },
    Finalized,
}

impl RunPhase {
    pub fn can_advance_to(self, next: RunPhase) -> bool {
        use RunPhase::*;
        match (self, next) {
            (Idle, Fetching) | (Fetching, Filtering) => true,
            (Filtering, Syncing { index: 1, total }) => total > 0,
            (Filtering, Finalized) => true,
            (Syncing { index, total }, Syncing { index: next, total: next_total }) => {
                total == next_total && next == index + 1 && next <= total
            }
            (Syncing { index, total }, Finalized) => index == total,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub enum ProgressStage<'a> {
    Started,
    Finished(&'a SyncOutcome),
}

/// Progress of one repository within a run. `index` starts at 1.
#[derive(Debug, Clone, Copy)]
pub struct ProgressEvent<'a> {
    pub index: usize,
    pub total: usize,
    pub descriptor: &'a RepositoryDescriptor,
    pub stage: ProgressStage<'a>,
}

/// Receives progress of a run. Rendering is entirely up to the implementation.
pub trait ProgressListener: Send {
    fn on_event(&mut self, event: &ProgressEvent<'_>);

    fn on_phase(&mut self, _phase: RunPhase) {}
}

/// Discards all progress.
impl ProgressListener for () {
    fn on_event(&mut self, _event: &ProgressEvent<'_>) {}
}

/// Cooperative cancellation of a run: repositories that have not started
/// yet are skipped, running backend invocations finish.
#[derive(Debug, Clone, Default)]
pub struct Cancellation(Arc<AtomicBool>);

impl Cancellation {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub sync: SyncOptions,
    /// Maximum number of repositories synchronized at once by
    /// [`Orchestrator::run_concurrent`].
    pub jobs: usize,
    pub cancellation: Cancellation,
}

/// Aggregate result of a run. Outcomes are in descriptor order.
#[derive(Debug)]
pub struct RunResult {
    pub total_attempted: usize,
    pub total_failed: usize,
    pub overall_success: bool,
    pub outcomes: Vec<SyncOutcome>,
}

#[derive(Default)]
struct RunTally {
    failed: usize,
    outcomes: Vec<SyncOutcome>,
}

impl RunTally {
    fn record(&mut self, outcome: SyncOutcome) {
        if outcome.is_failure() {
            self.failed += 1;
        }
        self.outcomes.push(outcome);
    }

    /// A run that synchronized nothing is not a success.
    fn finalize(self) -> RunResult {
        let total_attempted = self.outcomes.len();
        RunResult {
            total_attempted,
            total_failed: self.failed,
            overall_success: self.failed == 0 && total_attempted > 0,
            outcomes: self.outcomes,
        }
    }
}

/// Drives the sync engine over every descriptor of a run. A failing
/// repository never stops the others from being processed.
#[derive(Clone)]
pub struct Orchestrator {
    engine: Arc<SyncEngine>,
}

impl Orchestrator {
    pub fn new(engine: SyncEngine) -> Self {
        Orchestrator {
            engine: Arc::new(engine),
        }
    }

    /// Synchronizes the descriptors one after the other, in order.
    pub fn run(
        &self,
        descriptors: &[RepositoryDescriptor],
        destination_root: &Path,
        options: &RunOptions,
        listener: &mut dyn ProgressListener,
    ) -> RunResult {
        let total = descriptors.len();
        let mut claims = HashSet::new();
        let mut tally = RunTally::default();

        for (position, descriptor) in descriptors.iter().enumerate() {
            let index = position + 1;
            listener.on_phase(RunPhase::Syncing { index, total });
            emit(listener, index, total, descriptor, ProgressStage::Started);

            let outcome = match precheck(&mut claims, destination_root, descriptor, options) {
                Some(error) => SyncOutcome::Failed(error),
                None => self
                    .engine
                    .sync_one(descriptor, destination_root, options.sync),
            };

            log_outcome(index, total, descriptor, &outcome);
            emit(listener, index, total, descriptor, ProgressStage::Finished(&outcome));
            tally.record(outcome);
        }

        listener.on_phase(RunPhase::Finalized);
        tally.finalize()
    }

    /// Synchronizes up to `options.jobs` repositories at a time on blocking
    /// worker threads. Repositories are started in descriptor order, but with
    /// more than one job their progress events may interleave.
    pub async fn run_concurrent<L>(
        &self,
        descriptors: Vec<RepositoryDescriptor>,
        destination_root: PathBuf,
        options: RunOptions,
        listener: Arc<Mutex<L>>,
    ) -> RunResult
    where
        L: ProgressListener + ?Sized + 'static,
    {
        enum Pending {
            Done(SyncOutcome),
            Running(JoinHandle<SyncOutcome>),
        }

        let total = descriptors.len();
        let semaphore = Arc::new(Semaphore::new(options.jobs.max(1)));
        let destination_root = Arc::new(destination_root);
        let mut claims = HashSet::new();
        let mut pending = Vec::with_capacity(total);

        for (position, descriptor) in descriptors.into_iter().enumerate() {
            let index = position + 1;
            let descriptor = Arc::new(descriptor);

            let permit = match precheck(&mut claims, &destination_root, &descriptor, &options) {
                Some(error) => Err(error),
                None => semaphore
                    .clone()
                    .acquire_owned()
                    .await
                    .map_err(|error| SyncError::Task(error.to_string())),
            };
            // Ctrl-C may have arrived while waiting for a free slot.
            let permit = permit.and_then(|permit| {
                if options.cancellation.is_cancelled() {
                    Err(SyncError::Cancelled)
                } else {
                    Ok(permit)
                }
            });

            {
                let mut listener = listener.lock().unwrap_or_else(PoisonError::into_inner);
                listener.on_phase(RunPhase::Syncing { index, total });
                emit(&mut *listener, index, total, &descriptor, ProgressStage::Started);
            }

            match permit {
                Err(error) => {
                    let outcome = SyncOutcome::Failed(error);
                    log_outcome(index, total, &descriptor, &outcome);
                    let mut listener = listener.lock().unwrap_or_else(PoisonError::into_inner);
                    emit(
                        &mut *listener,
                        index,
                        total,
                        &descriptor,
                        ProgressStage::Finished(&outcome),
                    );
                    pending.push(Pending::Done(outcome));
                }
                Ok(permit) => {
                    let engine = self.engine.clone();
                    let destination_root = destination_root.clone();
                    let listener = listener.clone();
                    let sync = options.sync;
                    pending.push(Pending::Running(tokio::task::spawn_blocking(move || {
                        let outcome = engine.sync_one(&descriptor, &destination_root, sync);
                        log_outcome(index, total, &descriptor, &outcome);
                        {
                            let mut listener =
                                listener.lock().unwrap_or_else(PoisonError::into_inner);
                            emit(
                                &mut *listener,
                                index,
                                total,
                                &descriptor,
                                ProgressStage::Finished(&outcome),
                            );
                        }
                        drop(permit);
                        outcome
                    })));
                }
            }
        }

        let mut tally = RunTally::default();
        for entry in pending {
            let outcome = match entry {
                Pending::Done(outcome) => outcome,
                Pending::Running(handle) => match handle.await {
                    Ok(outcome) => outcome,
                    Err(error) => SyncOutcome::Failed(SyncError::Task(error.to_string())),
                },
            };
            tally.record(outcome);
        }

        listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .on_phase(RunPhase::Finalized);
        tally.finalize()
    }
}

/// Failures that are decided before the engine is involved.
fn precheck(
    claims: &mut HashSet<PathBuf>,
    destination_root: &Path,
    descriptor: &RepositoryDescriptor,
    options: &RunOptions,
) -> Option<SyncError> {
    if options.cancellation.is_cancelled() {
        return Some(SyncError::Cancelled);
    }
    let target = SyncEngine::target_dir(destination_root, descriptor);
    if !claims.insert(target.clone()) {
        warn!("{} appears more than once in the catalog", descriptor.path);
        return Some(SyncError::DuplicateTarget(target));
    }
    None
}

fn emit(
    listener: &mut (impl ProgressListener + ?Sized),
    index: usize,
    total: usize,
    descriptor: &RepositoryDescriptor,
    stage: ProgressStage<'_>,
) {
    listener.on_event(&ProgressEvent {
        index,
        total,
        descriptor,
        stage,
    });
}

fn log_outcome(
    index: usize,
    total: usize,
    descriptor: &RepositoryDescriptor,
    outcome: &SyncOutcome,
) {
    match outcome {
        SyncOutcome::Failed(error) => {
            debug!("[{}/{}] {} failed: {}", index, total, descriptor.path, error)
        }
        outcome => info!(
            "[{}/{}] {} backed up using {}",
            index, total, descriptor.path, outcome
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;

    #[test]
    fn phases_only_move_forward() {
        use RunPhase::*;

        assert!(Idle.can_advance_to(Fetching));
        assert!(Fetching.can_advance_to(Filtering));
        assert!(Filtering.can_advance_to(Syncing { index: 1, total: 2 }));
        assert!(Syncing { index: 1, total: 2 }.can_advance_to(Syncing { index: 2, total: 2 }));
        assert!(Syncing { index: 2, total: 2 }.can_advance_to(Finalized));
        assert!(Filtering.can_advance_to(Finalized));

        assert!(!Idle.can_advance_to(Filtering));
        assert!(!Fetching.can_advance_to(Syncing { index: 1, total: 1 }));
        assert!(!Filtering.can_advance_to(Syncing { index: 2, total: 2 }));
        assert!(!Syncing { index: 1, total: 2 }.can_advance_to(Finalized));
        assert!(!Syncing { index: 1, total: 2 }.can_advance_to(Filtering));
        assert!(!Finalized.can_advance_to(Idle));
    }

    #[test]
    fn empty_run_is_not_a_success() {
        let result = RunTally::default().finalize();
        assert_eq!(result.total_attempted, 0);
        assert_eq!(result.total_failed, 0);
        assert!(!result.overall_success);
    }

    #[test]
    fn tally_counts_failures() {
        let mut tally = RunTally::default();
        tally.record(SyncOutcome::ClonedFresh);
        tally.record(SyncOutcome::Failed(SyncError::Cancelled));
        tally.record(SyncOutcome::PulledIncremental);
        let result = tally.finalize();
        assert_eq!(result.total_attempted, 3);
        assert_eq!(result.total_failed, 1);
        assert!(!result.overall_success);
    }

    #[test]
    fn cancellation_is_shared() {
        let cancellation = Cancellation::default();
        let clone = cancellation.clone();
        assert!(!clone.is_cancelled());
        cancellation.cancel();
        assert!(clone.is_cancelled());
    }
}
