use std::{
    path::{Path, PathBuf},
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use anyhow::Context;
use log::info;

use crate::{
    catalog::{self, CatalogSource},
    filter::PathFilter,
    flock::DestinationLock,
    model::{RepositoryDescriptor, Transport},
    orchestrator::{Cancellation, Orchestrator, ProgressListener, RunOptions, RunPhase, RunResult},
};

mod builder;

pub use builder::RepoMirrorBuilder;

/// Mirrors every repository of a hosted catalog below a destination root.
pub struct RepoMirror {
    destination: PathBuf,
    catalog: Box<dyn CatalogSource>,
    transport: Transport,
    filter: Option<PathFilter>,
    options: RunOptions,
    lock_timeout: Duration,
    orchestrator: Orchestrator,
}

/// Everything decided before the first repository is touched. The lock is
/// held until the run is over.
struct PreparedRun {
    descriptors: Vec<RepositoryDescriptor>,
    _lock: DestinationLock,
}

impl RepoMirror {
    pub fn builder() -> RepoMirrorBuilder {
        RepoMirrorBuilder::default()
    }

    pub fn destination(&self) -> &Path {
        &self.destination
    }

    /// Handle for stopping the run between repositories, e.g. on Ctrl-C.
    pub fn cancellation(&self) -> Cancellation {
        self.options.cancellation.clone()
    }

    /// Backs up all repositories one after the other.
    ///
    /// Errors are returned only for problems that stop the whole run: an
    /// unusable destination root or a failed catalog request. Failures of
    /// single repositories are part of the [`RunResult`].
    pub fn backup(&self, listener: &mut dyn ProgressListener) -> anyhow::Result<RunResult> {
        let run = self.prepare(listener)?;
        Ok(self
            .orchestrator
            .run(&run.descriptors, &self.destination, &self.options, listener))
    }

    /// Same as [`RepoMirror::backup`], synchronizing up to `jobs` repositories
    /// at a time. Must be called from a multi-threaded tokio runtime.
    pub async fn backup_concurrent<L>(&self, listener: Arc<Mutex<L>>) -> anyhow::Result<RunResult>
    where
        L: ProgressListener + 'static,
    {
        let run = tokio::task::block_in_place(|| {
            let mut listener = listener.lock().unwrap_or_else(PoisonError::into_inner);
            self.prepare(&mut *listener)
        })?;
        let PreparedRun {
            descriptors,
            _lock: lock,
        } = run;

        let result = self
            .orchestrator
            .run_concurrent(
                descriptors,
                self.destination.clone(),
                self.options.clone(),
                listener,
            )
            .await;
        drop(lock);
        Ok(result)
    }

    fn prepare(&self, listener: &mut dyn ProgressListener) -> anyhow::Result<PreparedRun> {
        std::fs::create_dir_all(&self.destination).with_context(|| {
            format!(
                "Could not create destination directory {}",
                self.destination.display()
            )
        })?;
        let lock = DestinationLock::acquire(&self.destination, self.lock_timeout)?;

        listener.on_phase(RunPhase::Fetching);
        let descriptors = catalog::load_descriptors(self.catalog.as_ref(), self.transport)
            .context("Could not get the list of repositories")?;

        listener.on_phase(RunPhase::Filtering);
        let descriptors = match &self.filter {
            Some(filter) => {
                let selected = filter.apply(descriptors);
                info!("{} repositories match the limit", selected.len());
                selected
            }
            None => descriptors,
        };

        Ok(PreparedRun {
            descriptors,
            _lock: lock,
        })
    }
}
