use std::{path::Path, sync::Arc};

use thiserror::Error;

use crate::model::VcsKind;

pub mod git;
pub mod mercurial;

pub use git::GitBackend;
pub use mercurial::MercurialBackend;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("Could not run {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },
    #[error("`{command}` failed ({status}):\n{diagnostics}")]
    Command {
        command: String,
        status: String,
        diagnostics: String,
    },
    #[error("Git error: {0}")]
    Git(#[from] git2::Error),
    #[error("Local branch {branch} has diverged from its upstream")]
    Diverged { branch: String },
}

/// The operations the sync engine needs from a version-control system.
///
/// Implementations must be usable from several worker threads at once; they
/// are never asked to work on the same directory concurrently.
pub trait VcsBackend: Send + Sync {
    fn kind(&self) -> VcsKind;

    /// The remote URL recorded in the repository at exactly `local_dir`, or
    /// `None` when the directory is not a repository of this kind.
    fn query_remote(&self, local_dir: &Path) -> Option<String>;

    /// Clones `remote_url` into `local_dir`, which is either missing or empty.
    /// Without `with_working_copy` only history is stored.
    fn clone_repository(
        &self,
        remote_url: &str,
        local_dir: &Path,
        with_working_copy: bool,
    ) -> Result<(), BackendError>;

    /// Fetches new history into `local_dir`, optionally updating the working copy.
    fn pull(&self, local_dir: &Path, update_working_copy: bool) -> Result<(), BackendError>;
}

/// Backends available to a run, looked up by kind.
#[derive(Clone, Default)]
pub struct Backends {
    backends: Vec<Arc<dyn VcsBackend>>,
}

impl Backends {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mercurial through the `hg` executable and Git through libgit2.
    pub fn standard() -> Self {
        Self::new()
            .with(MercurialBackend::default())
            .with(GitBackend::default())
    }

    /// Registers `backend`, replacing any backend of the same kind.
    pub fn with(mut self, backend: impl VcsBackend + 'static) -> Self {
        self.backends.retain(|b| b.kind() != backend.kind());
        self.backends.push(Arc::new(backend));
        self
    }

    pub fn get(&self, kind: VcsKind) -> Option<&dyn VcsBackend> {
        self.backends
            .iter()
            .find(|backend| backend.kind() == kind)
            .map(|backend| backend.as_ref())
    }
}
