use std::{
    fmt::Display,
    path::{Path, PathBuf},
};

use log::{debug, info};
use percent_encoding::percent_decode_str;
use thiserror::Error;

use crate::{
    model::{RepositoryDescriptor, VcsKind},
    vcs::{BackendError, Backends, VcsBackend},
};

pub mod archive;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("No backend available for repositories of kind {0}")]
    UnsupportedVcs(VcsKind),
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error("Filesystem error at {path}: {source}")]
    Filesystem {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Another repository in this run already uses {0}")]
    DuplicateTarget(PathBuf),
    #[error("Cancelled before the repository was synchronized")]
    Cancelled,
    #[error("Synchronization task failed: {0}")]
    Task(String),
}

impl SyncError {
    fn filesystem(path: &Path) -> impl FnOnce(std::io::Error) -> SyncError + '_ {
        move |source| SyncError::Filesystem {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Result of synchronizing one repository.
#[derive(Debug)]
pub enum SyncOutcome {
    ClonedFresh,
    PulledIncremental,
    /// The directory held something else; it now lives at `archived_to`.
    ArchivedAndCloned { archived_to: PathBuf },
    Failed(SyncError),
}

impl SyncOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, SyncOutcome::Failed(_))
    }

    pub fn error(&self) -> Option<&SyncError> {
        match self {
            SyncOutcome::Failed(error) => Some(error),
            _ => None,
        }
    }
}

impl Display for SyncOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncOutcome::ClonedFresh => f.write_str("CLONE"),
            SyncOutcome::PulledIncremental => f.write_str("PULL"),
            SyncOutcome::ArchivedAndCloned { .. } => f.write_str("ARCHIVE+CLONE"),
            SyncOutcome::Failed(error) => write!(f, "FAILED: {error}"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncOptions {
    /// Materialize or update the working copy, not just the history.
    pub update_working_copy: bool,
}

enum Method {
    Clone,
    Pull,
    ArchiveAndClone(PathBuf),
}

/// Decides between clone, pull and archive-then-clone for one repository and
/// carries it out with the backend for the repository's kind.
#[derive(Clone)]
pub struct SyncEngine {
    backends: Backends,
}

impl SyncEngine {
    pub fn new(backends: Backends) -> Self {
        SyncEngine { backends }
    }

    pub fn target_dir(destination_root: &Path, descriptor: &RepositoryDescriptor) -> PathBuf {
        destination_root.join(descriptor.path.to_path())
    }

    pub fn sync_one(
        &self,
        descriptor: &RepositoryDescriptor,
        destination_root: &Path,
        options: SyncOptions,
    ) -> SyncOutcome {
        match self.try_sync(descriptor, destination_root, options) {
            Ok(outcome) => outcome,
            Err(error) => SyncOutcome::Failed(error),
        }
    }

    fn try_sync(
        &self,
        descriptor: &RepositoryDescriptor,
        destination_root: &Path,
        options: SyncOptions,
    ) -> Result<SyncOutcome, SyncError> {
        let backend = self
            .backends
            .get(descriptor.vcs)
            .ok_or(SyncError::UnsupportedVcs(descriptor.vcs))?;
        let target = Self::target_dir(destination_root, descriptor);

        let method = if target.exists() {
            match backend.query_remote(&target) {
                Some(recorded) if remotes_match(&recorded, &descriptor.remote_url) => Method::Pull,
                recorded => {
                    info!(
                        "{} exists but is not a clone of {} (found {:?}), archiving it",
                        target.display(),
                        descriptor.remote_url,
                        recorded
                    );
                    let archived = archive::archive_directory(&target)
                        .map_err(SyncError::filesystem(&target))?;
                    Method::ArchiveAndClone(archived)
                }
            }
        } else {
            Method::Clone
        };

        match method {
            Method::Pull => {
                debug!("Pulling {} into {}", descriptor.remote_url, target.display());
                backend.pull(&target, options.update_working_copy)?;
                Ok(SyncOutcome::PulledIncremental)
            }
            Method::Clone => {
                self.clone_into(backend, descriptor, &target, options)?;
                Ok(SyncOutcome::ClonedFresh)
            }
            Method::ArchiveAndClone(archived_to) => {
                self.clone_into(backend, descriptor, &target, options)?;
                Ok(SyncOutcome::ArchivedAndCloned { archived_to })
            }
        }
    }

    fn clone_into(
        &self,
        backend: &dyn VcsBackend,
        descriptor: &RepositoryDescriptor,
        target: &Path,
        options: SyncOptions,
    ) -> Result<(), SyncError> {
        std::fs::create_dir_all(target).map_err(SyncError::filesystem(target))?;
        debug!("Cloning {} into {}", descriptor.remote_url, target.display());

        let result = backend.clone_repository(
            &descriptor.remote_url,
            target,
            options.update_working_copy,
        );
        if result.is_err() {
            // Only succeeds if the failed clone left nothing behind.
            let _ = std::fs::remove_dir(target);
        }
        Ok(result?)
    }
}

/// Compares remote URLs after undoing percent-encoding, so a catalog URL with
/// escaped non-ASCII names matches what the backend recorded.
pub fn remotes_match(recorded: &str, expected: &str) -> bool {
    normalize_remote(recorded) == normalize_remote(expected)
}

fn normalize_remote(url: &str) -> String {
    let url = url.trim().trim_matches('"');
    percent_decode_str(url)
        .decode_utf8_lossy()
        .trim_end_matches('/')
        .to_owned()
}

#[cfg(test)]
mod tests {
    use std::{
        collections::HashMap,
        sync::{Arc, Mutex},
    };

    use super::*;
    use crate::model::RepositoryPath;

    use pretty_assertions::assert_eq;

    const ORIGIN_FILE: &str = ".origin";

    /// Records the remote in a marker file instead of running a real VCS.
    #[derive(Default)]
    struct MarkerBackend {
        calls: Arc<Mutex<Vec<String>>>,
        failing: HashMap<String, String>,
    }

    impl VcsBackend for MarkerBackend {
        fn kind(&self) -> VcsKind {
            VcsKind::Mercurial
        }

        fn query_remote(&self, local_dir: &Path) -> Option<String> {
            std::fs::read_to_string(local_dir.join(ORIGIN_FILE)).ok()
        }

        fn clone_repository(
            &self,
            remote_url: &str,
            local_dir: &Path,
            with_working_copy: bool,
        ) -> Result<(), BackendError> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("clone {remote_url} {with_working_copy}"));
            if let Some(message) = self.failing.get(remote_url) {
                return Err(BackendError::Command {
                    command: "clone".to_owned(),
                    status: "exit status: 255".to_owned(),
                    diagnostics: message.clone(),
                });
            }
            assert!(std::fs::read_dir(local_dir).unwrap().next().is_none());
            std::fs::write(local_dir.join(ORIGIN_FILE), remote_url).unwrap();
            Ok(())
        }

        fn pull(&self, local_dir: &Path, update_working_copy: bool) -> Result<(), BackendError> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("pull {} {update_working_copy}", local_dir.display()));
            Ok(())
        }
    }

    fn descriptor(url: &str) -> RepositoryDescriptor {
        RepositoryDescriptor::new(
            VcsKind::Mercurial,
            url,
            RepositoryPath::try_new("P", Some("G"), "R").unwrap(),
        )
    }

    fn engine(backend: MarkerBackend) -> SyncEngine {
        SyncEngine::new(Backends::new().with(backend))
    }

    #[test]
    fn clones_into_missing_directory() {
        let root = tempfile::tempdir().unwrap();
        let backend = MarkerBackend::default();
        let calls = backend.calls.clone();
        let engine = engine(backend);

        let outcome =
            engine.sync_one(&descriptor("https://h/r"), root.path(), SyncOptions::default());

        assert!(matches!(outcome, SyncOutcome::ClonedFresh), "{outcome}");
        assert!(root.path().join("P/G/R").join(ORIGIN_FILE).is_file());
        assert_eq!(*calls.lock().unwrap(), vec!["clone https://h/r false".to_owned()]);
    }

    #[test]
    fn pulls_matching_repository_repeatedly() {
        let root = tempfile::tempdir().unwrap();
        let backend = MarkerBackend::default();
        let calls = backend.calls.clone();
        let engine = engine(backend);
        let descriptor = descriptor("https://h/r");
        let options = SyncOptions {
            update_working_copy: true,
        };

        engine.sync_one(&descriptor, root.path(), options);
        for _ in 0..2 {
            let outcome = engine.sync_one(&descriptor, root.path(), options);
            assert!(matches!(outcome, SyncOutcome::PulledIncremental), "{outcome}");
        }

        let target = root.path().join("P").join("G").join("R");
        assert_eq!(
            *calls.lock().unwrap(),
            vec![
                "clone https://h/r true".to_owned(),
                format!("pull {} true", target.display()),
                format!("pull {} true", target.display()),
            ]
        );
    }

    #[test]
    fn archives_directory_with_different_remote() {
        let root = tempfile::tempdir().unwrap();
        let target = root.path().join("P").join("G").join("R");
        std::fs::create_dir_all(&target).unwrap();
        std::fs::write(target.join(ORIGIN_FILE), "https://h/other").unwrap();
        let engine = engine(MarkerBackend::default());

        let outcome =
            engine.sync_one(&descriptor("https://h/r"), root.path(), SyncOptions::default());

        let archived_to = match outcome {
            SyncOutcome::ArchivedAndCloned { archived_to } => archived_to,
            other => panic!("unexpected outcome {other}"),
        };
        assert_ne!(archived_to, target);
        assert_eq!(
            std::fs::read_to_string(archived_to.join(ORIGIN_FILE)).unwrap(),
            "https://h/other"
        );
        assert_eq!(
            std::fs::read_to_string(target.join(ORIGIN_FILE)).unwrap(),
            "https://h/r"
        );
    }

    #[test]
    fn archives_directory_that_is_not_a_repository() {
        let root = tempfile::tempdir().unwrap();
        let target = root.path().join("P").join("G").join("R");
        std::fs::create_dir_all(&target).unwrap();
        let engine = engine(MarkerBackend::default());

        let outcome =
            engine.sync_one(&descriptor("https://h/r"), root.path(), SyncOptions::default());

        let archived_to = match outcome {
            SyncOutcome::ArchivedAndCloned { archived_to } => archived_to,
            other => panic!("unexpected outcome {other}"),
        };
        assert!(archived_to.is_dir());
        let archive_root = root.path().join("P").join("G").join(archive::ARCHIVE_DIR);
        assert!(archived_to.starts_with(archive_root));
    }

    #[test]
    fn backend_failure_carries_diagnostics() {
        let root = tempfile::tempdir().unwrap();
        let backend = MarkerBackend {
            failing: HashMap::from([("https://h/r".to_owned(), "abort: HTTP Error 403".to_owned())]),
            ..MarkerBackend::default()
        };
        let engine = engine(backend);

        let outcome =
            engine.sync_one(&descriptor("https://h/r"), root.path(), SyncOptions::default());

        let error = outcome.error().expect("failure").to_string();
        assert!(error.contains("abort: HTTP Error 403"), "{error}");
        // The empty directory created for the clone is not left behind.
        assert!(!root.path().join("P").join("G").join("R").exists());
    }

    #[test]
    fn unsupported_kind_fails_without_touching_disk() {
        let root = tempfile::tempdir().unwrap();
        let backend = MarkerBackend::default();
        let calls = backend.calls.clone();
        let engine = engine(backend);
        let mut descriptor = descriptor("https://h/r");
        descriptor.vcs = VcsKind::Unsupported(9);

        let outcome = engine.sync_one(&descriptor, root.path(), SyncOptions::default());

        assert!(matches!(
            outcome,
            SyncOutcome::Failed(SyncError::UnsupportedVcs(VcsKind::Unsupported(9)))
        ));
        assert!(calls.lock().unwrap().is_empty());
        assert!(!root.path().join("P").exists());
    }

    #[test]
    fn remote_comparison_ignores_percent_encoding() {
        assert!(remotes_match(
            "https://example.com/kiln/Code/Проект/Repo One",
            "https://example.com/kiln/Code/%D0%9F%D1%80%D0%BE%D0%B5%D0%BA%D1%82/Repo%20One"
        ));
        assert!(remotes_match("https://h/r/", "https://h/r"));
        assert!(remotes_match("https://h/a%2fb", "https://h/a%2Fb"));
        assert!(!remotes_match("https://h/r", "https://h/r2"));
    }
}
