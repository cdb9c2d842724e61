use std::{env, path::PathBuf, time::Duration};

use anyhow::bail;

use crate::{
    catalog::{CatalogSource, HttpCatalog},
    filter::PathFilter,
    model::Transport,
    orchestrator::{Orchestrator, RunOptions},
    sync::{SyncEngine, SyncOptions},
    vcs::Backends,
    RepoMirror,
};

const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Default)]
pub struct RepoMirrorBuilder {
    destination: Option<PathBuf>,
    server: Option<String>,
    token: Option<String>,
    transport: Option<Transport>,
    limit: Option<String>,
    update_working_copy: bool,
    jobs: Option<usize>,
    backends: Option<Backends>,
    catalog: Option<Box<dyn CatalogSource>>,
    lock_timeout: Option<Duration>,
}

impl RepoMirrorBuilder {
    /// Directory the repositories are mirrored into.
    ///
    /// Defaults to the current directory.
    pub fn destination(mut self, path: impl Into<PathBuf>) -> Self {
        self.destination = Some(path.into());
        self
    }

    /// Host name or base URL of the hosting service.
    pub fn server(mut self, server: impl Into<String>) -> Self {
        self.server = Some(server.into());
        self
    }

    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Defaults to [`Transport::Https`].
    pub fn transport(mut self, transport: Transport) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Only mirror repositories below this `project[/group[/repository]]` prefix.
    pub fn limit(mut self, prefix: impl Into<String>) -> Self {
        self.limit = Some(prefix.into());
        self
    }

    pub fn update_working_copy(mut self, update: bool) -> Self {
        self.update_working_copy = update;
        self
    }

    /// Number of repositories synchronized at once by
    /// [`RepoMirror::backup_concurrent`].
    ///
    /// Defaults to 1.
    pub fn jobs(mut self, jobs: usize) -> Self {
        self.jobs = Some(jobs);
        self
    }

    /// Defaults to [`Backends::standard`].
    pub fn backends(mut self, backends: Backends) -> Self {
        self.backends = Some(backends);
        self
    }

    /// Replaces the HTTP catalog client. When set, server and token are not needed.
    pub fn catalog(mut self, catalog: impl CatalogSource + 'static) -> Self {
        self.catalog = Some(Box::new(catalog));
        self
    }

    /// How long to wait for another run holding the destination root.
    ///
    /// Defaults to 5 minutes.
    pub fn lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = Some(timeout);
        self
    }

    pub fn try_build(self) -> anyhow::Result<RepoMirror> {
        let Self {
            destination,
            server,
            token,
            transport,
            limit,
            update_working_copy,
            jobs,
            backends,
            catalog,
            lock_timeout,
        } = self;

        let destination = match destination {
            Some(destination) => destination,
            None => env::current_dir()?,
        };

        let catalog = match catalog {
            Some(catalog) => catalog,
            None => {
                let server = non_blank(server);
                let token = non_blank(token);
                match (server, token) {
                    (Some(server), Some(token)) => {
                        Box::new(HttpCatalog::new(&server, &token)) as Box<dyn CatalogSource>
                    }
                    (None, _) => bail!(
                        "No server configured: pass --server, set REPOMIRROR_SERVER or save it in the destination's config file"
                    ),
                    (_, None) => bail!(
                        "No API token configured: pass --token, set REPOMIRROR_TOKEN or save it in the destination's config file"
                    ),
                }
            }
        };

        let jobs = jobs.unwrap_or(1);
        if jobs == 0 {
            bail!("The number of jobs must be at least 1");
        }

        let engine = SyncEngine::new(backends.unwrap_or_else(Backends::standard));

        Ok(RepoMirror {
            destination,
            catalog,
            transport: transport.unwrap_or_default(),
            filter: limit.as_deref().and_then(PathFilter::new),
            options: RunOptions {
                sync: SyncOptions {
                    update_working_copy,
                },
                jobs,
                cancellation: Default::default(),
            },
            lock_timeout: lock_timeout.unwrap_or(DEFAULT_LOCK_TIMEOUT),
            orchestrator: Orchestrator::new(engine),
        })
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|value| !value.trim().is_empty())
}
