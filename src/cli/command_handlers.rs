use std::sync::{Arc, Mutex};

use anyhow::Context;
use log::{info, warn};

use crate::{
    cli::{args::CliArgs, progress::ConsoleProgress},
    config::{self, MirrorConfig},
    orchestrator::RunResult,
    RepoMirror,
};

/// Handler for a backup run. Returns the run's aggregate result; errors are
/// reserved for problems that prevent the run altogether.
pub async fn do_backup(args: &CliArgs) -> anyhow::Result<RunResult> {
    let mirror = mirror_from_args(args)?;

    let cancellation = mirror.cancellation();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, waiting for repositories in progress to finish");
            cancellation.cancel();
        }
    });

    let jobs = usize::from(args.jobs);
    let progress = Arc::new(Mutex::new(ConsoleProgress::stdout(args.verbosity(), jobs)));
    let result = mirror.backup_concurrent(progress).await;
    interrupt.abort();

    let result = result?;
    info!(
        "{} repositories attempted, {} failed",
        result.total_attempted, result.total_failed
    );
    Ok(result)
}

/// Layers command line flags over the destination's config file and the
/// environment, saving the credentials first if asked to.
fn mirror_from_args(args: &CliArgs) -> anyhow::Result<RepoMirror> {
    let destination = &args.destination;
    let stored = MirrorConfig::load(destination)?;

    let server = args.server.clone().or(stored.server);
    let token = args.token.clone().or(stored.token);
    let transport = args.transport().or(stored.transport).unwrap_or_default();

    if args.save {
        match (&server, &token) {
            (Some(server), Some(token)) => {
                std::fs::create_dir_all(destination).with_context(|| {
                    format!(
                        "Could not create destination directory {}",
                        destination.display()
                    )
                })?;
                config::save_credentials(destination, server, token)?;
            }
            _ => warn!("Not saving settings, server and token are both required"),
        }
    }

    let mut builder = RepoMirror::builder()
        .destination(destination)
        .transport(transport)
        .update_working_copy(args.update)
        .jobs(usize::from(args.jobs));
    if let Some(server) = server {
        builder = builder.server(server);
    }
    if let Some(token) = token {
        builder = builder.token(token);
    }
    if let Some(limit) = &args.limit {
        builder = builder.limit(limit);
    }
    builder.try_build()
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[test]
    fn save_writes_config_before_the_run() {
        let dir = tempfile::tempdir().unwrap();
        let destination = dir.path().join("backups");
        let args = CliArgs::try_parse_from([
            "repomirror",
            "-s",
            "example.kilnhg.com",
            "-t",
            "secret",
            "--save",
            destination.to_str().unwrap(),
        ])
        .unwrap();

        let mirror = mirror_from_args(&args).unwrap();

        assert_eq!(mirror.destination(), destination);
        let stored = MirrorConfig::load(&destination).unwrap();
        assert_eq!(stored.server.as_deref(), Some("example.kilnhg.com"));
        assert_eq!(stored.token.as_deref(), Some("secret"));
    }

    #[test]
    fn stored_credentials_fill_missing_flags() {
        let dir = tempfile::tempdir().unwrap();
        config::save_credentials(dir.path(), "example.kilnhg.com", "secret").unwrap();
        let args = CliArgs::try_parse_from(["repomirror", dir.path().to_str().unwrap()]).unwrap();

        assert!(mirror_from_args(&args).is_ok());
    }
}
