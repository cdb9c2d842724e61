use std::path::PathBuf;

use clap::Parser;

use crate::model::Transport;

/// Backs up every repository of a Kiln-style hosting service by cloning it
/// the first time and pulling changes afterwards.
///
/// Runs without user interaction: credentials for the repositories
/// themselves are resolved by Mercurial and git as usual.
#[derive(Debug, Parser)]
#[clap(version)]
pub struct CliArgs {
    /// Directory the repositories are mirrored into; created if missing
    #[clap(value_name = "DESTINATION")]
    pub destination: PathBuf,
    /// Server name, e.g. company.kilnhg.com
    #[clap(short, long)]
    pub server: Option<String>,
    /// API token used to list the repositories
    #[clap(short, long)]
    pub token: Option<String>,
    /// Clone over SSH instead of HTTPS
    #[clap(long)]
    pub ssh: bool,
    /// Only print warnings, errors and the summary
    #[clap(short, long, conflicts_with = "debug")]
    pub quiet: bool,
    /// Log backend commands and their output
    #[clap(long)]
    pub debug: bool,
    /// Only back up repositories below this project[/group[/repository]] prefix
    #[clap(short, long, value_name = "PREFIX")]
    pub limit: Option<String>,
    /// Also check out or update the working copy, not just the history
    #[clap(short, long)]
    pub update: bool,
    /// Save server and token to the config file in the destination directory
    #[clap(long)]
    pub save: bool,
    /// Number of repositories to back up at the same time
    #[clap(short, long, default_value_t = 1, value_parser = clap::value_parser!(u16).range(1..))]
    pub jobs: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verbosity {
    Quiet,
    Normal,
    Debug,
}

impl Verbosity {
    pub fn log_filter(self) -> &'static str {
        match self {
            Verbosity::Quiet => "warn",
            Verbosity::Normal => "info",
            Verbosity::Debug => "debug",
        }
    }
}

impl CliArgs {
    pub fn verbosity(&self) -> Verbosity {
        if self.debug {
            Verbosity::Debug
        } else if self.quiet {
            Verbosity::Quiet
        } else {
            Verbosity::Normal
        }
    }

    /// `Some` only when requested on the command line, so that configured
    /// transports are not overridden by the flag's absence.
    pub fn transport(&self) -> Option<Transport> {
        self.ssh.then_some(Transport::Ssh)
    }
}
