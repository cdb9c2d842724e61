use std::{
    ffi::{OsStr, OsString},
    path::{Path, PathBuf},
    process::{Command, Output},
};

use log::{debug, trace};

use super::{BackendError, VcsBackend};
use crate::model::VcsKind;

const DEFAULT_PROGRAM: &str = "hg";

/// Mercurial, driven through the `hg` executable.
///
/// Credentials are left to Mercurial itself (auth sections, keyring or
/// KilnAuth style extensions), so the child process gets the caller's
/// environment plus whatever it needs to locate the user's home directory.
#[derive(Debug, Clone)]
pub struct MercurialBackend {
    program: PathBuf,
}

impl Default for MercurialBackend {
    fn default() -> Self {
        Self::new(DEFAULT_PROGRAM)
    }
}

impl MercurialBackend {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        MercurialBackend {
            program: program.into(),
        }
    }

    fn command<I, S>(&self, args: I) -> Command
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut command = Command::new(&self.program);
        command.args(args);
        home_environment(&mut command);
        command
    }

    fn output(&self, mut command: Command) -> Result<Output, BackendError> {
        debug!("Running {:?}", command);
        let output = command.output().map_err(|source| BackendError::Spawn {
            program: self.program.display().to_string(),
            source,
        })?;
        trace!("stdout: {}", String::from_utf8_lossy(&output.stdout));
        trace!("stderr: {}", String::from_utf8_lossy(&output.stderr));
        Ok(output)
    }

    fn run(&self, command: Command) -> Result<(), BackendError> {
        let description = describe(&command);
        let output = self.output(command)?;
        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let diagnostics = if stderr.trim().is_empty() {
            String::from_utf8_lossy(&output.stdout).trim().to_owned()
        } else {
            stderr.trim().to_owned()
        };
        Err(BackendError::Command {
            command: description,
            status: output.status.to_string(),
            diagnostics,
        })
    }
}

impl VcsBackend for MercurialBackend {
    fn kind(&self) -> VcsKind {
        VcsKind::Mercurial
    }

    fn query_remote(&self, local_dir: &Path) -> Option<String> {
        let command = self.command([
            OsString::from("paths"),
            OsString::from("-R"),
            local_dir.as_os_str().to_owned(),
            OsString::from("default"),
        ]);
        match self.output(command) {
            Ok(output) if output.status.success() => {
                let url = String::from_utf8_lossy(&output.stdout).trim().to_owned();
                (!url.is_empty()).then_some(url)
            }
            Ok(_) => None,
            Err(error) => {
                debug!("Could not query {}: {}", local_dir.display(), error);
                None
            }
        }
    }

    fn clone_repository(
        &self,
        remote_url: &str,
        local_dir: &Path,
        with_working_copy: bool,
    ) -> Result<(), BackendError> {
        let mut args = vec![OsString::from("clone")];
        if !with_working_copy {
            args.push(OsString::from("--noupdate"));
        }
        args.push(OsString::from(remote_url));
        args.push(local_dir.as_os_str().to_owned());
        self.run(self.command(args))
    }

    fn pull(&self, local_dir: &Path, update_working_copy: bool) -> Result<(), BackendError> {
        let mut args = vec![OsString::from("pull")];
        if update_working_copy {
            args.push(OsString::from("--update"));
        }
        args.push(OsString::from("-R"));
        args.push(local_dir.as_os_str().to_owned());
        self.run(self.command(args))
    }
}

fn describe(command: &Command) -> String {
    std::iter::once(command.get_program())
        .chain(command.get_args())
        .map(|arg| arg.to_string_lossy())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Schedulers often start jobs without the variables that credential
/// extensions use to find the user's home directory.
#[cfg(not(windows))]
fn home_environment(command: &mut Command) {
    if std::env::var_os("HOME").is_none() {
        if let Some(home) = home::home_dir() {
            command.env("HOME", home);
        }
    }
}

#[cfg(windows)]
fn home_environment(command: &mut Command) {
    use std::path::Component;

    if let Some(profile) = home::home_dir() {
        let mut components = profile.components();
        if let Some(Component::Prefix(drive)) = components.next() {
            command.env("HOMEDRIVE", drive.as_os_str());
            command.env("HOMEPATH", components.as_path());
        }
    }
}
