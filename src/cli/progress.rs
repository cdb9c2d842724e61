use std::io::{self, Write};

use log::warn;

use crate::{
    cli::args::Verbosity,
    model::RepositoryDescriptor,
    orchestrator::{ProgressEvent, ProgressListener, ProgressStage},
    sync::SyncOutcome,
};

const RULE_WIDTH: usize = 60;

/// Prints a run the way an operator reads it in a scheduler's mail:
/// a `project/group` header, one line per repository and a delimited
/// block for every failure. Failures are printed even when quiet.
pub struct ConsoleProgress<W> {
    out: W,
    verbosity: Verbosity,
    /// With a single job the method is appended to the line printed when the
    /// repository starts; otherwise each repository gets one line when done.
    inline: bool,
    current_group: Option<String>,
}

impl ConsoleProgress<io::Stdout> {
    pub fn stdout(verbosity: Verbosity, jobs: usize) -> Self {
        ConsoleProgress::new(io::stdout(), verbosity, jobs)
    }
}

impl<W: Write> ConsoleProgress<W> {
    pub fn new(out: W, verbosity: Verbosity, jobs: usize) -> Self {
        ConsoleProgress {
            out,
            verbosity,
            inline: jobs <= 1,
            current_group: None,
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn render(&mut self, event: &ProgressEvent<'_>) -> io::Result<()> {
        let verbose = self.verbosity != Verbosity::Quiet;
        match (event.stage, self.inline) {
            (ProgressStage::Started, true) if verbose => {
                self.header(event.descriptor)?;
                write!(self.out, "{} ", repository_line(event))?;
            }
            (ProgressStage::Started, _) => {}
            (ProgressStage::Finished(outcome), true) => {
                if verbose || outcome.is_failure() {
                    self.result(event.descriptor, outcome)?;
                }
            }
            (ProgressStage::Finished(outcome), false) => {
                if verbose {
                    self.header(event.descriptor)?;
                    write!(self.out, "{} ", repository_line(event))?;
                }
                if verbose || outcome.is_failure() {
                    self.result(event.descriptor, outcome)?;
                }
            }
        }
        self.out.flush()
    }

    fn header(&mut self, descriptor: &RepositoryDescriptor) -> io::Result<()> {
        let group = descriptor.path.group_display();
        if self.current_group.as_deref() != Some(group.as_str()) {
            writeln!(self.out, "\n{group}")?;
            self.current_group = Some(group);
        }
        Ok(())
    }

    fn result(
        &mut self,
        descriptor: &RepositoryDescriptor,
        outcome: &SyncOutcome,
    ) -> io::Result<()> {
        match outcome.error() {
            None => writeln!(self.out, "backed up using method {outcome}"),
            Some(error) => {
                let rule = "*".repeat(RULE_WIDTH);
                writeln!(self.out, "**** FAILED ****")?;
                writeln!(self.out, "{rule}")?;
                writeln!(
                    self.out,
                    "Error backing up repository {}\nError was: {}",
                    descriptor.remote_url, error
                )?;
                writeln!(self.out, "{rule}")
            }
        }
    }
}

impl<W: Write + Send> ProgressListener for ConsoleProgress<W> {
    fn on_event(&mut self, event: &ProgressEvent<'_>) {
        if let Err(error) = self.render(event) {
            warn!("Could not print progress: {}", error);
        }
    }
}

fn repository_line(event: &ProgressEvent<'_>) -> String {
    format!(
        "    >> [{}/{}] {}",
        event.index,
        event.total,
        event.descriptor.path.repository()
    )
}
