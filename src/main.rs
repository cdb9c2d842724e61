use std::process::ExitCode;

use clap::Parser;
use env_logger::Env;

use repomirror::cli::{args::CliArgs, command_handlers::do_backup};

fn run(cli_args: &CliArgs) -> anyhow::Result<bool> {
    // Blocking backend work runs on the runtime's blocking pool.
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    let result = runtime.block_on(do_backup(cli_args))?;
    Ok(result.overall_success)
}

fn main() -> ExitCode {
    let cli_args = CliArgs::parse();

    let log_filter = cli_args.verbosity().log_filter();
    env_logger::Builder::from_env(Env::default().default_filter_or(log_filter))
        .format_timestamp(None)
        .init();

    match run(&cli_args) {
        Ok(true) => {
            println!("All repositories backed up successfully.");
            ExitCode::SUCCESS
        }
        Ok(false) => {
            println!("Completed with errors.");
            ExitCode::FAILURE
        }
        Err(error) => {
            log::error!("{:#}", error);
            println!("Completed with errors.");
            ExitCode::FAILURE
        }
    }
}
