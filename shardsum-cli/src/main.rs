mod cli;
mod commands;
mod context;
mod output;

use std::process::ExitCode;

use clap::Parser;
use shardsum::ShardsumError;

use crate::cli::{Cli, Command};
use crate::commands::{merge, verify};

/// Exit status for errors that are not engine errors (bad flags, unreadable
/// config files).
const USAGE_EXIT_CODE: u8 = 1;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let format = cli.format;

    let default_filter = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    let result = match cli.command {
        Command::Merge(cmd) => merge::run(cmd, format).await,
        Command::Verify(cmd) => verify::run(cmd, format),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            exit_code(&e)
        }
    }
}

fn exit_code(err: &anyhow::Error) -> ExitCode {
    match err.downcast_ref::<ShardsumError>() {
        Some(e) => ExitCode::from(e.kind().exit_code() as u8),
        None => ExitCode::from(USAGE_EXIT_CODE),
    }
}
