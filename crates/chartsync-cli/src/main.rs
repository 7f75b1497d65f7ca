//! chartsync CLI - inspect and maintain a local chartsync store
//!
//! Works on the on-disk store without contacting the server: list the
//! queue, settle conflicts, retry or discard failures, export and import.

mod cli;
mod commands;
mod error;


use clap::Parser;

use crate::cli::{Cli, Commands};
use crate::commands::common::{resolve_config_path, resolve_db_path, StoreTarget};
use crate::commands::{
    run_cleanup, run_clear, run_config, run_conflicts, run_discard, run_export, run_import,
    run_queue, run_resolve, run_retry, run_status,
};
use crate::error::CliError;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(
                "chartsync=info"
                    .parse()
                    .map_err(|error| CliError::Config(format!("log filter: {error}")))?,
            ),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let target = StoreTarget {
        db_path: resolve_db_path(cli.db_path),
        config_path: resolve_config_path(cli.config),
    };

    match cli.command {
        Commands::Status { json } => run_status(json, &target)?,
        Commands::Queue { failed, json } => run_queue(failed, json, &target)?,
        Commands::Conflicts { resolved, json } => run_conflicts(resolved, json, &target)?,
        Commands::Resolve { id, keep, by } => run_resolve(&id, keep, by, &target).await?,
        Commands::Retry { id } => run_retry(&id, &target)?,
        Commands::Discard { id } => run_discard(&id, &target)?,
        Commands::Export { output } => run_export(output.as_deref(), &target)?,
        Commands::Import { input } => run_import(&input, &target)?,
        Commands::Cleanup { days } => run_cleanup(days, &target)?,
        Commands::Clear { yes } => run_clear(yes, &target)?,
        Commands::Config => run_config(&target)?,
    }

    Ok(())
}
