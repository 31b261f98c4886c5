mod cli;
mod commands;
mod config;
mod output;

use std::process;

use anyhow::Result;
use clap::Parser;
#[cfg(feature = "colored-output")]
use colored::*;
use eventdesk_client::FileCredentialStore;
use tracing::error;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use crate::cli::{Args, Commands};
use crate::commands::CommandExecutor;
use crate::config::AppConfig;
use crate::output::OutputManager;

const DEFAULT_LOG_FILTER: &str = "eventdesk=info,eventdesk_client=info";

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    let args = Args::parse();
    if let Err(e) = init_logging(args.verbose, args.quiet, args.json_logs) {
        eprintln!("Failed to initialise logging: {e}");
    }

    if let Err(e) = run(args).await {
        error!("Application error: {:#}", e);
        #[cfg(feature = "colored-output")]
        {
            eprintln!("{} {:#}", "Error:".red().bold(), e);
        }
        #[cfg(not(feature = "colored-output"))]
        {
            eprintln!("Error: {:#}", e);
        }
        process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    let app_config = AppConfig::load(args.config.as_deref())?;

    if let Commands::Config = args.command {
        println!("{}", app_config.show()?);
        if let Some(path) = AppConfig::default_path() {
            println!("# config file: {}", path.display());
        }
        println!("# session file: {}", app_config.credentials_path()?.display());
        return Ok(());
    }

    let client_config = app_config.client_config(&args)?;
    let store = FileCredentialStore::new(app_config.credentials_path()?);
    let executor =
        CommandExecutor::new(client_config, store, OutputManager::new(args.output)).await?;

    let result = match args.command {
        Commands::Login { email, password } => executor.login(&email, &password).await,
        Commands::Logout => executor.logout().await,
        Commands::Whoami => executor.whoami().await,
        Commands::Events {
            page,
            size,
            sort_by,
            desc,
            status,
            search,
        } => {
            executor
                .list_events(page, size, sort_by, desc, status, search)
                .await
        }
        Commands::Event { id } => executor.show_event(id).await,
        Commands::Participants { event_id } => executor.participants(event_id).await,
        Commands::Watch { event_id } => executor.watch(event_id).await,
        Commands::CheckIn { token } => executor.check_in(&token).await,
        Commands::Join { token } => executor.join(&token).await,
        Commands::Config => Ok(()),
    };

    // Persist whatever the command left behind, including refreshed or
    // cleared credentials, even when it failed.
    executor.save_session().await?;
    result
}

fn init_logging(verbose: bool, quiet: bool, json: bool) -> Result<()> {
    let filter = if quiet {
        EnvFilter::new("error")
    } else if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER))
    };

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init()?;
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_level(verbose)
                    .with_writer(std::io::stderr),
            )
            .try_init()?;
    }
    Ok(())
}
