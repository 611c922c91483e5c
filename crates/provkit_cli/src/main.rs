//! provkit CLI - Main entry point.
//!
//! Exit codes:
//! - 0: Success
//! - 1: General error
//! - 2: Configuration error
//! - 3: Destroy declined
//! - 4: Deployment failure

use std::process::ExitCode;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use provkit_provisioning::ProvisioningError;

mod commands;

use commands::{Cli, Commands};

/// CI-friendly exit codes
pub struct ExitCodes;

impl ExitCodes {
    pub const SUCCESS: u8 = 0;
    pub const GENERAL_ERROR: u8 = 1;
    pub const CONFIGURATION_ERROR: u8 = 2;
    pub const ABORTED: u8 = 3;
    pub const DEPLOYMENT_FAILED: u8 = 4;
}

const DEFAULT_LOG_FILTER: &str = "provkit=info,warn";

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("provkit=debug,info")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER))
    };
    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(filter)
        .try_init();

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            eprintln!("Failed to listen for CTRL-C: {}", e);
            return;
        }
        eprintln!("\nReceived CTRL-C, cancelling...");
        on_interrupt.cancel();
    });

    let result = match cli.command {
        Commands::Provision(args) => commands::provision::execute(args, &cli.global, &cancel).await,
        Commands::Down(args) => commands::down::execute(args, &cli.global, &cancel).await,
        Commands::Show(args) => commands::show::execute(args, &cli.global, &cancel).await,
        Commands::Monitor(args) => commands::monitor::execute(args, &cli.global, &cancel).await,
    };

    match result {
        Ok(()) => ExitCode::from(ExitCodes::SUCCESS),
        Err(e) => {
            let exit_code = categorize_error(&e);
            eprintln!("Error: {:#}", e);
            ExitCode::from(exit_code)
        }
    }
}

/// Categorize error to determine exit code
fn categorize_error(e: &anyhow::Error) -> u8 {
    match e.downcast_ref::<ProvisioningError>().map(ProvisioningError::root) {
        Some(ProvisioningError::Configuration(_)) => ExitCodes::CONFIGURATION_ERROR,
        Some(ProvisioningError::DestroyAborted) => ExitCodes::ABORTED,
        Some(ProvisioningError::DeploymentFailed { .. }) => ExitCodes::DEPLOYMENT_FAILED,
        _ => ExitCodes::GENERAL_ERROR,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_categorize_error() {
        let config: anyhow::Error = ProvisioningError::configuration("no location").into();
        assert_eq!(categorize_error(&config), ExitCodes::CONFIGURATION_ERROR);

        let aborted = anyhow::Error::from(ProvisioningError::DestroyAborted).context("running down");
        assert_eq!(categorize_error(&aborted), ExitCodes::ABORTED);

        let failed: anyhow::Error = ProvisioningError::DeploymentFailed {
            message: "quota".to_string(),
            outputs: BTreeMap::new(),
        }
        .with_context("deploy", "environment 'dev'")
        .into();
        assert_eq!(categorize_error(&failed), ExitCodes::DEPLOYMENT_FAILED);

        assert_eq!(categorize_error(&anyhow::anyhow!("boom")), ExitCodes::GENERAL_ERROR);
    }
}
