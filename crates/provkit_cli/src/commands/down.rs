//! Down command - Destroy an environment's infrastructure.

use anyhow::Result;
use clap::Args;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use provkit_provisioning::{Deployment, DestroyOptions, ProvisioningError};

use super::{GlobalArgs, Workspace};

#[derive(Args)]
pub struct DownArgs {
    /// Do not ask for confirmation
    #[arg(long)]
    pub force: bool,

    /// Permanently delete soft-deleted resources (key vaults, ...)
    #[arg(long)]
    pub purge: bool,
}

pub async fn execute(args: DownArgs, global: &GlobalArgs, cancel: &CancellationToken) -> Result<()> {
    let mut workspace = Workspace::open(global)?;
    if workspace.env.subscription_id().is_none() {
        return Err(ProvisioningError::configuration(format!(
            "environment '{}' has not been provisioned",
            workspace.env.name()
        ))
        .into());
    }
    workspace.check_tool()?;
    let manager = workspace.manager()?;

    let deployment = match workspace.find_deployment(&manager, cancel).await? {
        Some((_, deployment)) => deployment,
        None => {
            warn!(
                "No deployment found for environment '{}'; destroying tagged resources only",
                workspace.env.name()
            );
            Deployment::default()
        }
    };

    let options = DestroyOptions::new(args.force, args.purge);
    match manager.destroy(&deployment, &options, cancel).await {
        Ok(result) => {
            result.scrub(&mut workspace.env);
            workspace.save()?;
            if !result.purge_targets.is_empty() {
                println!("🧹 Purged {} soft-deleted resource(s)", result.purge_targets.len());
            }
            println!("✅ Destroyed environment '{}'", workspace.env.name());
            Ok(())
        }
        Err(ProvisioningError::DestroyAborted) => {
            println!("Destroy cancelled; nothing was deleted.");
            Err(ProvisioningError::DestroyAborted.into())
        }
        Err(e) => {
            // Resources are gone even when the purge failed.
            if let Some(result) = e.destroy_result() {
                result.scrub(&mut workspace.env);
                workspace.save()?;
            }
            Err(e.into())
        }
    }
}
