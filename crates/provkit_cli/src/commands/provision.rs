//! Provision command - Plan and deploy an environment.

use anyhow::Result;
use clap::Args;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use provkit_infra::ScopeKind;
use provkit_provisioning::{DeployResult, Deployment, PlanArtifact};

use super::{parameter_lines, GlobalArgs, Workspace};

#[derive(Args)]
pub struct ProvisionArgs {
    /// Subscription to deploy to when the environment has none
    #[arg(short, long, env = "AZURE_SUBSCRIPTION_ID")]
    subscription: Option<String>,

    /// Location to deploy to when the environment has none
    #[arg(short, long, env = "AZURE_LOCATION")]
    location: Option<String>,

    /// Only compute and print the plan
    #[arg(long)]
    preview: bool,
}

pub async fn execute(args: ProvisionArgs, global: &GlobalArgs, cancel: &CancellationToken) -> Result<()> {
    let mut workspace = Workspace::open(global)?;
    if let Some(subscription) = args.subscription {
        workspace.env.set_subscription_id(subscription);
    }
    if let Some(location) = args.location {
        workspace.env.set_location(location);
    }
    workspace.ensure_target().await?;
    // Keep what was entered even if the deployment fails.
    workspace.save()?;

    workspace.check_tool()?;
    let manager = workspace.manager()?;
    info!(
        "Provisioning environment '{}' with {}",
        workspace.env.name(),
        manager.provider_name()
    );

    let plan = manager.plan(cancel).await?;
    println!("📋 Planned {} parameter(s):", plan.deployment.parameters.len());
    for line in parameter_lines(&plan.deployment.parameters) {
        println!("   {}", line);
    }
    if args.preview {
        return Ok(());
    }

    let kind = match &plan.artifact {
        PlanArtifact::ArmTemplate { target, .. } => *target,
        _ => ScopeKind::Subscription,
    };
    let scope = workspace.scope(kind)?;

    println!("🏗️  Deploying to {}...", scope);
    match manager.deploy(&plan, &scope, cancel).await {
        Ok(result) => {
            result.apply_to(&mut workspace.env);
            workspace.save()?;
            println!(
                "✅ Provisioned environment '{}' ({} output(s))",
                workspace.env.name(),
                result.deployment.outputs.len()
            );
            Ok(())
        }
        Err(e) => {
            if let Some(outputs) = e.partial_outputs().filter(|o| !o.is_empty()) {
                warn!("Deployment failed; saving {} partial output(s)", outputs.len());
                DeployResult::new(Deployment {
                    parameters: plan.deployment.parameters.clone(),
                    outputs: outputs.clone(),
                })
                .apply_to(&mut workspace.env);
                workspace.save()?;
            }
            Err(e.into())
        }
    }
}
