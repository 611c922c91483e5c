//! Show command - Print the outputs of the current deployment.

use anyhow::{Context, Result};
use clap::Args;
use tokio_util::sync::CancellationToken;

use provkit_infra::{key_vault_name, resource_id, Resource, ResourceId};

use super::{parameter_lines, GlobalArgs, Workspace};

#[derive(Args)]
pub struct ShowArgs {
    /// Describe one resource, by name (looked up as AZURE_RESOURCE_<NAME>_ID) or by id
    resource: Option<String>,

    /// Also print the deployment's input parameters
    #[arg(long)]
    parameters: bool,

    /// Also list the resources the deployment created
    #[arg(long)]
    resources: bool,
}

pub async fn execute(args: ShowArgs, global: &GlobalArgs, cancel: &CancellationToken) -> Result<()> {
    let workspace = Workspace::open(global)?;

    if let Some(name) = &args.resource {
        let id = resource_id(name, &workspace.env)
            .with_context(|| format!("resolving resource '{}'", name))?;
        for line in describe_resource(&id) {
            println!("{}", line);
        }
        return Ok(());
    }

    if workspace.env.subscription_id().is_none() {
        println!("Environment '{}' has not been provisioned.", workspace.env.name());
        return Ok(());
    }
    let manager = workspace.manager()?;

    let Some((scope, deployment)) = workspace.find_deployment(&manager, cancel).await? else {
        println!("No deployment found for environment '{}'.", workspace.env.name());
        return Ok(());
    };

    println!("📦 {}", scope);
    if args.parameters {
        println!("Parameters:");
        for line in parameter_lines(&deployment.parameters) {
            println!("   {}", line);
        }
    }
    println!("Outputs:");
    for (name, output) in &deployment.outputs {
        println!("   {}={}", name, output.env_value());
    }

    let vault = key_vault_name(&workspace.env);
    if !vault.is_empty() {
        println!("🔑 Key vault: {}", vault);
    }

    if args.resources {
        let resources = scope
            .resources(cancel)
            .await
            .with_context(|| format!("listing resources of {}", scope))?;
        println!("Resources:");
        for line in resource_lines(&resources) {
            println!("   {}", line);
        }
    }
    Ok(())
}

fn describe_resource(id: &ResourceId) -> Vec<String> {
    let mut lines = vec![
        format!("Name:           {}", id.name),
        format!("Type:           {}", id.resource_type),
        format!("Subscription:   {}", id.subscription_id),
    ];
    if let Some(group) = &id.resource_group {
        lines.push(format!("Resource group: {}", group));
    }
    lines.push(format!("Id:             {}", id));
    lines
}

fn resource_lines(resources: &[Resource]) -> Vec<String> {
    resources
        .iter()
        .map(|r| format!("{} ({})", r.name, r.resource_type))
        .collect()
}
