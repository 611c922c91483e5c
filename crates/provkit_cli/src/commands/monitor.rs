//! Monitor command - Print Application Insights portal links.

use anyhow::{bail, Context, Result};
use clap::Args;
use tokio_util::sync::CancellationToken;

use provkit_infra::{resource_types, Resource, ResourceManager, TenantResolver};
use provkit_provisioning::ProvisioningError;

use super::{GlobalArgs, Workspace};

const PORTAL_URL_BASE: &str = "https://portal.azure.com";

#[derive(Args, Debug, Clone, Copy, Default)]
pub struct MonitorArgs {
    /// Application Insights Live Metrics
    #[arg(long)]
    pub live: bool,

    /// Application Insights Logs
    #[arg(long)]
    pub logs: bool,

    /// Application Insights overview dashboard (the default)
    #[arg(long)]
    pub overview: bool,
}

impl MonitorArgs {
    fn with_default(mut self) -> Self {
        if !self.live && !self.logs && !self.overview {
            self.overview = true;
        }
        self
    }
}

pub async fn execute(args: MonitorArgs, global: &GlobalArgs, cancel: &CancellationToken) -> Result<()> {
    let args = args.with_default();
    let workspace = Workspace::open(global)?;
    let Some(subscription_id) = workspace.env.subscription_id() else {
        return Err(ProvisioningError::configuration(
            "infrastructure has not been provisioned. Run `provkit provision`",
        )
        .into());
    };

    let resources = ResourceManager::new(workspace.service.clone())
        .get_resources_for_environment(subscription_id, workspace.env.name(), None, cancel)
        .await
        .context("discovering resource groups from deployment")?;

    let tenant_id = workspace
        .service
        .lookup_tenant(subscription_id, cancel)
        .await?;

    for link in portal_links(&args, &resources, &tenant_id)? {
        println!("{}", link);
    }
    Ok(())
}

fn portal_links(args: &MonitorArgs, resources: &[Resource], tenant_id: &str) -> Result<Vec<String>> {
    let insights: Vec<&Resource> = resources
        .iter()
        .filter(|r| r.is_type(resource_types::APP_INSIGHTS_COMPONENT))
        .collect();
    let dashboards: Vec<&Resource> = resources
        .iter()
        .filter(|r| r.is_type(resource_types::PORTAL_DASHBOARD))
        .collect();

    if insights.is_empty() && (args.live || args.logs) {
        bail!("application does not contain an Application Insights resource");
    }
    if dashboards.is_empty() && args.overview {
        bail!("application does not contain an Application Insights dashboard");
    }

    let mut links = Vec::new();
    for resource in insights {
        if args.live {
            links.push(format!("{}/#@{}/resource{}/quickPulse", PORTAL_URL_BASE, tenant_id, resource.id));
        }
        if args.logs {
            links.push(format!("{}/#@{}/resource{}/logs", PORTAL_URL_BASE, tenant_id, resource.id));
        }
    }
    if args.overview {
        for resource in dashboards {
            links.push(format!("{}/#@{}/dashboard/arm{}", PORTAL_URL_BASE, tenant_id, resource.id));
        }
    }
    Ok(links)
}
