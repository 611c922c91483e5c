//! The provider contract.
//!
//! Every backend (Bicep, Terraform, the in-memory test provider) implements
//! [`Provider`]. The manager stays backend-agnostic; template compilation,
//! state files and parameter interpolation live behind this trait.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::info;

use provkit_console::Console;
use provkit_env::Environment;
use provkit_infra::{DeploymentService, Resource, ResourceManager, Scope};
use provkit_runner::CommandRunner;

use crate::deployment::{DeployResult, Deployment, DeploymentPlan, DestroyOptions, DestroyResult};
use crate::error::ProvisioningResult;
use crate::options::Options;

/// Everything a provider factory needs to build a provider.
#[derive(Clone)]
pub struct ProviderContext {
    /// Snapshot of the environment at construction.
    pub env: Environment,
    pub project_path: PathBuf,
    pub options: Options,
    pub console: Arc<dyn Console>,
    pub runner: Arc<dyn CommandRunner>,
    pub deployments: Arc<dyn DeploymentService>,
    pub interactive: bool,
}

impl ProviderContext {
    pub fn new(
        env: Environment,
        project_path: impl Into<PathBuf>,
        options: Options,
        console: Arc<dyn Console>,
        runner: Arc<dyn CommandRunner>,
        deployments: Arc<dyn DeploymentService>,
    ) -> Self {
        Self {
            env,
            project_path: project_path.into(),
            options,
            console,
            runner,
            deployments,
            interactive: false,
        }
    }

    pub fn interactive(mut self, interactive: bool) -> Self {
        self.interactive = interactive;
        self
    }

    /// Directory holding the infrastructure definition.
    pub fn infra_path(&self) -> PathBuf {
        if self.options.path.is_absolute() {
            self.options.path.clone()
        } else {
            self.project_path.join(&self.options.path)
        }
    }

    /// Per-environment directory for provider state.
    pub fn state_path(&self) -> PathBuf {
        state_path(&self.project_path, self.env.name())
    }

    pub fn resource_manager(&self) -> ResourceManager {
        ResourceManager::new(self.deployments.clone())
    }
}

fn state_path(project_path: &Path, env_name: &str) -> PathBuf {
    project_path.join(".azure").join(env_name).join("infra")
}

/// A provisioning backend.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Provider: Send + Sync {
    /// Whether plan needs a subscription id in the environment.
    fn requires_subscription(&self) -> bool {
        true
    }

    /// Compute a plan. Read-only against the cloud; may compile or cache
    /// local artifacts.
    async fn plan(&self, cancel: &CancellationToken) -> ProvisioningResult<DeploymentPlan>;

    /// Current deployment at `scope`. Fails with `NotFound` if none exists.
    async fn get_deployment(&self, scope: &Scope, cancel: &CancellationToken) -> ProvisioningResult<Deployment>;

    /// Create or update the deployment at `scope`. Safe to re-invoke after
    /// a partial failure.
    async fn deploy(
        &self,
        plan: &DeploymentPlan,
        scope: &Scope,
        cancel: &CancellationToken,
    ) -> ProvisioningResult<DeployResult>;

    /// Tear down the deployment in dependency order. Resources already gone
    /// are warnings, not failures.
    async fn destroy(
        &self,
        deployment: &Deployment,
        options: &DestroyOptions,
        cancel: &CancellationToken,
    ) -> ProvisioningResult<DestroyResult>;

    /// Permanently remove soft-deleted resources left by [`Provider::destroy`].
    async fn purge(&self, targets: &[Resource], cancel: &CancellationToken) -> ProvisioningResult<()> {
        let _ = (targets, cancel);
        Ok(())
    }
}

/// Purge `targets` one by one, stopping at the first failure.
pub(crate) async fn purge_soft_deleted(
    service: &dyn DeploymentService,
    targets: &[Resource],
    cancel: &CancellationToken,
) -> ProvisioningResult<()> {
    for resource in targets {
        info!("Purging {} ({})", resource.name, resource.resource_type);
        service.purge_resource(resource, cancel).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use provkit_console::MockConsole;
    use provkit_infra::InMemoryDeploymentService;
    use provkit_runner::MockRunner;

    fn context(options: Options) -> ProviderContext {
        ProviderContext::new(
            Environment::ephemeral("dev"),
            "/work/app",
            options,
            Arc::new(MockConsole::new()),
            Arc::new(MockRunner::new()),
            Arc::new(InMemoryDeploymentService::new()),
        )
    }

    #[test]
    fn test_paths() {
        let ctx = context(Options::default());
        assert_eq!(ctx.infra_path(), PathBuf::from("/work/app/infra"));
        assert_eq!(ctx.state_path(), PathBuf::from("/work/app/.azure/dev/infra"));
        assert!(!ctx.interactive);

        let ctx = context(Options::default().path("/abs/infra")).interactive(true);
        assert_eq!(ctx.infra_path(), PathBuf::from("/abs/infra"));
        assert!(ctx.interactive);
    }

    #[tokio::test]
    async fn test_purge_stops_at_first_failure() {
        let service = InMemoryDeploymentService::new();
        let vault = Resource::from_id(
            "/subscriptions/sub/resourceGroups/rg/providers/Microsoft.KeyVault/vaults/kv1",
        )
        .unwrap();
        let cancel = CancellationToken::new();

        purge_soft_deleted(&service, std::slice::from_ref(&vault), &cancel)
            .await
            .unwrap();
        assert_eq!(service.purged(), vec![vault.id.clone()]);

        service.fail_purge("locked");
        assert!(purge_soft_deleted(&service, &[vault], &cancel).await.is_err());
    }
}
