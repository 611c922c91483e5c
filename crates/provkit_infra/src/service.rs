//! The control-plane seam.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::InfraResult;
use crate::models::{ArmDeployment, DeployRequest, DeploymentTarget, Resource, ResourceGroup};

/// Operations provisioning needs from the cloud control plane.
///
/// Retries and throttling backoff belong to implementations, never to callers.
#[async_trait]
pub trait DeploymentService: Send + Sync {
    /// Fetch the deployment record at `target`. Fails with
    /// [`InfraError::NotFound`](crate::InfraError::NotFound) if none exists.
    async fn get_deployment(
        &self,
        target: &DeploymentTarget,
        cancel: &CancellationToken,
    ) -> InfraResult<ArmDeployment>;

    /// Create or update the deployment at `target`.
    ///
    /// A deployment the control plane accepted but failed to complete is
    /// returned as `Ok` with a `Failed` provisioning state so its partial
    /// outputs are not lost.
    async fn deploy(
        &self,
        target: &DeploymentTarget,
        request: &DeployRequest,
        cancel: &CancellationToken,
    ) -> InfraResult<ArmDeployment>;

    /// Resources created by the deployment at `target`.
    async fn list_deployment_resources(
        &self,
        target: &DeploymentTarget,
        cancel: &CancellationToken,
    ) -> InfraResult<Vec<Resource>>;

    /// Resource groups of a subscription, optionally filtered by a tag.
    async fn list_resource_groups(
        &self,
        subscription_id: &str,
        tag: Option<(&str, &str)>,
        cancel: &CancellationToken,
    ) -> InfraResult<Vec<ResourceGroup>>;

    async fn list_resource_group_resources(
        &self,
        subscription_id: &str,
        resource_group: &str,
        cancel: &CancellationToken,
    ) -> InfraResult<Vec<Resource>>;

    /// Delete a resource group and everything in it. Fails with
    /// [`InfraError::NotFound`](crate::InfraError::NotFound) if it does not exist.
    async fn delete_resource_group(
        &self,
        subscription_id: &str,
        resource_group: &str,
        cancel: &CancellationToken,
    ) -> InfraResult<()>;

    /// Permanently remove a soft-deleted resource.
    async fn purge_resource(&self, resource: &Resource, cancel: &CancellationToken) -> InfraResult<()>;
}

/// Resolves the tenant that owns a subscription.
#[async_trait]
pub trait TenantResolver: Send + Sync {
    async fn lookup_tenant(&self, subscription_id: &str, cancel: &CancellationToken) -> InfraResult<String>;
}
