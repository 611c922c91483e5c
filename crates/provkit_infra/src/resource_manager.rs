//! Backend-agnostic resource discovery.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{InfraError, InfraResult};
use crate::models::{resource_types, Resource, ResourceGroup, TAG_ENV_NAME};
use crate::service::DeploymentService;

/// Finds what belongs to an environment by the `azd-env-name` tag convention.
#[derive(Clone)]
pub struct ResourceManager {
    service: Arc<dyn DeploymentService>,
}

impl ResourceManager {
    pub fn new(service: Arc<dyn DeploymentService>) -> Self {
        Self { service }
    }

    /// Resource groups tagged as belonging to `env_name`, sorted by name.
    pub async fn get_resource_groups_for_environment(
        &self,
        subscription_id: &str,
        env_name: &str,
        cancel: &CancellationToken,
    ) -> InfraResult<Vec<ResourceGroup>> {
        let mut groups = self
            .service
            .list_resource_groups(subscription_id, Some((TAG_ENV_NAME, env_name)), cancel)
            .await?;
        // Not every backend filters server-side.
        groups.retain(|g| g.has_tag(TAG_ENV_NAME, env_name));

        if groups.is_empty() {
            return Err(InfraError::ResourceGroupsNotFound {
                tag: TAG_ENV_NAME.to_string(),
                value: env_name.to_string(),
            });
        }

        groups.sort_by(|a, b| a.name.cmp(&b.name));
        debug!(
            "Found {} resource group(s) for environment '{}'",
            groups.len(),
            env_name
        );
        Ok(groups)
    }

    /// All resources in the environment's resource groups, optionally
    /// restricted to one resource type.
    pub async fn get_resources_for_environment(
        &self,
        subscription_id: &str,
        env_name: &str,
        resource_type: Option<&str>,
        cancel: &CancellationToken,
    ) -> InfraResult<Vec<Resource>> {
        let groups = self
            .get_resource_groups_for_environment(subscription_id, env_name, cancel)
            .await?;

        let mut resources = Vec::new();
        for group in &groups {
            let found = self
                .service
                .list_resource_group_resources(subscription_id, &group.name, cancel)
                .await?;
            resources.extend(
                found
                    .into_iter()
                    .filter(|r| resource_type.map(|t| r.is_type(t)).unwrap_or(true)),
            );
        }
        Ok(resources)
    }

    /// Soft-deletable resources in the given groups. Groups that no longer
    /// exist are skipped.
    pub async fn soft_delete_resources(
        &self,
        subscription_id: &str,
        resource_groups: &[String],
        cancel: &CancellationToken,
    ) -> InfraResult<Vec<Resource>> {
        let mut resources = Vec::new();
        for group in resource_groups {
            match self
                .service
                .list_resource_group_resources(subscription_id, group, cancel)
                .await
            {
                Ok(found) => resources.extend(
                    found
                        .into_iter()
                        .filter(|r| resource_types::is_soft_delete(&r.resource_type)),
                ),
                Err(e) if e.is_not_found() => {
                    debug!("Resource group '{}' is already gone", group);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(resources)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryDeploymentService;

    fn service() -> InMemoryDeploymentService {
        InMemoryDeploymentService::new()
            .with_resource_group("sub", "rg-web", "eastus2", &[(TAG_ENV_NAME, "dev")])
            .with_resource_group("sub", "rg-data", "eastus2", &[(TAG_ENV_NAME, "dev")])
            .with_resource_group("sub", "rg-other", "eastus2", &[(TAG_ENV_NAME, "prod")])
            .with_resource("sub", "rg-data", resource_types::KEY_VAULT, "kv-dev")
            .with_resource("sub", "rg-web", resource_types::APP_INSIGHTS_COMPONENT, "ai-dev")
    }

    #[tokio::test]
    async fn test_groups_for_environment_sorted() {
        let manager = ResourceManager::new(Arc::new(service()));

        let groups = manager
            .get_resource_groups_for_environment("sub", "dev", &CancellationToken::new())
            .await
            .unwrap();

        let names: Vec<&str> = groups.iter().map(|g| g.name.as_str()).collect();
        assert_eq!(names, vec!["rg-data", "rg-web"]);
    }

    #[tokio::test]
    async fn test_no_groups_is_not_found() {
        let manager = ResourceManager::new(Arc::new(service()));

        let err = manager
            .get_resource_groups_for_environment("sub", "staging", &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(err.is_not_found());
        assert_eq!(
            err.to_string(),
            "0 resource groups with tag 'azd-env-name' with value: 'staging'"
        );
    }

    #[tokio::test]
    async fn test_resources_filtered_by_type() {
        let manager = ResourceManager::new(Arc::new(service()));

        let insights = manager
            .get_resources_for_environment(
                "sub",
                "dev",
                Some(resource_types::APP_INSIGHTS_COMPONENT),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(insights.len(), 1);
        assert_eq!(insights[0].name, "ai-dev");
    }

    #[tokio::test]
    async fn test_soft_delete_resources_skips_missing_groups() {
        let manager = ResourceManager::new(Arc::new(service()));

        let found = manager
            .soft_delete_resources(
                "sub",
                &["rg-data".to_string(), "rg-web".to_string(), "rg-gone".to_string()],
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "kv-dev");
    }
}
