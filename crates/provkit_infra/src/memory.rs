//! In-memory control plane.
//!
//! A deterministic stand-in for the cloud used by tests across the
//! workspace. Deploying evaluates only the simplest template outputs
//! (literals and `[parameters('name')]`); everything else is recorded as
//! `null`.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{InfraError, InfraResult};
use crate::models::{
    resource_types, ArmDeployment, DeployRequest, DeploymentTarget, ProvisioningState, Resource,
    ResourceGroup, TypedValue, TAG_ENV_NAME,
};
use crate::service::{DeploymentService, TenantResolver};

#[derive(Debug, Clone)]
struct DeployFailure {
    message: String,
    partial_outputs: BTreeMap<String, TypedValue>,
}

#[derive(Default)]
struct State {
    deployments: HashMap<String, ArmDeployment>,
    deployment_resources: HashMap<String, Vec<Resource>>,
    groups: BTreeMap<(String, String), ResourceGroup>,
    group_resources: HashMap<(String, String), Vec<Resource>>,
    tenants: HashMap<String, String>,
    next_failure: Option<DeployFailure>,
    purge_failure: Option<String>,
    delete_failures: HashSet<String>,
    deleted_groups: Vec<String>,
    purged: Vec<String>,
    deploy_count: usize,
}

fn group_key(subscription_id: &str, name: &str) -> (String, String) {
    (subscription_id.to_string(), name.to_lowercase())
}

/// Fake control plane that keeps everything in memory.
#[derive(Clone, Default)]
pub struct InMemoryDeploymentService {
    state: Arc<RwLock<State>>,
}

impl InMemoryDeploymentService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a resource group.
    pub fn with_resource_group(
        self,
        subscription_id: &str,
        name: &str,
        location: &str,
        tags: &[(&str, &str)],
    ) -> Self {
        let group = ResourceGroup {
            id: format!("/subscriptions/{}/resourceGroups/{}", subscription_id, name),
            name: name.to_string(),
            location: location.to_string(),
            tags: tags
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        };
        self.state
            .write()
            .groups
            .insert(group_key(subscription_id, name), group);
        self
    }

    /// Add a resource to an existing or implicit resource group.
    pub fn with_resource(
        self,
        subscription_id: &str,
        resource_group: &str,
        resource_type: &str,
        name: &str,
    ) -> Self {
        let resource = Resource {
            id: format!(
                "/subscriptions/{}/resourceGroups/{}/providers/{}/{}",
                subscription_id, resource_group, resource_type, name
            ),
            name: name.to_string(),
            resource_type: resource_type.to_string(),
            location: None,
        };
        self.state
            .write()
            .group_resources
            .entry(group_key(subscription_id, resource_group))
            .or_default()
            .push(resource);
        self
    }

    /// Seed an existing deployment record.
    pub fn with_deployment(self, target: &DeploymentTarget, deployment: ArmDeployment) -> Self {
        self.state.write().deployments.insert(target.key(), deployment);
        self
    }

    /// Pin the resources reported for a deployment.
    pub fn with_deployment_resources(self, target: &DeploymentTarget, resources: Vec<Resource>) -> Self {
        self.state
            .write()
            .deployment_resources
            .insert(target.key(), resources);
        self
    }

    pub fn with_tenant(self, subscription_id: &str, tenant_id: &str) -> Self {
        self.state
            .write()
            .tenants
            .insert(subscription_id.to_string(), tenant_id.to_string());
        self
    }

    /// Make the next deploy end in a `Failed` state with the given outputs.
    pub fn fail_next_deploy(&self, message: impl Into<String>, partial_outputs: &[(&str, &str)]) {
        self.state.write().next_failure = Some(DeployFailure {
            message: message.into(),
            partial_outputs: partial_outputs
                .iter()
                .map(|(k, v)| {
                    (
                        k.to_string(),
                        TypedValue {
                            type_name: "String".to_string(),
                            value: serde_json::Value::String(v.to_string()),
                        },
                    )
                })
                .collect(),
        });
    }

    pub fn fail_purge(&self, message: impl Into<String>) {
        self.state.write().purge_failure = Some(message.into());
    }

    /// Make deleting `resource_group` fail.
    pub fn fail_delete(&self, resource_group: &str) {
        self.state
            .write()
            .delete_failures
            .insert(resource_group.to_lowercase());
    }

    /// Names of deleted resource groups, in deletion order.
    pub fn deleted_groups(&self) -> Vec<String> {
        self.state.read().deleted_groups.clone()
    }

    /// Ids of purged resources, in purge order.
    pub fn purged(&self) -> Vec<String> {
        self.state.read().purged.clone()
    }

    pub fn deploy_count(&self) -> usize {
        self.state.read().deploy_count
    }

    pub fn has_resource_group(&self, subscription_id: &str, name: &str) -> bool {
        self.state
            .read()
            .groups
            .contains_key(&group_key(subscription_id, name))
    }

    fn evaluate_outputs(request: &DeployRequest) -> BTreeMap<String, TypedValue> {
        let Some(outputs) = request.template.get("outputs").and_then(|o| o.as_object()) else {
            return BTreeMap::new();
        };

        outputs
            .iter()
            .map(|(name, spec)| {
                let type_name = spec
                    .get("type")
                    .and_then(|t| t.as_str())
                    .unwrap_or("String")
                    .to_string();
                let value = match spec.get("value") {
                    Some(serde_json::Value::String(expr)) if expr.starts_with('[') => {
                        parameter_reference(expr)
                            .and_then(|p| request.parameters.get(p).cloned())
                            .unwrap_or(serde_json::Value::Null)
                    }
                    Some(literal) => literal.clone(),
                    None => serde_json::Value::Null,
                };
                (name.clone(), TypedValue { type_name, value })
            })
            .collect()
    }
}

/// Extract `name` from `[parameters('name')]`.
fn parameter_reference(expr: &str) -> Option<&str> {
    expr.strip_prefix("[parameters('")?.strip_suffix("')]")
}

#[async_trait]
impl DeploymentService for InMemoryDeploymentService {
    async fn get_deployment(
        &self,
        target: &DeploymentTarget,
        _cancel: &CancellationToken,
    ) -> InfraResult<ArmDeployment> {
        self.state
            .read()
            .deployments
            .get(&target.key())
            .cloned()
            .ok_or_else(|| InfraError::NotFound(target.to_string()))
    }

    async fn deploy(
        &self,
        target: &DeploymentTarget,
        request: &DeployRequest,
        cancel: &CancellationToken,
    ) -> InfraResult<ArmDeployment> {
        if cancel.is_cancelled() {
            return Err(InfraError::Runner(provkit_runner::RunnerError::Cancelled(
                target.to_string(),
            )));
        }

        let mut state = self.state.write();
        state.deploy_count += 1;

        let parameters = request
            .parameters
            .iter()
            .map(|(k, v)| {
                (
                    k.clone(),
                    TypedValue {
                        type_name: json_type_name(v).to_string(),
                        value: v.clone(),
                    },
                )
            })
            .collect();

        let (provisioning_state, outputs, error) = match state.next_failure.take() {
            Some(failure) => (
                ProvisioningState::Failed,
                failure.partial_outputs,
                Some(failure.message),
            ),
            None => (ProvisioningState::Succeeded, Self::evaluate_outputs(request), None),
        };

        let deployment = ArmDeployment {
            id: target.key(),
            name: target.deployment_name.clone(),
            provisioning_state,
            parameters,
            outputs,
            timestamp: Some(Utc::now()),
            error,
        };

        debug!("In-memory deploy of {} -> {:?}", target, provisioning_state);
        state.deployments.insert(target.key(), deployment.clone());
        Ok(deployment)
    }

    async fn list_deployment_resources(
        &self,
        target: &DeploymentTarget,
        _cancel: &CancellationToken,
    ) -> InfraResult<Vec<Resource>> {
        let state = self.state.read();
        if !state.deployments.contains_key(&target.key()) {
            return Err(InfraError::NotFound(target.to_string()));
        }
        if let Some(resources) = state.deployment_resources.get(&target.key()) {
            return Ok(resources.clone());
        }

        // Default: every group of the subscription tagged for this deployment.
        let mut resources = Vec::new();
        for ((subscription_id, _), group) in &state.groups {
            if subscription_id != &target.subscription_id
                || !group.has_tag(TAG_ENV_NAME, &target.deployment_name)
            {
                continue;
            }
            resources.push(Resource {
                id: group.id.clone(),
                name: group.name.clone(),
                resource_type: resource_types::RESOURCE_GROUP.to_string(),
                location: Some(group.location.clone()),
            });
            if let Some(children) = state
                .group_resources
                .get(&group_key(subscription_id, &group.name))
            {
                resources.extend(children.iter().cloned());
            }
        }
        Ok(resources)
    }

    async fn list_resource_groups(
        &self,
        subscription_id: &str,
        tag: Option<(&str, &str)>,
        _cancel: &CancellationToken,
    ) -> InfraResult<Vec<ResourceGroup>> {
        Ok(self
            .state
            .read()
            .groups
            .iter()
            .filter(|((sub, _), _)| sub == subscription_id)
            .map(|(_, group)| group)
            .filter(|group| tag.map(|(k, v)| group.has_tag(k, v)).unwrap_or(true))
            .cloned()
            .collect())
    }

    async fn list_resource_group_resources(
        &self,
        subscription_id: &str,
        resource_group: &str,
        _cancel: &CancellationToken,
    ) -> InfraResult<Vec<Resource>> {
        let state = self.state.read();
        let key = group_key(subscription_id, resource_group);
        if !state.groups.contains_key(&key) {
            return Err(InfraError::NotFound(format!(
                "resource group '{}'",
                resource_group
            )));
        }
        Ok(state.group_resources.get(&key).cloned().unwrap_or_default())
    }

    async fn delete_resource_group(
        &self,
        subscription_id: &str,
        resource_group: &str,
        _cancel: &CancellationToken,
    ) -> InfraResult<()> {
        let mut state = self.state.write();
        if state.delete_failures.contains(&resource_group.to_lowercase()) {
            return Err(InfraError::AzCli {
                command: format!("group delete --name {}", resource_group),
                message: "simulated delete failure".to_string(),
            });
        }

        let key = group_key(subscription_id, resource_group);
        if state.groups.remove(&key).is_none() {
            return Err(InfraError::NotFound(format!(
                "resource group '{}'",
                resource_group
            )));
        }
        state.group_resources.remove(&key);
        state.deleted_groups.push(resource_group.to_string());
        Ok(())
    }

    async fn purge_resource(&self, resource: &Resource, _cancel: &CancellationToken) -> InfraResult<()> {
        let mut state = self.state.write();
        if let Some(message) = state.purge_failure.clone() {
            return Err(InfraError::AzCli {
                command: format!("purge {}", resource.name),
                message,
            });
        }
        state.purged.push(resource.id.clone());
        Ok(())
    }
}

#[async_trait]
impl TenantResolver for InMemoryDeploymentService {
    async fn lookup_tenant(&self, subscription_id: &str, _cancel: &CancellationToken) -> InfraResult<String> {
        self.state
            .read()
            .tenants
            .get(subscription_id)
            .cloned()
            .ok_or_else(|| InfraError::NotFound(format!("tenant for subscription '{}'", subscription_id)))
    }
}

fn json_type_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Bool(_) => "Bool",
        serde_json::Value::Number(n) if n.is_i64() || n.is_u64() => "Int",
        serde_json::Value::Number(_) => "Number",
        serde_json::Value::Array(_) => "Array",
        serde_json::Value::Object(_) => "Object",
        _ => "String",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request() -> DeployRequest {
        DeployRequest {
            template: json!({
                "outputs": {
                    "AZURE_LOCATION": { "type": "string", "value": "[parameters('location')]" },
                    "WEBSITE_URL": { "type": "string", "value": "https://example.com" },
                    "COMPUTED": { "type": "string", "value": "[reference('x').id]" }
                }
            }),
            parameters: BTreeMap::from([("location".to_string(), json!("eastus2"))]),
        }
    }

    #[tokio::test]
    async fn test_deploy_and_get() {
        let service = InMemoryDeploymentService::new();
        let target = DeploymentTarget::subscription("sub", "eastus2", "dev");
        let cancel = CancellationToken::new();

        let deployed = service.deploy(&target, &request(), &cancel).await.unwrap();
        assert_eq!(deployed.provisioning_state, ProvisioningState::Succeeded);
        assert_eq!(deployed.outputs["AZURE_LOCATION"].value, json!("eastus2"));
        assert_eq!(deployed.outputs["WEBSITE_URL"].value, json!("https://example.com"));
        assert_eq!(deployed.outputs["COMPUTED"].value, serde_json::Value::Null);
        assert_eq!(deployed.parameters["location"].type_name, "String");

        let fetched = service.get_deployment(&target, &cancel).await.unwrap();
        assert_eq!(fetched, deployed);
        assert_eq!(service.deploy_count(), 1);
    }

    #[tokio::test]
    async fn test_failed_deploy_keeps_partial_outputs() {
        let service = InMemoryDeploymentService::new();
        let target = DeploymentTarget::subscription("sub", "eastus2", "dev");
        service.fail_next_deploy("quota exceeded", &[("STORAGE_NAME", "st1")]);

        let deployed = service
            .deploy(&target, &request(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(deployed.provisioning_state, ProvisioningState::Failed);
        assert_eq!(deployed.error.as_deref(), Some("quota exceeded"));
        assert_eq!(deployed.outputs["STORAGE_NAME"].value, json!("st1"));
    }

    #[tokio::test]
    async fn test_groups_by_tag_and_delete() {
        let service = InMemoryDeploymentService::new()
            .with_resource_group("sub", "rg-dev", "eastus2", &[(TAG_ENV_NAME, "dev")])
            .with_resource_group("sub", "rg-prod", "eastus2", &[(TAG_ENV_NAME, "prod")])
            .with_resource("sub", "rg-dev", resource_types::KEY_VAULT, "kv-dev");
        let cancel = CancellationToken::new();

        let groups = service
            .list_resource_groups("sub", Some((TAG_ENV_NAME, "dev")), &cancel)
            .await
            .unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].name, "rg-dev");

        let resources = service
            .list_resource_group_resources("sub", "rg-dev", &cancel)
            .await
            .unwrap();
        assert_eq!(resources[0].name, "kv-dev");

        service.delete_resource_group("sub", "rg-dev", &cancel).await.unwrap();
        let again = service.delete_resource_group("sub", "rg-dev", &cancel).await;
        assert!(again.unwrap_err().is_not_found());
        assert_eq!(service.deleted_groups(), vec!["rg-dev"]);
    }

    #[tokio::test]
    async fn test_deployment_resources_default_to_tagged_groups() {
        let target = DeploymentTarget::subscription("sub", "eastus2", "dev");
        let service = InMemoryDeploymentService::new()
            .with_resource_group("sub", "rg-dev", "eastus2", &[(TAG_ENV_NAME, "dev")])
            .with_resource("sub", "rg-dev", resource_types::KEY_VAULT, "kv-dev");
        let cancel = CancellationToken::new();

        assert!(service
            .list_deployment_resources(&target, &cancel)
            .await
            .unwrap_err()
            .is_not_found());

        service.deploy(&target, &request(), &cancel).await.unwrap();
        let resources = service.list_deployment_resources(&target, &cancel).await.unwrap();

        assert_eq!(resources.len(), 2);
        assert!(resources[0].is_type(resource_types::RESOURCE_GROUP));
        assert!(resources[1].is_type(resource_types::KEY_VAULT));
    }

    #[test]
    fn test_parameter_reference() {
        assert_eq!(parameter_reference("[parameters('location')]"), Some("location"));
        assert_eq!(parameter_reference("[variables('x')]"), None);
    }
}
