//! Integration tests for scopes and resource discovery over the in-memory
//! control plane.

use std::collections::BTreeMap;
use std::sync::Arc;

use provkit_infra::{
    resource_types, DeployRequest, DeploymentService, InMemoryDeploymentService, ProvisioningState,
    ResourceManager, Scope, ScopeKind, TAG_ENV_NAME,
};
use serde_json::json;
use tokio_util::sync::CancellationToken;

fn template() -> DeployRequest {
    DeployRequest {
        template: json!({
            "outputs": {
                "AZURE_LOCATION": { "type": "string", "value": "[parameters('location')]" }
            }
        }),
        parameters: BTreeMap::from([("location".to_string(), json!("eastus2"))]),
    }
}

#[tokio::test]
async fn test_scope_deploy_then_fetch() {
    let service = Arc::new(InMemoryDeploymentService::new());
    let scope = Scope::subscription(service.clone(), "eastus2", "sub", "dev");
    let cancel = CancellationToken::new();

    assert!(scope.deployment(&cancel).await.unwrap_err().is_not_found());

    let deployed = scope.deploy(&template(), &cancel).await.unwrap();
    assert_eq!(deployed.provisioning_state, ProvisioningState::Succeeded);

    let fetched = scope.deployment(&cancel).await.unwrap();
    assert_eq!(fetched.outputs["AZURE_LOCATION"].value, json!("eastus2"));
}

#[tokio::test]
async fn test_scopes_are_isolated() {
    let service = Arc::new(InMemoryDeploymentService::new());
    let sub = Scope::subscription(service.clone(), "eastus2", "sub", "dev");
    let group = Scope::resource_group(service.clone(), "sub", "rg-dev", "dev");
    let cancel = CancellationToken::new();

    sub.deploy(&template(), &cancel).await.unwrap();

    assert_eq!(group.kind(), ScopeKind::ResourceGroup);
    assert!(group.deployment(&cancel).await.unwrap_err().is_not_found());
    assert_eq!(service.deploy_count(), 1);
}

#[tokio::test]
async fn test_discovery_after_teardown() {
    let service = Arc::new(
        InMemoryDeploymentService::new()
            .with_resource_group("sub", "rg-dev", "eastus2", &[(TAG_ENV_NAME, "dev")])
            .with_resource("sub", "rg-dev", resource_types::KEY_VAULT, "kv-dev"),
    );
    let manager = ResourceManager::new(service.clone());
    let cancel = CancellationToken::new();

    let groups = manager
        .get_resource_groups_for_environment("sub", "dev", &cancel)
        .await
        .unwrap();
    assert_eq!(groups.len(), 1);

    service
        .delete_resource_group("sub", "rg-dev", &cancel)
        .await
        .unwrap();

    let err = manager
        .get_resource_groups_for_environment("sub", "dev", &cancel)
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}
