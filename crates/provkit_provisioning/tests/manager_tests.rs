//! End-to-end manager tests against the registered providers.

use std::sync::Arc;

use serde_json::json;
use tokio_util::sync::CancellationToken;

use provkit_console::MockConsole;
use provkit_env::Environment;
use provkit_infra::{resource_types, InMemoryDeploymentService, Scope, TAG_ENV_NAME};
use provkit_provisioning::{
    register_default_providers, register_test_provider, DestroyOptions, Manager, Options,
    ProviderContext, ProvisioningError, DESTROY_CONFIRMATION, TEST_PROVIDER,
};
use provkit_runner::MockRunner;

fn test_env() -> Environment {
    Environment::ephemeral_with_values("test-env", [("AZURE_LOCATION", "eastus2")])
}

fn context(env: Environment, options: Options, console: &MockConsole, service: &InMemoryDeploymentService) -> ProviderContext {
    ProviderContext::new(
        env,
        std::env::temp_dir(),
        options,
        Arc::new(console.clone()),
        Arc::new(MockRunner::new()),
        Arc::new(service.clone()),
    )
}

fn test_manager(console: &MockConsole) -> (Manager, Scope) {
    register_test_provider();
    let service = InMemoryDeploymentService::new();
    let manager = Manager::new(context(test_env(), Options::new(TEST_PROVIDER), console, &service)).unwrap();
    let scope = Scope::subscription(Arc::new(service), "eastus2", "SUBSCRIPTION_ID", "test-env");
    (manager, scope)
}

#[tokio::test]
async fn test_plan_resolves_location() {
    let (manager, _) = test_manager(&MockConsole::new());

    let plan = manager.plan(&CancellationToken::new()).await.unwrap();

    assert_eq!(plan.deployment.parameters["location"].value, json!("eastus2"));
}

#[tokio::test]
async fn test_get_deployment_before_deploy_is_not_found() {
    let (manager, scope) = test_manager(&MockConsole::new());

    let err = manager
        .get_deployment(&scope, &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, ProvisioningError::NotFound { .. }));
}

#[tokio::test]
async fn test_deploy_round_trip() {
    let (manager, scope) = test_manager(&MockConsole::new());
    let cancel = CancellationToken::new();

    let plan = manager.plan(&cancel).await.unwrap();
    let first = manager.deploy(&plan, &scope, &cancel).await.unwrap();
    let second = manager.deploy(&plan, &scope, &cancel).await.unwrap();
    assert_eq!(first.deployment.outputs, second.deployment.outputs);

    let fetched = manager.get_deployment(&scope, &cancel).await.unwrap();
    assert_eq!(fetched.parameters, plan.deployment.parameters);
    assert_eq!(fetched.outputs["AZURE_LOCATION"].value, json!("eastus2"));

    let mut env = test_env();
    first.apply_to(&mut env);
    assert_eq!(env.get("AZURE_ENV_NAME"), "test-env");
}

#[tokio::test]
async fn test_destroy_confirmed() {
    let console = MockConsole::new();
    console
        .when_confirm(|o| o.message.contains(DESTROY_CONFIRMATION))
        .respond(true);
    let (manager, scope) = test_manager(&console);
    let cancel = CancellationToken::new();

    let plan = manager.plan(&cancel).await.unwrap();
    manager.deploy(&plan, &scope, &cancel).await.unwrap();
    let deployment = manager.get_deployment(&scope, &cancel).await.unwrap();

    let result = manager
        .destroy(&deployment, &DestroyOptions::new(false, false), &cancel)
        .await
        .unwrap();

    assert!(console.output_contains(DESTROY_CONFIRMATION));
    assert!(result.invalidated_env_keys.contains(&"AZURE_LOCATION".to_string()));
    assert!(manager.get_deployment(&scope, &cancel).await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn test_destroy_declined() {
    let console = MockConsole::new();
    console
        .when_confirm(|o| o.message.contains(DESTROY_CONFIRMATION))
        .respond(false);
    let (manager, scope) = test_manager(&console);
    let cancel = CancellationToken::new();

    let plan = manager.plan(&cancel).await.unwrap();
    manager.deploy(&plan, &scope, &cancel).await.unwrap();
    let deployment = manager.get_deployment(&scope, &cancel).await.unwrap();

    let err = manager
        .destroy(&deployment, &DestroyOptions::new(false, false), &cancel)
        .await
        .unwrap_err();

    assert!(matches!(err, ProvisioningError::DestroyAborted));
    assert!(console.output_contains(DESTROY_CONFIRMATION));
    // Nothing was torn down.
    assert!(manager.get_deployment(&scope, &cancel).await.is_ok());
}

#[tokio::test]
async fn test_forced_destroy_skips_confirmation() {
    let console = MockConsole::new();
    let (manager, scope) = test_manager(&console);
    let cancel = CancellationToken::new();

    let plan = manager.plan(&cancel).await.unwrap();
    manager.deploy(&plan, &scope, &cancel).await.unwrap();
    let deployment = manager.get_deployment(&scope, &cancel).await.unwrap();

    manager
        .destroy(&deployment, &DestroyOptions::new(true, false), &cancel)
        .await
        .unwrap();

    assert!(!console.output_contains(DESTROY_CONFIRMATION));
}

#[tokio::test]
async fn test_unknown_provider() {
    let service = InMemoryDeploymentService::new();
    let err = Manager::new(context(
        test_env(),
        Options::new("does-not-exist"),
        &MockConsole::new(),
        &service,
    ))
    .err()
    .unwrap();

    assert!(err.is_configuration());
    assert!(err.to_string().contains("does-not-exist"));
}

#[tokio::test]
async fn test_missing_location() {
    register_test_provider();
    let service = InMemoryDeploymentService::new();
    let manager = Manager::new(context(
        Environment::ephemeral("no-location"),
        Options::new(TEST_PROVIDER),
        &MockConsole::new(),
        &service,
    ))
    .unwrap();

    let err = manager.plan(&CancellationToken::new()).await.unwrap_err();

    assert!(err.is_configuration());
}

#[tokio::test]
async fn test_cancelled_before_deploy() {
    let (manager, scope) = test_manager(&MockConsole::new());
    let plan = manager.plan(&CancellationToken::new()).await.unwrap();

    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = manager.deploy(&plan, &scope, &cancel).await.unwrap_err();

    assert!(matches!(err, ProvisioningError::Cancelled { .. }));
}

const TEMPLATE: &str = r#"{
    "$schema": "https://schema.management.azure.com/schemas/2018-05-01/subscriptionDeploymentTemplate.json#",
    "parameters": {
        "location": { "type": "string" },
        "environmentName": { "type": "string" }
    },
    "resources": [],
    "outputs": {
        "AZURE_LOCATION": { "type": "string", "value": "[parameters('location')]" }
    }
}"#;

#[tokio::test]
async fn test_bicep_provision_and_purge() {
    register_default_providers();
    let dir = tempfile::tempdir().unwrap();
    let infra = dir.path().join("infra");
    std::fs::create_dir_all(&infra).unwrap();
    std::fs::write(infra.join("main.json"), TEMPLATE).unwrap();

    let service = InMemoryDeploymentService::new()
        .with_resource_group("sub", "rg-dev", "eastus2", &[(TAG_ENV_NAME, "dev")])
        .with_resource("sub", "rg-dev", resource_types::KEY_VAULT, "kv-dev");
    let env = Environment::ephemeral_with_values(
        "dev",
        [("AZURE_LOCATION", "eastus2"), ("AZURE_SUBSCRIPTION_ID", "sub")],
    );
    let ctx = ProviderContext::new(
        env,
        dir.path(),
        Options::new("bicep"),
        Arc::new(MockConsole::new()),
        Arc::new(MockRunner::new()),
        Arc::new(service.clone()),
    );
    let manager = Manager::new(ctx).unwrap();
    let scope = Scope::subscription(Arc::new(service.clone()), "eastus2", "sub", "dev");
    let cancel = CancellationToken::new();

    let plan = manager.plan(&cancel).await.unwrap();
    manager.deploy(&plan, &scope, &cancel).await.unwrap();
    let deployment = manager.get_deployment(&scope, &cancel).await.unwrap();
    assert_eq!(deployment.outputs["AZURE_LOCATION"].value, json!("eastus2"));

    let result = manager
        .destroy(&deployment, &DestroyOptions::new(true, true), &cancel)
        .await
        .unwrap();

    assert_eq!(result.purge_targets.len(), 1);
    assert_eq!(service.deleted_groups(), vec!["rg-dev".to_string()]);
    assert_eq!(service.purged().len(), 1);
}

#[tokio::test]
async fn test_bicep_purge_failure_keeps_result() {
    register_default_providers();
    let dir = tempfile::tempdir().unwrap();
    let infra = dir.path().join("infra");
    std::fs::create_dir_all(&infra).unwrap();
    std::fs::write(infra.join("main.json"), TEMPLATE).unwrap();

    let service = InMemoryDeploymentService::new()
        .with_resource_group("sub", "rg-dev", "eastus2", &[(TAG_ENV_NAME, "dev")])
        .with_resource("sub", "rg-dev", resource_types::KEY_VAULT, "kv-dev");
    service.fail_purge("vault is protected");
    let ctx = ProviderContext::new(
        Environment::ephemeral_with_values(
            "dev",
            [("AZURE_LOCATION", "eastus2"), ("AZURE_SUBSCRIPTION_ID", "sub")],
        ),
        dir.path(),
        Options::new("bicep"),
        Arc::new(MockConsole::new()),
        Arc::new(MockRunner::new()),
        Arc::new(service.clone()),
    );
    let manager = Manager::new(ctx).unwrap();

    let err = manager
        .destroy(
            &Default::default(),
            &DestroyOptions::new(true, true),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, ProvisioningError::PurgeFailed { .. }));
    assert_eq!(err.destroy_result().unwrap().purge_targets.len(), 1);
}
