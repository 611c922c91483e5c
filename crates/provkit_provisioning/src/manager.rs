//! The provisioning manager.
//!
//! Single orchestration point for plan, deploy and destroy. The manager owns
//! exactly one provider, chosen by name at construction, and never talks to
//! the cloud itself. Every provider call is raced against the caller's
//! cancellation token; on cancellation the backend's own record is left as
//! the source of truth and nothing is rolled back.

use std::future::Future;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use provkit_console::{Console, ConsoleOptions};
use provkit_env::Environment;
use provkit_infra::Scope;

use crate::deployment::{DeployResult, Deployment, DeploymentPlan, DestroyOptions, DestroyResult};
use crate::error::{ProvisioningError, ProvisioningResult};
use crate::provider::{Provider, ProviderContext};
use crate::registry;

/// Confirmation asked before any destroy that is not forced.
pub const DESTROY_CONFIRMATION: &str = "Are you sure you want to destroy?";

pub struct Manager {
    env: Environment,
    provider_name: String,
    console: Arc<dyn Console>,
    provider: Box<dyn Provider>,
}

impl Manager {
    /// Build a manager with the provider registered under
    /// `context.options.provider`. Unknown names are a configuration error.
    pub fn new(context: ProviderContext) -> ProvisioningResult<Self> {
        let name = context.options.provider_name().to_string();
        let factory = registry::resolve(&name)?;
        let provider = factory(&context)?;
        info!("Using provisioning provider '{}'", name);

        Ok(Self {
            env: context.env,
            provider_name: name,
            console: context.console,
            provider,
        })
    }

    /// Build a manager around an already constructed provider.
    pub fn with_provider(context: ProviderContext, provider: Box<dyn Provider>) -> Self {
        Self {
            provider_name: context.options.provider_name().to_string(),
            env: context.env,
            console: context.console,
            provider,
        }
    }

    pub fn provider_name(&self) -> &str {
        &self.provider_name
    }

    pub fn environment(&self) -> &Environment {
        &self.env
    }

    fn env_label(&self) -> String {
        format!("environment '{}'", self.env.name())
    }

    /// Compute a deployment plan.
    ///
    /// The environment must have a location, and a subscription id when the
    /// provider needs one. The returned plan is fully resolved.
    pub async fn plan(&self, cancel: &CancellationToken) -> ProvisioningResult<DeploymentPlan> {
        let label = self.env_label();
        if self.env.location().is_none() {
            return Err(ProvisioningError::configuration(format!(
                "{} has no location; set AZURE_LOCATION",
                label
            )));
        }
        if self.provider.requires_subscription() && self.env.subscription_id().is_none() {
            return Err(ProvisioningError::configuration(format!(
                "{} has no subscription; set AZURE_SUBSCRIPTION_ID",
                label
            )));
        }

        let plan = guarded("plan", &label, self.provider.plan(cancel), cancel).await?;
        plan.ensure_resolved()?;
        debug!(
            "Planned {} parameter(s) for {}",
            plan.deployment.parameters.len(),
            label
        );
        Ok(plan)
    }

    /// The most recent deployment at `scope`.
    pub async fn get_deployment(&self, scope: &Scope, cancel: &CancellationToken) -> ProvisioningResult<Deployment> {
        let label = scope.to_string();
        guarded(
            "get deployment",
            &label,
            self.provider.get_deployment(scope, cancel),
            cancel,
        )
        .await
        .map_err(|e| {
            if e.is_not_found() && !matches!(e, ProvisioningError::NotFound { .. }) {
                ProvisioningError::NotFound { scope: label.clone() }
            } else {
                e
            }
        })
    }

    /// Execute `plan` at `scope`.
    ///
    /// Persisting the result into the environment is the caller's job, via
    /// [`DeployResult::apply_to`].
    pub async fn deploy(
        &self,
        plan: &DeploymentPlan,
        scope: &Scope,
        cancel: &CancellationToken,
    ) -> ProvisioningResult<DeployResult> {
        plan.ensure_resolved()?;

        let label = scope.to_string();
        let result = guarded("deploy", &label, self.provider.deploy(plan, scope, cancel), cancel).await?;
        info!(
            "Deployed {} with {} output(s)",
            label,
            result.deployment.outputs.len()
        );
        Ok(result)
    }

    /// Destroy `deployment`.
    ///
    /// Unless forced, the user must confirm first; declining returns
    /// [`ProvisioningError::DestroyAborted`] and touches nothing. With purge
    /// set, soft-deleted resources are removed afterwards; a purge failure
    /// is returned as [`ProvisioningError::PurgeFailed`] carrying the
    /// completed result.
    pub async fn destroy(
        &self,
        deployment: &Deployment,
        options: &DestroyOptions,
        cancel: &CancellationToken,
    ) -> ProvisioningResult<DestroyResult> {
        let label = self.env_label();

        if !options.force() {
            let question = ConsoleOptions::new(DESTROY_CONFIRMATION)
                .default_value(false)
                .help(format!(
                    "This deletes every resource provisioned for {}",
                    label
                ));
            let confirmed = guarded(
                "destroy confirmation",
                &label,
                async {
                    self.console
                        .confirm(question)
                        .await
                        .map_err(ProvisioningError::from)
                },
                cancel,
            )
            .await?;

            if !confirmed {
                info!("Destroy of {} declined", label);
                return Err(ProvisioningError::DestroyAborted);
            }
        }

        let result = guarded(
            "destroy",
            &label,
            self.provider.destroy(deployment, options, cancel),
            cancel,
        )
        .await?;
        info!("Destroyed {}", label);

        if options.purge() && !result.purge_targets.is_empty() {
            let purged = guarded(
                "purge",
                &label,
                self.provider.purge(&result.purge_targets, cancel),
                cancel,
            )
            .await;
            if let Err(e) = purged {
                error!("Purge after destroying {} failed: {}", label, e);
                return Err(ProvisioningError::PurgeFailed {
                    message: e.to_string(),
                    result: Box::new(result),
                });
            }
            info!("Purged {} resource(s)", result.purge_targets.len());
        }

        Ok(result)
    }
}

/// Run `future` unless `cancel` fires first, attaching operation context to
/// any error.
async fn guarded<T, F>(
    operation: &str,
    scope: &str,
    future: F,
    cancel: &CancellationToken,
) -> ProvisioningResult<T>
where
    F: Future<Output = ProvisioningResult<T>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            warn!("{} cancelled for {}", operation, scope);
            Err(ProvisioningError::Cancelled {
                operation: operation.to_string(),
            })
        }
        result = future => result.map_err(|e| e.with_context(operation, scope)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::time::Duration;

    use async_trait::async_trait;
    use provkit_console::MockConsole;
    use provkit_infra::{InMemoryDeploymentService, InfraError, Resource};
    use provkit_runner::MockRunner;
    use serde_json::json;

    use crate::deployment::{InputParameter, OutputParameter, ParameterSource, PlanArtifact};
    use crate::options::Options;
    use crate::provider::MockProvider;

    fn context(console: &MockConsole, values: &[(&str, &str)]) -> ProviderContext {
        ProviderContext::new(
            Environment::ephemeral_with_values("dev", values.iter().copied()),
            "/work/app",
            Options::new("mock"),
            Arc::new(console.clone()),
            Arc::new(MockRunner::new()),
            Arc::new(InMemoryDeploymentService::new()),
        )
    }

    fn located() -> Vec<(&'static str, &'static str)> {
        vec![("AZURE_LOCATION", "eastus2"), ("AZURE_SUBSCRIPTION_ID", "sub")]
    }

    fn scope() -> Scope {
        Scope::subscription(Arc::new(InMemoryDeploymentService::new()), "eastus2", "sub", "dev")
    }

    fn plan(value: serde_json::Value) -> DeploymentPlan {
        let mut deployment = Deployment::default();
        deployment.parameters.insert(
            "location".to_string(),
            InputParameter::new(value, ParameterSource::ParametersFile),
        );
        DeploymentPlan::new(deployment, PlanArtifact::None)
    }

    fn vault() -> Resource {
        Resource::from_id("/subscriptions/sub/resourceGroups/rg/providers/Microsoft.KeyVault/vaults/kv").unwrap()
    }

    #[tokio::test]
    async fn test_plan_requires_location() {
        let console = MockConsole::new();
        let mut provider = MockProvider::new();
        provider.expect_requires_subscription().return_const(false);
        provider.expect_plan().times(0);
        let manager = Manager::with_provider(context(&console, &[]), Box::new(provider));

        let err = manager.plan(&CancellationToken::new()).await.unwrap_err();

        assert!(err.is_configuration());
        assert!(err.to_string().contains("AZURE_LOCATION"));
    }

    #[tokio::test]
    async fn test_plan_requires_subscription_when_provider_does() {
        let console = MockConsole::new();
        let mut provider = MockProvider::new();
        provider.expect_requires_subscription().return_const(true);
        provider.expect_plan().times(0);
        let manager = Manager::with_provider(
            context(&console, &[("AZURE_LOCATION", "eastus2")]),
            Box::new(provider),
        );

        let err = manager.plan(&CancellationToken::new()).await.unwrap_err();
        assert!(err.to_string().contains("AZURE_SUBSCRIPTION_ID"));
    }

    #[tokio::test]
    async fn test_plan_rejects_unresolved_parameters() {
        let console = MockConsole::new();
        let mut provider = MockProvider::new();
        provider.expect_requires_subscription().return_const(true);
        provider
            .expect_plan()
            .times(1)
            .returning(|_| Ok(plan(json!("${AZURE_LOCATION}"))));
        let manager = Manager::with_provider(context(&console, &located()), Box::new(provider));

        let err = manager.plan(&CancellationToken::new()).await.unwrap_err();
        assert!(err.is_configuration());
    }

    #[tokio::test]
    async fn test_deploy_wraps_backend_errors_with_scope() {
        let console = MockConsole::new();
        let mut provider = MockProvider::new();
        provider.expect_deploy().times(1).returning(|_, _, _| {
            Err(ProvisioningError::Infra(InfraError::AzCli {
                command: "deployment sub create".into(),
                message: "throttled".into(),
            }))
        });
        let manager = Manager::with_provider(context(&console, &located()), Box::new(provider));

        let err = manager
            .deploy(&plan(json!("eastus2")), &scope(), &CancellationToken::new())
            .await
            .unwrap_err();

        match err {
            ProvisioningError::Context { operation, scope, .. } => {
                assert_eq!(operation, "deploy");
                assert!(scope.contains("subscription 'sub'"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_deploy_failure_keeps_partial_outputs() {
        let console = MockConsole::new();
        let mut provider = MockProvider::new();
        provider.expect_deploy().returning(|_, _, _| {
            Err(ProvisioningError::DeploymentFailed {
                message: "quota".into(),
                outputs: BTreeMap::from([("STORAGE".to_string(), OutputParameter::string("st1"))]),
            })
        });
        let manager = Manager::with_provider(context(&console, &located()), Box::new(provider));

        let err = manager
            .deploy(&plan(json!("eastus2")), &scope(), &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(err.partial_outputs().unwrap()["STORAGE"].value, json!("st1"));
    }

    #[tokio::test]
    async fn test_get_deployment_normalizes_not_found() {
        let console = MockConsole::new();
        let mut provider = MockProvider::new();
        provider
            .expect_get_deployment()
            .returning(|_, _| Err(ProvisioningError::Infra(InfraError::NotFound("dev".into()))));
        let manager = Manager::with_provider(context(&console, &located()), Box::new(provider));

        let err = manager
            .get_deployment(&scope(), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, ProvisioningError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_declined_destroy_never_reaches_provider() {
        let console = MockConsole::new();
        console
            .when_confirm(|o| o.message.contains(DESTROY_CONFIRMATION))
            .respond(false);
        let mut provider = MockProvider::new();
        provider.expect_destroy().times(0);
        let manager = Manager::with_provider(context(&console, &located()), Box::new(provider));

        let result = manager
            .destroy(
                &Deployment::default(),
                &DestroyOptions::new(false, false),
                &CancellationToken::new(),
            )
            .await;

        assert!(matches!(result, Err(ProvisioningError::DestroyAborted)));
        assert!(console.output_contains(DESTROY_CONFIRMATION));
    }

    #[tokio::test]
    async fn test_confirmed_destroy_calls_provider_once() {
        let console = MockConsole::new();
        console.when_confirm(|_| true).respond(true);
        let mut provider = MockProvider::new();
        provider
            .expect_destroy()
            .times(1)
            .returning(|_, _, _| Ok(DestroyResult::default()));
        provider.expect_purge().times(0);
        let manager = Manager::with_provider(context(&console, &located()), Box::new(provider));

        let result = manager
            .destroy(
                &Deployment::default(),
                &DestroyOptions::new(false, false),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(result, DestroyResult::default());
    }

    #[tokio::test]
    async fn test_forced_destroy_skips_confirmation() {
        let console = MockConsole::new();
        let mut provider = MockProvider::new();
        provider
            .expect_destroy()
            .times(1)
            .returning(|_, _, _| Ok(DestroyResult::default()));
        let manager = Manager::with_provider(context(&console, &located()), Box::new(provider));

        manager
            .destroy(
                &Deployment::default(),
                &DestroyOptions::new(true, false),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert!(console.output().is_empty());
    }

    #[tokio::test]
    async fn test_confirmation_error_aborts() {
        // No scripted answer: the console errors.
        let console = MockConsole::new();
        let mut provider = MockProvider::new();
        provider.expect_destroy().times(0);
        let manager = Manager::with_provider(context(&console, &located()), Box::new(provider));

        let result = manager
            .destroy(
                &Deployment::default(),
                &DestroyOptions::new(false, false),
                &CancellationToken::new(),
            )
            .await;

        assert!(result.is_err());
        assert!(console.output_contains(DESTROY_CONFIRMATION));
    }

    #[tokio::test]
    async fn test_purge_runs_after_destroy() {
        let console = MockConsole::new();
        let mut provider = MockProvider::new();
        provider
            .expect_destroy()
            .times(1)
            .returning(|_, _, _| Ok(DestroyResult::default().with_purge_targets(vec![vault()])));
        provider
            .expect_purge()
            .times(1)
            .withf(|targets, _| targets.len() == 1)
            .returning(|_, _| Ok(()));
        let manager = Manager::with_provider(context(&console, &located()), Box::new(provider));

        let result = manager
            .destroy(
                &Deployment::default(),
                &DestroyOptions::new(true, true),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(result.purge_targets.len(), 1);
    }

    #[tokio::test]
    async fn test_purge_failure_keeps_destroy_result() {
        let console = MockConsole::new();
        let mut provider = MockProvider::new();
        provider.expect_destroy().returning(|_, _, _| {
            let mut outputs = BTreeMap::new();
            outputs.insert("AZURE_KEY_VAULT_NAME".to_string(), OutputParameter::string("kv"));
            Ok(DestroyResult::from_outputs(outputs).with_purge_targets(vec![vault()]))
        });
        provider
            .expect_purge()
            .returning(|_, _| Err(ProvisioningError::configuration("vault is locked")));
        let manager = Manager::with_provider(context(&console, &located()), Box::new(provider));

        let err = manager
            .destroy(
                &Deployment::default(),
                &DestroyOptions::new(true, true),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        let result = err.destroy_result().unwrap();
        assert_eq!(result.invalidated_env_keys, vec!["AZURE_KEY_VAULT_NAME"]);
        assert!(err.to_string().contains("vault is locked"));
    }

    struct SlowProvider;

    #[async_trait]
    impl Provider for SlowProvider {
        async fn plan(&self, _cancel: &CancellationToken) -> ProvisioningResult<DeploymentPlan> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(plan(json!("eastus2")))
        }

        async fn get_deployment(&self, _scope: &Scope, _cancel: &CancellationToken) -> ProvisioningResult<Deployment> {
            Ok(Deployment::default())
        }

        async fn deploy(
            &self,
            plan: &DeploymentPlan,
            _scope: &Scope,
            _cancel: &CancellationToken,
        ) -> ProvisioningResult<DeployResult> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(DeployResult::new(plan.deployment.clone()))
        }

        async fn destroy(
            &self,
            _deployment: &Deployment,
            _options: &DestroyOptions,
            _cancel: &CancellationToken,
        ) -> ProvisioningResult<DestroyResult> {
            Ok(DestroyResult::default())
        }
    }

    #[tokio::test]
    async fn test_cancellation_aborts_promptly() {
        let console = MockConsole::new();
        let manager = Manager::with_provider(context(&console, &located()), Box::new(SlowProvider));
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let err = tokio::time::timeout(
            Duration::from_secs(5),
            manager.deploy(&plan(json!("eastus2")), &scope(), &cancel),
        )
        .await
        .unwrap()
        .unwrap_err();

        assert!(matches!(err, ProvisioningError::Cancelled { ref operation } if operation == "deploy"));
    }

    #[tokio::test]
    async fn test_unknown_provider() {
        let console = MockConsole::new();
        let mut ctx = context(&console, &located());
        ctx.options = Options::new("manager-test-unknown");

        let err = Manager::new(ctx).err().unwrap();
        assert!(err.is_configuration());
    }
}
