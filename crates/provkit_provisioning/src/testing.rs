//! Deterministic in-memory provider.
//!
//! Registered as `"test"` by [`register_test_provider`]. It resolves the
//! well-known parameters from the environment, echoes them back as outputs
//! and remembers deployments per scope, so everything above the provider
//! can be exercised without a cloud.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use provkit_env::{keys, Environment};
use provkit_infra::Scope;

use crate::deployment::{
    DeployResult, Deployment, DeploymentPlan, DestroyOptions, DestroyResult, InputParameter,
    OutputParameter, PlanArtifact,
};
use crate::error::{ProvisioningError, ProvisioningResult};
use crate::provider::{Provider, ProviderContext};
use crate::registry;

pub const TEST_PROVIDER: &str = "test";

/// Register [`TestProvider`] under `"test"`, replacing any earlier one.
pub fn register_test_provider() {
    registry::register(TEST_PROVIDER, |ctx: &ProviderContext| {
        Ok(Box::new(TestProvider::new(ctx.env.clone())) as Box<dyn Provider>)
    });
}

pub struct TestProvider {
    env: Environment,
    deployments: Arc<RwLock<BTreeMap<String, Deployment>>>,
}

impl TestProvider {
    pub fn new(env: Environment) -> Self {
        Self {
            env,
            deployments: Arc::new(RwLock::new(BTreeMap::new())),
        }
    }

    fn outputs_for(parameters: &BTreeMap<String, InputParameter>) -> BTreeMap<String, OutputParameter> {
        let mut outputs = BTreeMap::new();
        if let Some(Value::String(location)) = parameters.get("location").map(|p| &p.value) {
            outputs.insert(keys::LOCATION.to_string(), OutputParameter::string(location.clone()));
        }
        if let Some(Value::String(name)) = parameters.get("environmentName").map(|p| &p.value) {
            outputs.insert(keys::ENV_NAME.to_string(), OutputParameter::string(name.clone()));
        }
        outputs
    }
}

#[async_trait]
impl Provider for TestProvider {
    fn requires_subscription(&self) -> bool {
        false
    }

    async fn plan(&self, _cancel: &CancellationToken) -> ProvisioningResult<DeploymentPlan> {
        let location = self.env.location().ok_or_else(|| {
            ProvisioningError::configuration("test provider needs AZURE_LOCATION")
        })?;

        let mut deployment = Deployment::default();
        deployment.parameters.insert(
            "location".to_string(),
            InputParameter::from_env(keys::LOCATION, location),
        );
        deployment.parameters.insert(
            "environmentName".to_string(),
            InputParameter::from_env(keys::ENV_NAME, self.env.name()),
        );

        Ok(DeploymentPlan::new(deployment, PlanArtifact::None))
    }

    async fn get_deployment(&self, scope: &Scope, _cancel: &CancellationToken) -> ProvisioningResult<Deployment> {
        self.deployments
            .read()
            .get(&scope.target().key())
            .cloned()
            .ok_or_else(|| ProvisioningError::NotFound {
                scope: scope.to_string(),
            })
    }

    async fn deploy(
        &self,
        plan: &DeploymentPlan,
        scope: &Scope,
        _cancel: &CancellationToken,
    ) -> ProvisioningResult<DeployResult> {
        let deployment = Deployment {
            parameters: plan.deployment.parameters.clone(),
            outputs: Self::outputs_for(&plan.deployment.parameters),
        };

        debug!("Test provider deployed {}", scope);
        self.deployments
            .write()
            .insert(scope.target().key(), deployment.clone());
        Ok(DeployResult::new(deployment))
    }

    async fn destroy(
        &self,
        deployment: &Deployment,
        _options: &DestroyOptions,
        _cancel: &CancellationToken,
    ) -> ProvisioningResult<DestroyResult> {
        // Only the destroyed record goes; identical records at other scopes
        // are removed one per call, in key order.
        let mut deployments = self.deployments.write();
        let key = deployments
            .iter()
            .find(|(_, recorded)| *recorded == deployment)
            .map(|(key, _)| key.clone());
        match key {
            Some(key) => {
                debug!("Test provider destroyed {}", key);
                deployments.remove(&key);
            }
            None => debug!("Test provider has no record of the destroyed deployment"),
        }
        Ok(DestroyResult::from_outputs(deployment.outputs.clone()))
    }
}
