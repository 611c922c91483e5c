//! Process-wide provider registry.
//!
//! Providers are registered by name during startup, before any manager is
//! constructed. Registering a name again replaces the previous factory, so
//! tests can install a fresh provider without interfering with each other.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use parking_lot::RwLock;
use tracing::debug;

use crate::bicep::{BicepProvider, BICEP_PROVIDER};
use crate::error::{ProvisioningError, ProvisioningResult};
use crate::provider::{Provider, ProviderContext};
use crate::terraform::{TerraformProvider, TERRAFORM_PROVIDER};

/// Builds a provider for a context.
pub type ProviderFactory =
    Arc<dyn Fn(&ProviderContext) -> ProvisioningResult<Box<dyn Provider>> + Send + Sync>;

fn providers() -> &'static RwLock<HashMap<String, ProviderFactory>> {
    static PROVIDERS: OnceLock<RwLock<HashMap<String, ProviderFactory>>> = OnceLock::new();
    PROVIDERS.get_or_init(|| RwLock::new(HashMap::new()))
}

/// Register a provider factory under `name`, replacing any previous one.
pub fn register<F>(name: impl Into<String>, factory: F)
where
    F: Fn(&ProviderContext) -> ProvisioningResult<Box<dyn Provider>> + Send + Sync + 'static,
{
    let name = name.into();
    debug!("Registering provider: {}", name);
    providers().write().insert(name, Arc::new(factory));
}

pub fn unregister(name: &str) -> bool {
    debug!("Unregistering provider: {}", name);
    providers().write().remove(name).is_some()
}

/// Look up the factory for `name`.
pub fn resolve(name: &str) -> ProvisioningResult<ProviderFactory> {
    let registry = providers().read();
    registry.get(name).cloned().ok_or_else(|| {
        let mut known: Vec<&str> = registry.keys().map(String::as_str).collect();
        known.sort_unstable();
        ProvisioningError::configuration(format!(
            "unknown provider '{}' (registered: {})",
            name,
            if known.is_empty() {
                "none".to_string()
            } else {
                known.join(", ")
            }
        ))
    })
}

pub fn is_registered(name: &str) -> bool {
    providers().read().contains_key(name)
}

/// Registered provider names, sorted.
pub fn registered_names() -> Vec<String> {
    let mut names: Vec<String> = providers().read().keys().cloned().collect();
    names.sort();
    names
}

/// Register the built-in cloud providers.
pub fn register_default_providers() {
    register(BICEP_PROVIDER, |ctx: &ProviderContext| {
        Ok(Box::new(BicepProvider::new(ctx)) as Box<dyn Provider>)
    });
    register(TERRAFORM_PROVIDER, |ctx: &ProviderContext| {
        Ok(Box::new(TerraformProvider::new(ctx)) as Box<dyn Provider>)
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deployment::{
        DeployResult, Deployment, DeploymentPlan, DestroyOptions, DestroyResult, PlanArtifact,
    };
    use async_trait::async_trait;
    use provkit_infra::Scope;
    use tokio_util::sync::CancellationToken;

    struct NamedProvider;

    #[async_trait]
    impl Provider for NamedProvider {
        async fn plan(&self, _cancel: &CancellationToken) -> ProvisioningResult<DeploymentPlan> {
            Ok(DeploymentPlan::new(Deployment::default(), PlanArtifact::None))
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

    #[test]
    fn test_register_and_resolve() {
        register("registry-test-a", |_: &ProviderContext| {
            Ok(Box::new(NamedProvider) as Box<dyn Provider>)
        });

        assert!(is_registered("registry-test-a"));
        assert!(resolve("registry-test-a").is_ok());
        assert!(registered_names().contains(&"registry-test-a".to_string()));
    }

    #[test]
    fn test_unknown_provider_is_configuration_error() {
        let err = resolve("registry-test-missing").err().unwrap();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("registry-test-missing"));
    }

    #[test]
    fn test_register_overwrites() {
        register("registry-test-b", |_: &ProviderContext| {
            Err(ProvisioningError::configuration("first"))
        });
        register("registry-test-b", |_: &ProviderContext| {
            Ok(Box::new(NamedProvider) as Box<dyn Provider>)
        });

        assert_eq!(
            registered_names()
                .iter()
                .filter(|n| n.as_str() == "registry-test-b")
                .count(),
            1
        );
        assert!(unregister("registry-test-b"));
        assert!(!is_registered("registry-test-b"));
    }

    #[test]
    fn test_default_providers() {
        register_default_providers();
        assert!(is_registered(BICEP_PROVIDER));
        assert!(is_registered(TERRAFORM_PROVIDER));
    }
}
