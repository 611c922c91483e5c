//! # provkit_provisioning
//!
//! Provisioning orchestration: plan, inspect, deploy and tear down the
//! infrastructure of an environment through a pluggable [`Provider`].
//!
//! - [`Manager`]: validates inputs, confirms destruction and drives a provider
//! - [`registry`]: process-wide provider lookup by name
//! - [`BicepProvider`] / [`TerraformProvider`]: the built-in cloud backends
//! - [`TestProvider`]: an in-process backend with no cloud side effects
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use provkit_console::TerminalConsole;
//! use provkit_env::Environment;
//! use provkit_infra::InMemoryDeploymentService;
//! use provkit_provisioning::{register_test_provider, Manager, Options, ProviderContext};
//! use provkit_runner::ProcessRunner;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     register_test_provider();
//!     let env = Environment::ephemeral_with_values("dev", [("AZURE_LOCATION", "eastus2")]);
//!     let ctx = ProviderContext::new(
//!         env,
//!         ".",
//!         Options::new("test"),
//!         Arc::new(TerminalConsole::new(false)),
//!         Arc::new(ProcessRunner::new()),
//!         Arc::new(InMemoryDeploymentService::new()),
//!     );
//!     let manager = Manager::new(ctx)?;
//!     let plan = manager.plan(&CancellationToken::new()).await?;
//!     println!("{} parameters", plan.deployment.parameters.len());
//!     Ok(())
//! }
//! ```

pub mod bicep;
pub mod deployment;
pub mod error;
pub mod manager;
pub mod options;
pub mod parameters;
pub mod provider;
pub mod registry;
pub mod terraform;
pub mod testing;

pub use bicep::{BicepProvider, BICEP_PROVIDER};
pub use deployment::{
    DeployResult, Deployment, DeploymentPlan, DestroyOptions, DestroyResult, InputParameter,
    OutputParameter, ParameterSource, ParameterType, PlanArtifact, MASKED_VALUE,
};
pub use error::{ProvisioningError, ProvisioningResult};
pub use manager::{Manager, DESTROY_CONFIRMATION};
pub use options::{Options, ProjectConfig, PROJECT_FILE};
pub use provider::{Provider, ProviderContext};
pub use registry::{register_default_providers, ProviderFactory};
pub use terraform::{TerraformProvider, TERRAFORM_PROVIDER};
pub use testing::{register_test_provider, TestProvider, TEST_PROVIDER};
