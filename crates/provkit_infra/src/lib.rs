//! provkit Infra - deployment scopes and the cloud control-plane seam.
//!
//! This crate provides:
//! - [`Scope`]: where a deployment lives (subscription or resource group)
//! - [`DeploymentService`]: the operations provisioning needs from the cloud
//! - [`AzCliDeploymentService`]: that seam driven through the `az` CLI
//! - [`InMemoryDeploymentService`]: a deterministic fake for tests
//! - [`ResourceManager`]: resource discovery by environment tag

pub mod azcli;
pub mod error;
pub mod memory;
pub mod models;
pub mod resource_id;
pub mod resource_manager;
pub mod scope;
pub mod service;

pub use azcli::AzCliDeploymentService;
pub use error::{InfraError, InfraResult};
pub use memory::InMemoryDeploymentService;
pub use models::{
    resource_types, ArmDeployment, DeployRequest, DeploymentTarget, ProvisioningState, Resource,
    ResourceGroup, TargetKind, TypedValue, TAG_ENV_NAME,
};
pub use resource_id::{key_vault_name, resource_id, resource_id_name, ResourceId};
pub use resource_manager::ResourceManager;
pub use scope::{ResourceGroupScope, Scope, ScopeKind, SubscriptionScope};
pub use service::{DeploymentService, TenantResolver};
