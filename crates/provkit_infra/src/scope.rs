//! Deployment scopes.
//!
//! A [`Scope`] says where a deployment lives: at subscription level (with a
//! location for the deployment record) or inside a resource group. Both
//! variants expose the same operations; providers that only support one
//! kind check [`Scope::kind`] and refuse the other.

use std::fmt;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::InfraResult;
use crate::models::{ArmDeployment, DeployRequest, DeploymentTarget, Resource};
use crate::service::DeploymentService;

/// Discriminant of a [`Scope`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScopeKind {
    Subscription,
    ResourceGroup,
}

impl fmt::Display for ScopeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Subscription => write!(f, "subscription"),
            Self::ResourceGroup => write!(f, "resource group"),
        }
    }
}

/// Subscription-level deployment address.
#[derive(Clone)]
pub struct SubscriptionScope {
    service: Arc<dyn DeploymentService>,
    pub location: String,
    pub subscription_id: String,
    pub deployment_name: String,
}

/// Resource-group-level deployment address.
#[derive(Clone)]
pub struct ResourceGroupScope {
    service: Arc<dyn DeploymentService>,
    pub subscription_id: String,
    pub resource_group: String,
    pub deployment_name: String,
}

/// Where a deployment lives, and the handle to query it there.
#[derive(Clone)]
pub enum Scope {
    Subscription(SubscriptionScope),
    ResourceGroup(ResourceGroupScope),
}

impl Scope {
    pub fn subscription(
        service: Arc<dyn DeploymentService>,
        location: impl Into<String>,
        subscription_id: impl Into<String>,
        deployment_name: impl Into<String>,
    ) -> Self {
        Self::Subscription(SubscriptionScope {
            service,
            location: location.into(),
            subscription_id: subscription_id.into(),
            deployment_name: deployment_name.into(),
        })
    }

    pub fn resource_group(
        service: Arc<dyn DeploymentService>,
        subscription_id: impl Into<String>,
        resource_group: impl Into<String>,
        deployment_name: impl Into<String>,
    ) -> Self {
        Self::ResourceGroup(ResourceGroupScope {
            service,
            subscription_id: subscription_id.into(),
            resource_group: resource_group.into(),
            deployment_name: deployment_name.into(),
        })
    }

    pub fn kind(&self) -> ScopeKind {
        match self {
            Self::Subscription(_) => ScopeKind::Subscription,
            Self::ResourceGroup(_) => ScopeKind::ResourceGroup,
        }
    }

    pub fn subscription_id(&self) -> &str {
        match self {
            Self::Subscription(s) => &s.subscription_id,
            Self::ResourceGroup(s) => &s.subscription_id,
        }
    }

    pub fn deployment_name(&self) -> &str {
        match self {
            Self::Subscription(s) => &s.deployment_name,
            Self::ResourceGroup(s) => &s.deployment_name,
        }
    }

    /// Resource group name, for resource-group scopes.
    pub fn resource_group_name(&self) -> Option<&str> {
        match self {
            Self::Subscription(_) => None,
            Self::ResourceGroup(s) => Some(&s.resource_group),
        }
    }

    pub fn target(&self) -> DeploymentTarget {
        match self {
            Self::Subscription(s) => {
                DeploymentTarget::subscription(&s.subscription_id, &s.location, &s.deployment_name)
            }
            Self::ResourceGroup(s) => {
                DeploymentTarget::resource_group(&s.subscription_id, &s.resource_group, &s.deployment_name)
            }
        }
    }

    fn service(&self) -> &Arc<dyn DeploymentService> {
        match self {
            Self::Subscription(s) => &s.service,
            Self::ResourceGroup(s) => &s.service,
        }
    }

    /// The most recent deployment at this scope.
    pub async fn deployment(&self, cancel: &CancellationToken) -> InfraResult<ArmDeployment> {
        debug!("Fetching {}", self);
        self.service().get_deployment(&self.target(), cancel).await
    }

    /// Resources the deployment at this scope created.
    pub async fn resources(&self, cancel: &CancellationToken) -> InfraResult<Vec<Resource>> {
        self.service()
            .list_deployment_resources(&self.target(), cancel)
            .await
    }

    /// Create or update the deployment at this scope.
    pub async fn deploy(
        &self,
        request: &DeployRequest,
        cancel: &CancellationToken,
    ) -> InfraResult<ArmDeployment> {
        debug!("Deploying {}", self);
        self.service().deploy(&self.target(), request, cancel).await
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.target())
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("kind", &self.kind())
            .field("target", &self.target())
            .finish()
    }
}
