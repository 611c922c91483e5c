//! Control-plane data model.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::resource_id::ResourceId;

/// Tag identifying which environment a resource group belongs to.
pub const TAG_ENV_NAME: &str = "azd-env-name";

/// Well-known resource types.
pub mod resource_types {
    pub const RESOURCE_GROUP: &str = "Microsoft.Resources/resourceGroups";
    pub const KEY_VAULT: &str = "Microsoft.KeyVault/vaults";
    pub const API_MANAGEMENT: &str = "Microsoft.ApiManagement/service";
    pub const COGNITIVE_SERVICES: &str = "Microsoft.CognitiveServices/accounts";
    pub const APP_CONFIGURATION: &str = "Microsoft.AppConfiguration/configurationStores";
    pub const APP_INSIGHTS_COMPONENT: &str = "Microsoft.Insights/components";
    pub const PORTAL_DASHBOARD: &str = "Microsoft.Portal/dashboards";

    /// Types that are soft-deleted and must be purged to free their names.
    pub const SOFT_DELETE: &[&str] = &[KEY_VAULT, API_MANAGEMENT, COGNITIVE_SERVICES, APP_CONFIGURATION];

    pub fn is_soft_delete(resource_type: &str) -> bool {
        SOFT_DELETE.iter().any(|t| t.eq_ignore_ascii_case(resource_type))
    }
}

/// Where a deployment is addressed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TargetKind {
    Subscription { location: String },
    ResourceGroup { resource_group: String },
}

/// Fully-qualified address of a deployment record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeploymentTarget {
    pub subscription_id: String,
    pub deployment_name: String,
    pub kind: TargetKind,
}

impl DeploymentTarget {
    pub fn subscription(
        subscription_id: impl Into<String>,
        location: impl Into<String>,
        deployment_name: impl Into<String>,
    ) -> Self {
        Self {
            subscription_id: subscription_id.into(),
            deployment_name: deployment_name.into(),
            kind: TargetKind::Subscription {
                location: location.into(),
            },
        }
    }

    pub fn resource_group(
        subscription_id: impl Into<String>,
        resource_group: impl Into<String>,
        deployment_name: impl Into<String>,
    ) -> Self {
        Self {
            subscription_id: subscription_id.into(),
            deployment_name: deployment_name.into(),
            kind: TargetKind::ResourceGroup {
                resource_group: resource_group.into(),
            },
        }
    }

    /// Stable key identifying the deployment record.
    pub fn key(&self) -> String {
        match &self.kind {
            TargetKind::Subscription { .. } => format!(
                "/subscriptions/{}/deployments/{}",
                self.subscription_id, self.deployment_name
            ),
            TargetKind::ResourceGroup { resource_group } => format!(
                "/subscriptions/{}/resourceGroups/{}/deployments/{}",
                self.subscription_id,
                resource_group.to_lowercase(),
                self.deployment_name
            ),
        }
    }
}

impl fmt::Display for DeploymentTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            TargetKind::Subscription { .. } => write!(
                f,
                "deployment '{}' in subscription '{}'",
                self.deployment_name, self.subscription_id
            ),
            TargetKind::ResourceGroup { resource_group } => write!(
                f,
                "deployment '{}' in resource group '{}' (subscription '{}')",
                self.deployment_name, resource_group, self.subscription_id
            ),
        }
    }
}

/// Provisioning state reported by the control plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProvisioningState {
    Succeeded,
    Failed,
    Canceled,
    Running,
    Accepted,
    #[serde(other)]
    Unknown,
}

impl ProvisioningState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Canceled)
    }
}

/// A value with the control plane's type name attached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypedValue {
    #[serde(rename = "type", default)]
    pub type_name: String,
    #[serde(default)]
    pub value: serde_json::Value,
}

/// A deployment record as the control plane tracks it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArmDeployment {
    pub id: String,
    pub name: String,
    pub provisioning_state: ProvisioningState,
    pub parameters: BTreeMap<String, TypedValue>,
    pub outputs: BTreeMap<String, TypedValue>,
    pub timestamp: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

/// A request to create or update a deployment from a compiled template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeployRequest {
    pub template: serde_json::Value,
    pub parameters: BTreeMap<String, serde_json::Value>,
}

/// A single cloud resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub resource_type: String,
    #[serde(default)]
    pub location: Option<String>,
}

impl Resource {
    /// Build a resource from its id alone.
    pub fn from_id(id: &str) -> crate::error::InfraResult<Self> {
        let parsed = ResourceId::parse(id)?;
        Ok(Self {
            id: id.to_string(),
            name: parsed.name,
            resource_type: parsed.resource_type,
            location: None,
        })
    }

    pub fn subscription_id(&self) -> Option<String> {
        ResourceId::parse(&self.id).ok().map(|r| r.subscription_id)
    }

    pub fn resource_group(&self) -> Option<String> {
        ResourceId::parse(&self.id).ok().and_then(|r| r.resource_group)
    }

    pub fn is_type(&self, resource_type: &str) -> bool {
        self.resource_type.eq_ignore_ascii_case(resource_type)
    }
}

/// A resource group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceGroup {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub location: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub tags: BTreeMap<String, String>,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

impl ResourceGroup {
    pub fn has_tag(&self, key: &str, value: &str) -> bool {
        self.tags.get(key).map(|v| v == value).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_key_and_display() {
        let sub = DeploymentTarget::subscription("sub-1", "eastus2", "dev");
        let rg = DeploymentTarget::resource_group("sub-1", "RG-Dev", "dev");

        assert_eq!(sub.key(), "/subscriptions/sub-1/deployments/dev");
        assert_eq!(rg.key(), "/subscriptions/sub-1/resourceGroups/rg-dev/deployments/dev");
        assert!(rg.to_string().contains("resource group 'RG-Dev'"));
    }

    #[test]
    fn test_provisioning_state_deserializes_unknown() {
        let state: ProvisioningState = serde_json::from_str("\"Deleting\"").unwrap();
        assert_eq!(state, ProvisioningState::Unknown);

        let state: ProvisioningState = serde_json::from_str("\"Failed\"").unwrap();
        assert!(state.is_terminal());
    }

    #[test]
    fn test_soft_delete_types() {
        assert!(resource_types::is_soft_delete("microsoft.keyvault/vaults"));
        assert!(!resource_types::is_soft_delete(resource_types::APP_INSIGHTS_COMPONENT));
    }

    #[test]
    fn test_resource_group_null_tags() {
        let group: ResourceGroup =
            serde_json::from_str(r#"{"id": "/subscriptions/s/resourceGroups/rg", "name": "rg", "location": "eastus", "tags": null}"#)
                .unwrap();
        assert!(group.tags.is_empty());
        assert!(!group.has_tag(TAG_ENV_NAME, "dev"));
    }

    #[test]
    fn test_resource_from_id() {
        let resource = Resource::from_id(
            "/subscriptions/sub-1/resourceGroups/rg-dev/providers/Microsoft.KeyVault/vaults/kv-dev",
        )
        .unwrap();

        assert_eq!(resource.name, "kv-dev");
        assert!(resource.is_type(resource_types::KEY_VAULT));
        assert_eq!(resource.resource_group().as_deref(), Some("rg-dev"));
        assert_eq!(resource.subscription_id().as_deref(), Some("sub-1"));
    }
}
