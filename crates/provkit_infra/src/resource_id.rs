//! ARM resource ids and the environment keys that store them.

use std::fmt;

use provkit_env::{env_key, keys, Environment};

use crate::error::{InfraError, InfraResult};
use crate::models::resource_types;

/// A parsed ARM resource id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceId {
    pub subscription_id: String,
    pub resource_group: Option<String>,
    /// Full type including namespace, e.g. `Microsoft.Sql/servers/databases`.
    pub resource_type: String,
    pub name: String,
    raw: String,
}

impl ResourceId {
    pub fn parse(id: &str) -> InfraResult<Self> {
        let invalid = |message: &str| InfraError::InvalidResourceId {
            id: id.to_string(),
            message: message.to_string(),
        };

        let trimmed = id.trim();
        if !trimmed.starts_with('/') {
            return Err(invalid("must start with '/'"));
        }

        let parts: Vec<&str> = trimmed.trim_matches('/').split('/').collect();
        if parts.len() < 2 || !parts[0].eq_ignore_ascii_case("subscriptions") || parts[1].is_empty() {
            return Err(invalid("missing subscription segment"));
        }
        let subscription_id = parts[1].to_string();
        let rest = &parts[2..];

        if rest.is_empty() {
            return Ok(Self {
                name: subscription_id.clone(),
                subscription_id,
                resource_group: None,
                resource_type: "Microsoft.Resources/subscriptions".to_string(),
                raw: trimmed.to_string(),
            });
        }

        let (resource_group, rest) = if rest[0].eq_ignore_ascii_case("resourceGroups") {
            if rest.len() < 2 || rest[1].is_empty() {
                return Err(invalid("missing resource group name"));
            }
            (Some(rest[1].to_string()), &rest[2..])
        } else {
            (None, rest)
        };

        if rest.is_empty() {
            return match resource_group {
                Some(group) => Ok(Self {
                    subscription_id,
                    name: group.clone(),
                    resource_group: Some(group),
                    resource_type: resource_types::RESOURCE_GROUP.to_string(),
                    raw: trimmed.to_string(),
                }),
                None => Err(invalid("missing provider segment")),
            };
        }

        if !rest[0].eq_ignore_ascii_case("providers") || rest.len() < 4 || (rest.len() - 2) % 2 != 0 {
            return Err(invalid("malformed provider segment"));
        }

        let namespace = rest[1];
        let pairs = &rest[2..];
        let types: Vec<&str> = pairs.iter().step_by(2).copied().collect();
        let name = pairs[pairs.len() - 1];
        if name.is_empty() || types.iter().any(|t| t.is_empty()) {
            return Err(invalid("empty type or name segment"));
        }

        Ok(Self {
            subscription_id,
            resource_group,
            resource_type: format!("{}/{}", namespace, types.join("/")),
            name: name.to_string(),
            raw: trimmed.to_string(),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Environment key holding the resource id for `name`.
pub fn resource_id_name(name: &str) -> String {
    format!("AZURE_RESOURCE_{}_ID", env_key(name))
}

/// Resolve the resource id for `name`.
///
/// A literal resource id is parsed as-is; anything else is looked up under
/// [`resource_id_name`] in the environment.
pub fn resource_id(name: &str, env: &Environment) -> InfraResult<ResourceId> {
    if let Ok(id) = ResourceId::parse(name) {
        return Ok(id);
    }

    let key = resource_id_name(name);
    let value = env
        .lookup(&key)
        .ok_or_else(|| InfraError::EnvValueMissing(key.clone()))?;
    if value.is_empty() {
        return Err(InfraError::EnvValueEmpty(key));
    }

    ResourceId::parse(value).map_err(|e| InfraError::InvalidResourceId {
        id: value.to_string(),
        message: format!("parsing {}: {}", key, e),
    })
}

/// Name of the canonical key vault used for secrets.
pub fn key_vault_name(env: &Environment) -> &str {
    env.get(keys::KEY_VAULT_NAME)
}
