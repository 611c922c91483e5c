//! Environment model and well-known keys.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Well-known environment keys read and written by provisioning.
pub mod keys {
    pub const ENV_NAME: &str = "AZURE_ENV_NAME";
    pub const SUBSCRIPTION_ID: &str = "AZURE_SUBSCRIPTION_ID";
    pub const LOCATION: &str = "AZURE_LOCATION";
    pub const RESOURCE_GROUP: &str = "AZURE_RESOURCE_GROUP";
    pub const TENANT_ID: &str = "AZURE_TENANT_ID";
    pub const KEY_VAULT_NAME: &str = "AZURE_KEY_VAULT_NAME";
}

/// A named key/value context identifying one deployment target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Environment {
    name: String,
    values: BTreeMap<String, String>,
}

impl Environment {
    /// Create an environment that is not backed by any store.
    pub fn ephemeral(name: impl Into<String>) -> Self {
        Self::ephemeral_with_values(name, std::iter::empty::<(String, String)>())
    }

    /// Create an environment seeded with values.
    ///
    /// `AZURE_ENV_NAME` is always set to `name`, overriding any seeded value.
    pub fn ephemeral_with_values<K, V>(
        name: impl Into<String>,
        values: impl IntoIterator<Item = (K, V)>,
    ) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        let name = name.into();
        let mut values: BTreeMap<String, String> = values
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        values.insert(keys::ENV_NAME.to_string(), name.clone());

        Self { name, values }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get a value, or the empty string when unset.
    pub fn get(&self, key: &str) -> &str {
        self.lookup(key).unwrap_or("")
    }

    /// Get a value, distinguishing unset from empty.
    pub fn lookup(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(|v| v.as_str())
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn unset(&mut self, key: &str) -> Option<String> {
        self.values.remove(key)
    }

    pub fn values(&self) -> &BTreeMap<String, String> {
        &self.values
    }

    /// Subscription id, if set and non-empty.
    pub fn subscription_id(&self) -> Option<&str> {
        self.non_empty(keys::SUBSCRIPTION_ID)
    }

    /// Location, if set and non-empty.
    pub fn location(&self) -> Option<&str> {
        self.non_empty(keys::LOCATION)
    }

    /// Resource group name, if set and non-empty.
    pub fn resource_group(&self) -> Option<&str> {
        self.non_empty(keys::RESOURCE_GROUP)
    }

    pub fn set_subscription_id(&mut self, subscription_id: impl Into<String>) {
        self.set(keys::SUBSCRIPTION_ID, subscription_id);
    }

    pub fn set_location(&mut self, location: impl Into<String>) {
        self.set(keys::LOCATION, location);
    }

    pub fn set_resource_group(&mut self, resource_group: impl Into<String>) {
        self.set(keys::RESOURCE_GROUP, resource_group);
    }

    fn non_empty(&self, key: &str) -> Option<&str> {
        self.lookup(key).filter(|v| !v.is_empty())
    }
}

/// Convert an arbitrary name into an environment key.
///
/// ASCII alphanumerics are upper-cased; every other character becomes `_`.
pub fn env_key(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}
