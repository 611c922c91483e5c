//! Provider options and the project file they are read from.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ProvisioningError, ProvisioningResult};

/// Provider used when the project does not name one.
pub const DEFAULT_PROVIDER: &str = "bicep";
pub const DEFAULT_PATH: &str = "infra";
pub const DEFAULT_MODULE: &str = "main";

/// Project file name.
pub const PROJECT_FILE: &str = "azure.yaml";

/// Which provider to activate and how to find its definition.
///
/// Immutable once bound to a manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Options {
    #[serde(default)]
    pub provider: String,
    /// Directory holding the infrastructure definition, relative to the project.
    #[serde(default = "default_path")]
    pub path: PathBuf,
    /// Module (file stem) to provision.
    #[serde(default = "default_module")]
    pub module: String,
    /// Provider-specific settings.
    #[serde(flatten)]
    pub settings: BTreeMap<String, serde_json::Value>,
}

fn default_path() -> PathBuf {
    PathBuf::from(DEFAULT_PATH)
}

fn default_module() -> String {
    DEFAULT_MODULE.to_string()
}

impl Default for Options {
    fn default() -> Self {
        Self {
            provider: String::new(),
            path: default_path(),
            module: default_module(),
            settings: BTreeMap::new(),
        }
    }
}

impl Options {
    pub fn new(provider: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            ..Default::default()
        }
    }

    pub fn path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = path.into();
        self
    }

    pub fn module(mut self, module: impl Into<String>) -> Self {
        self.module = module.into();
        self
    }

    pub fn setting(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.settings.insert(key.into(), value);
        self
    }

    /// Registry key of the selected provider.
    pub fn provider_name(&self) -> &str {
        if self.provider.trim().is_empty() {
            DEFAULT_PROVIDER
        } else {
            self.provider.trim()
        }
    }

    pub fn get_setting(&self, key: &str) -> Option<&serde_json::Value> {
        self.settings.get(key)
    }
}

/// The parts of `azure.yaml` provisioning reads.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectConfig {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub infra: Options,
}

impl ProjectConfig {
    pub fn from_yaml(content: &str) -> ProvisioningResult<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Load `azure.yaml` from a project directory.
    pub fn load(project_dir: &Path) -> ProvisioningResult<Self> {
        let file = project_dir.join(PROJECT_FILE);
        if !file.exists() {
            return Err(ProvisioningError::configuration(format!(
                "no {} found in {}",
                PROJECT_FILE,
                project_dir.display()
            )));
        }
        let content = std::fs::read_to_string(&file)?;
        Self::from_yaml(&content)
    }
}
