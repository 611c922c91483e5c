//! Deployment and plan data model.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use provkit_env::Environment;
use provkit_infra::{Resource, ScopeKind, TypedValue};

use crate::error::{ProvisioningError, ProvisioningResult};
use crate::parameters::has_reference;

/// Where a parameter value was resolved from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ParameterSource {
    Environment { key: String },
    ParametersFile,
    /// Declared default of the definition.
    Default,
    Prompt,
    /// Read back from the backend's deployment record.
    Deployed,
}

/// Shown instead of the value of a secure parameter.
pub const MASKED_VALUE: &str = "******";

/// A resolved input parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputParameter {
    pub value: Value,
    pub source: ParameterSource,
    /// Declared as `securestring`/`secureobject` (or `sensitive`).
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub secure: bool,
}

impl InputParameter {
    pub fn new(value: impl Into<Value>, source: ParameterSource) -> Self {
        Self {
            value: value.into(),
            source,
            secure: false,
        }
    }

    pub fn secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    /// Value for display, masked when secure.
    pub fn display_value(&self) -> String {
        if self.secure {
            return MASKED_VALUE.to_string();
        }
        match &self.value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }

    pub fn from_env(key: &str, value: impl Into<Value>) -> Self {
        Self::new(
            value,
            ParameterSource::Environment {
                key: key.to_string(),
            },
        )
    }

    fn unresolved(&self) -> bool {
        match &self.value {
            Value::Null => true,
            Value::String(s) => has_reference(s),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParameterType {
    String,
    Bool,
    Int,
    Number,
    Object,
    Array,
}

impl ParameterType {
    /// Whether a backend type name denotes a secret (`securestring`, `secureobject`).
    pub fn is_secure_type(name: &str) -> bool {
        name.to_ascii_lowercase().starts_with("secure")
    }

    /// Map a backend type name (`string`, `securestring`, `int`, `bool`, ...).
    pub fn from_type_name(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "bool" | "boolean" => Self::Bool,
            "int" | "integer" => Self::Int,
            "number" => Self::Number,
            "object" | "secureobject" | "map" => Self::Object,
            "array" | "list" | "tuple" | "set" => Self::Array,
            _ => Self::String,
        }
    }

    pub fn of_value(value: &Value) -> Self {
        match value {
            Value::Bool(_) => Self::Bool,
            Value::Number(n) if n.is_i64() || n.is_u64() => Self::Int,
            Value::Number(_) => Self::Number,
            Value::Object(_) => Self::Object,
            Value::Array(_) => Self::Array,
            _ => Self::String,
        }
    }
}

/// A deployment output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputParameter {
    pub kind: ParameterType,
    pub value: Value,
}

impl OutputParameter {
    pub fn new(kind: ParameterType, value: impl Into<Value>) -> Self {
        Self {
            kind,
            value: value.into(),
        }
    }

    pub fn string(value: impl Into<String>) -> Self {
        Self::new(ParameterType::String, value.into())
    }

    /// Value as stored in an environment: strings verbatim, everything
    /// else as JSON.
    pub fn env_value(&self) -> String {
        match &self.value {
            Value::String(s) => s.clone(),
            Value::Null => String::new(),
            other => other.to_string(),
        }
    }
}

impl From<&TypedValue> for OutputParameter {
    fn from(typed: &TypedValue) -> Self {
        let kind = if typed.type_name.is_empty() {
            ParameterType::of_value(&typed.value)
        } else {
            ParameterType::from_type_name(&typed.type_name)
        };
        Self::new(kind, typed.value.clone())
    }
}

/// Parameters of a deployment and, once executed, its outputs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Deployment {
    pub parameters: BTreeMap<String, InputParameter>,
    pub outputs: BTreeMap<String, OutputParameter>,
}

/// Provider-specific material a plan carries to deploy.
#[derive(Debug, Clone, PartialEq)]
pub enum PlanArtifact {
    None,
    /// Compiled ARM template and the scope kind it targets.
    ArmTemplate { template: Value, target: ScopeKind },
    TerraformPlan { plan_file: PathBuf, var_file: PathBuf },
}

/// A computed, parameter-resolved deployment not yet applied.
#[derive(Debug, Clone, PartialEq)]
pub struct DeploymentPlan {
    pub deployment: Deployment,
    pub artifact: PlanArtifact,
}

impl DeploymentPlan {
    pub fn new(deployment: Deployment, artifact: PlanArtifact) -> Self {
        Self {
            deployment,
            artifact,
        }
    }

    /// Fail if any parameter is null or still holds a `${...}` reference.
    pub fn ensure_resolved(&self) -> ProvisioningResult<()> {
        let unresolved: Vec<&str> = self
            .deployment
            .parameters
            .iter()
            .filter(|(_, p)| p.unresolved())
            .map(|(name, _)| name.as_str())
            .collect();

        if unresolved.is_empty() {
            Ok(())
        } else {
            Err(ProvisioningError::configuration(format!(
                "unresolved parameters: {}",
                unresolved.join(", ")
            )))
        }
    }
}

/// Outcome of a successful deploy.
#[derive(Debug, Clone, PartialEq)]
pub struct DeployResult {
    pub deployment: Deployment,
}

impl DeployResult {
    pub fn new(deployment: Deployment) -> Self {
        Self { deployment }
    }

    /// Write outputs into the environment under their output names.
    pub fn apply_to(&self, env: &mut Environment) {
        for (name, output) in &self.deployment.outputs {
            env.set(name.clone(), output.env_value());
        }
        debug!("Applied {} output(s) to environment", self.deployment.outputs.len());
    }
}

/// Flags controlling destroy. Never persisted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DestroyOptions {
    force: bool,
    purge: bool,
}

impl DestroyOptions {
    pub fn new(force: bool, purge: bool) -> Self {
        Self { force, purge }
    }

    /// Skip confirmation.
    pub fn force(&self) -> bool {
        self.force
    }

    /// Permanently remove soft-deleted resources after teardown.
    pub fn purge(&self) -> bool {
        self.purge
    }
}

/// What a destroy removed, for downstream cleanup.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DestroyResult {
    /// Outputs of the deployment before it was destroyed.
    pub outputs: BTreeMap<String, OutputParameter>,
    /// Environment keys that no longer describe anything.
    pub invalidated_env_keys: Vec<String>,
    /// Soft-deleted resources left behind by the teardown.
    pub purge_targets: Vec<Resource>,
}

impl DestroyResult {
    /// Result whose invalidated keys are the output names.
    pub fn from_outputs(outputs: BTreeMap<String, OutputParameter>) -> Self {
        let invalidated_env_keys = outputs.keys().cloned().collect();
        Self {
            outputs,
            invalidated_env_keys,
            purge_targets: Vec::new(),
        }
    }

    pub fn with_purge_targets(mut self, targets: Vec<Resource>) -> Self {
        self.purge_targets = targets;
        self
    }

    /// Remove the invalidated keys from the environment.
    pub fn scrub(&self, env: &mut Environment) {
        for key in &self.invalidated_env_keys {
            env.unset(key);
        }
    }
}
