//! Bicep provider.
//!
//! Compiles `<path>/<module>.bicep` with `az bicep build` (or reads a
//! pre-compiled `<module>.json`), resolves parameters from
//! `<module>.parameters.json` and the environment, and deploys the compiled
//! template through the deployment service at the scope the template's
//! `$schema` declares.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use provkit_console::{Console, ConsoleOptions};
use provkit_env::{keys, Environment};
use provkit_infra::{
    DeployRequest, DeploymentService, InfraError, ProvisioningState, Resource, ResourceManager, Scope,
    ScopeKind, TypedValue,
};
use provkit_runner::{CommandRunner, RunArgs};

use crate::deployment::{
    DeployResult, Deployment, DeploymentPlan, DestroyOptions, DestroyResult, InputParameter,
    OutputParameter, ParameterSource, ParameterType, PlanArtifact,
};
use crate::error::{ProvisioningError, ProvisioningResult};
use crate::parameters::substitute_json;
use crate::provider::{purge_soft_deleted, Provider, ProviderContext};

pub const BICEP_PROVIDER: &str = "bicep";

const AZ: &str = "az";
const BUILD_TIMEOUT_SECONDS: u64 = 5 * 60;

pub struct BicepProvider {
    env: Environment,
    infra_path: PathBuf,
    module: String,
    console: Arc<dyn Console>,
    runner: Arc<dyn CommandRunner>,
    deployments: Arc<dyn DeploymentService>,
    resources: ResourceManager,
    interactive: bool,
}

impl BicepProvider {
    pub fn new(ctx: &ProviderContext) -> Self {
        Self {
            env: ctx.env.clone(),
            infra_path: ctx.infra_path(),
            module: ctx.options.module.clone(),
            console: ctx.console.clone(),
            runner: ctx.runner.clone(),
            deployments: ctx.deployments.clone(),
            resources: ctx.resource_manager(),
            interactive: ctx.interactive,
        }
    }

    fn module_file(&self, suffix: &str) -> PathBuf {
        self.infra_path.join(format!("{}{}", self.module, suffix))
    }

    /// Compile the module to an ARM template.
    async fn compile(&self, cancel: &CancellationToken) -> ProvisioningResult<Value> {
        let source = self.module_file(".bicep");
        let compiled = self.module_file(".json");

        if source.is_file() {
            info!("Compiling {}", source.display());
            let args = RunArgs::new(AZ)
                .args(["bicep", "build", "--file"])
                .arg(source.to_string_lossy())
                .arg("--stdout")
                .cwd(&self.infra_path)
                .timeout(BUILD_TIMEOUT_SECONDS);
            let result = self.runner.run(&args, cancel).await?;
            if !result.success() {
                return Err(ProvisioningError::ToolFailed {
                    command: "az bicep build".to_string(),
                    message: result.stderr.trim().to_string(),
                });
            }
            Ok(serde_json::from_str(&result.stdout)?)
        } else if compiled.is_file() {
            debug!("Using pre-compiled template {}", compiled.display());
            let content = std::fs::read_to_string(&compiled)?;
            Ok(serde_json::from_str(&content)?)
        } else {
            Err(ProvisioningError::configuration(format!(
                "no {}.bicep or {}.json found in {}",
                self.module,
                self.module,
                self.infra_path.display()
            )))
        }
    }

    /// Values from the parameters file after `${VAR}` substitution.
    fn load_parameters_file(&self) -> ProvisioningResult<BTreeMap<String, Value>> {
        let file = self.module_file(".parameters.json");
        if !file.is_file() {
            return Ok(BTreeMap::new());
        }

        let raw = std::fs::read_to_string(&file)?;
        let substituted = substitute_json(&raw, &self.env);
        if !substituted.missing.is_empty() {
            debug!(
                "Unset variables in {}: {}",
                file.display(),
                substituted.missing.join(", ")
            );
        }

        let document: Value = serde_json::from_str(&substituted.text)?;
        Ok(document
            .get("parameters")
            .and_then(Value::as_object)
            .map(|params| {
                params
                    .iter()
                    .filter_map(|(name, p)| p.get("value").map(|v| (name.clone(), v.clone())))
                    .collect()
            })
            .unwrap_or_default())
    }

    fn well_known(&self, name: &str) -> Option<InputParameter> {
        if name.eq_ignore_ascii_case("location") {
            self.env
                .location()
                .map(|l| InputParameter::from_env(keys::LOCATION, l))
        } else if name.eq_ignore_ascii_case("environmentName") {
            Some(InputParameter::from_env(keys::ENV_NAME, self.env.name()))
        } else {
            None
        }
    }

    async fn resolve_parameters(
        &self,
        template: &Value,
        file_values: &BTreeMap<String, Value>,
    ) -> ProvisioningResult<BTreeMap<String, InputParameter>> {
        let Some(declared) = template.get("parameters").and_then(Value::as_object) else {
            return Ok(BTreeMap::new());
        };

        let mut resolved = BTreeMap::new();
        let mut missing = Vec::new();
        for (name, definition) in declared {
            let parameter = if let Some(value) = file_values.get(name).filter(|v| !is_blank(v)) {
                Some(InputParameter::new(value.clone(), ParameterSource::ParametersFile))
            } else if let Some(parameter) = self.well_known(name) {
                Some(parameter)
            } else if let Some(default) = definition.get("defaultValue") {
                Some(InputParameter::new(default.clone(), ParameterSource::Default))
            } else if self.interactive {
                Some(self.prompt_for(name, definition).await?)
            } else {
                None
            };

            match parameter {
                Some(parameter) => {
                    resolved.insert(name.clone(), parameter.secure(is_secure(definition)));
                }
                None => missing.push(name.clone()),
            }
        }

        if !missing.is_empty() {
            return Err(ProvisioningError::configuration(format!(
                "missing required parameters: {}; set them in {}.parameters.json or run interactively",
                missing.join(", "),
                self.module
            )));
        }
        Ok(resolved)
    }

    async fn prompt_for(&self, name: &str, definition: &Value) -> ProvisioningResult<InputParameter> {
        let type_name = definition.get("type").and_then(Value::as_str).unwrap_or("string");
        let mut question = ConsoleOptions::new(format!(
            "Enter a value for the '{}' infrastructure parameter:",
            name
        ))
        .secret(is_secure(definition));
        if let Some(description) = definition
            .pointer("/metadata/description")
            .and_then(Value::as_str)
        {
            question = question.help(description);
        }

        let answer = self.console.prompt(question).await?;
        let value = parse_answer(name, type_name, &answer)?;
        Ok(InputParameter::new(value, ParameterSource::Prompt))
    }

    /// Resource groups of this environment, falling back to the one named
    /// in the environment when none carry the tag.
    async fn resource_groups(&self, subscription_id: &str, cancel: &CancellationToken) -> ProvisioningResult<Vec<String>> {
        match self
            .resources
            .get_resource_groups_for_environment(subscription_id, self.env.name(), cancel)
            .await
        {
            Ok(groups) => Ok(groups.into_iter().map(|g| g.name).collect()),
            Err(InfraError::ResourceGroupsNotFound { .. }) => Ok(self
                .env
                .resource_group()
                .map(|g| vec![g.to_string()])
                .unwrap_or_default()),
            Err(e) => Err(e.into()),
        }
    }
}

fn is_secure(definition: &Value) -> bool {
    definition
        .get("type")
        .and_then(Value::as_str)
        .is_some_and(ParameterType::is_secure_type)
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

fn parse_answer(name: &str, type_name: &str, answer: &str) -> ProvisioningResult<Value> {
    let invalid = |expected: &str| {
        ProvisioningError::configuration(format!(
            "value '{}' for parameter '{}' is not a valid {}",
            answer, name, expected
        ))
    };
    let trimmed = answer.trim();

    match ParameterType::from_type_name(type_name) {
        ParameterType::String => Ok(Value::String(answer.to_string())),
        ParameterType::Int => trimmed
            .parse::<i64>()
            .map(Value::from)
            .map_err(|_| invalid("integer")),
        ParameterType::Number => trimmed
            .parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number)
            .ok_or_else(|| invalid("number")),
        ParameterType::Bool => match trimmed.to_ascii_lowercase().as_str() {
            "true" | "yes" | "y" => Ok(Value::Bool(true)),
            "false" | "no" | "n" => Ok(Value::Bool(false)),
            _ => Err(invalid("boolean")),
        },
        ParameterType::Object | ParameterType::Array => {
            serde_json::from_str(trimmed).map_err(|_| invalid("JSON value"))
        }
    }
}

/// Scope kind declared by a compiled template's `$schema`.
pub fn target_scope(template: &Value) -> ProvisioningResult<ScopeKind> {
    let schema = template
        .get("$schema")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_ascii_lowercase();

    if schema.contains("subscriptiondeploymenttemplate") {
        Ok(ScopeKind::Subscription)
    } else if schema.contains("deploymenttemplate") {
        Ok(ScopeKind::ResourceGroup)
    } else {
        Err(ProvisioningError::configuration(format!(
            "unsupported template schema '{}'",
            schema
        )))
    }
}

/// Convert backend outputs, restoring the casing the template declares.
fn outputs_from(
    declared: Option<&Map<String, Value>>,
    outputs: &BTreeMap<String, TypedValue>,
) -> BTreeMap<String, OutputParameter> {
    outputs
        .iter()
        .map(|(name, typed)| {
            let name = declared
                .and_then(|d| d.keys().find(|k| k.eq_ignore_ascii_case(name)))
                .unwrap_or(name);
            (name.clone(), OutputParameter::from(typed))
        })
        .collect()
}

#[async_trait]
impl Provider for BicepProvider {
    async fn plan(&self, cancel: &CancellationToken) -> ProvisioningResult<DeploymentPlan> {
        let template = self.compile(cancel).await?;
        let target = target_scope(&template)?;
        let file_values = self.load_parameters_file()?;
        let parameters = self.resolve_parameters(&template, &file_values).await?;

        let deployment = Deployment {
            parameters,
            outputs: BTreeMap::new(),
        };
        Ok(DeploymentPlan::new(
            deployment,
            PlanArtifact::ArmTemplate { template, target },
        ))
    }

    async fn get_deployment(&self, scope: &Scope, cancel: &CancellationToken) -> ProvisioningResult<Deployment> {
        let record = match scope.deployment(cancel).await {
            Ok(record) => record,
            Err(e) if e.is_not_found() => {
                return Err(ProvisioningError::NotFound {
                    scope: scope.to_string(),
                })
            }
            Err(e) => return Err(e.into()),
        };

        Ok(Deployment {
            parameters: record
                .parameters
                .iter()
                .map(|(name, typed)| {
                    (
                        name.clone(),
                        InputParameter::new(typed.value.clone(), ParameterSource::Deployed)
                            .secure(ParameterType::is_secure_type(&typed.type_name)),
                    )
                })
                .collect(),
            outputs: outputs_from(None, &record.outputs),
        })
    }

    async fn deploy(
        &self,
        plan: &DeploymentPlan,
        scope: &Scope,
        cancel: &CancellationToken,
    ) -> ProvisioningResult<DeployResult> {
        let PlanArtifact::ArmTemplate { template, target } = &plan.artifact else {
            return Err(ProvisioningError::configuration(
                "bicep provider needs a plan with a compiled template",
            ));
        };
        if *target != scope.kind() {
            return Err(ProvisioningError::configuration(format!(
                "template targets {} scope but the deployment scope is {}",
                target,
                scope.kind()
            )));
        }

        // Declared defaults are left for the control plane to apply.
        let request = DeployRequest {
            template: template.clone(),
            parameters: plan
                .deployment
                .parameters
                .iter()
                .filter(|(_, p)| p.source != ParameterSource::Default)
                .map(|(name, p)| (name.clone(), p.value.clone()))
                .collect(),
        };

        let record = scope.deploy(&request, cancel).await?;
        let outputs = outputs_from(
            template.get("outputs").and_then(Value::as_object),
            &record.outputs,
        );

        match record.provisioning_state {
            ProvisioningState::Succeeded => Ok(DeployResult::new(Deployment {
                parameters: plan.deployment.parameters.clone(),
                outputs,
            })),
            state => Err(ProvisioningError::DeploymentFailed {
                message: record
                    .error
                    .unwrap_or_else(|| format!("deployment ended in state {:?}", state)),
                outputs,
            }),
        }
    }

    async fn destroy(
        &self,
        deployment: &Deployment,
        options: &DestroyOptions,
        cancel: &CancellationToken,
    ) -> ProvisioningResult<DestroyResult> {
        let subscription_id = self
            .env
            .subscription_id()
            .ok_or_else(|| ProvisioningError::configuration("no subscription; set AZURE_SUBSCRIPTION_ID"))?
            .to_string();

        let groups = self.resource_groups(&subscription_id, cancel).await?;
        let mut result = DestroyResult::from_outputs(deployment.outputs.clone());
        if groups.is_empty() {
            warn!(
                "No resource groups found for environment '{}', nothing to delete",
                self.env.name()
            );
            return Ok(result);
        }

        if options.purge() {
            result.purge_targets = self
                .resources
                .soft_delete_resources(&subscription_id, &groups, cancel)
                .await?;
        }

        // Sequential; the first failure stops the teardown.
        let mut deleted = Vec::new();
        for group in &groups {
            match self
                .deployments
                .delete_resource_group(&subscription_id, group, cancel)
                .await
            {
                Ok(()) => {
                    info!("Deleted resource group {}", group);
                    deleted.push(group.clone());
                }
                Err(e) if e.is_not_found() => {
                    warn!("Resource group {} no longer exists, skipping", group);
                }
                Err(source) => {
                    return Err(ProvisioningError::ResourceGroupDelete {
                        group: group.clone(),
                        deleted,
                        source,
                    })
                }
            }
        }

        if let Some(group) = self.env.resource_group() {
            if groups.iter().any(|g| g.eq_ignore_ascii_case(group)) {
                result.invalidated_env_keys.push(keys::RESOURCE_GROUP.to_string());
            }
        }
        Ok(result)
    }

    async fn purge(&self, targets: &[Resource], cancel: &CancellationToken) -> ProvisioningResult<()> {
        purge_soft_deleted(self.deployments.as_ref(), targets, cancel).await
    }
}
