//! Terraform provider.
//!
//! Drives the `terraform` CLI through a [`CommandRunner`]. Variables come
//! from `<path>/<module>.tfvars.json` after `${VAR}` substitution, written
//! next to the local state in `.azure/<env>/infra`. Only subscription
//! scope is supported.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use provkit_env::{keys, Environment};
use provkit_infra::{DeploymentService, InfraError, Resource, ResourceManager, Scope, ScopeKind};
use provkit_runner::{CommandRunner, RunArgs};

use crate::deployment::{
    DeployResult, Deployment, DeploymentPlan, DestroyOptions, DestroyResult, InputParameter,
    OutputParameter, ParameterSource, ParameterType, PlanArtifact,
};
use crate::error::{ProvisioningError, ProvisioningResult};
use crate::parameters::substitute_json;
use crate::provider::{purge_soft_deleted, Provider, ProviderContext};

pub const TERRAFORM_PROVIDER: &str = "terraform";

const TERRAFORM: &str = "terraform";
const PLAN_FILE: &str = "main.tfplan";
const STATE_FILE: &str = "terraform.tfstate";
/// Apply and destroy can take a long time.
const LONG_TIMEOUT_SECONDS: u64 = 60 * 60;
const SHORT_TIMEOUT_SECONDS: u64 = 10 * 60;

/// Result of a Terraform command.
#[derive(Debug)]
pub struct TerraformResult {
    pub success: bool,
    pub stdout: String,
    pub output: String,
    pub exit_code: i32,
}

/// Thin wrapper over the `terraform` CLI.
pub struct TerraformCli {
    runner: Arc<dyn CommandRunner>,
    env: BTreeMap<String, String>,
}

impl TerraformCli {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            env: BTreeMap::new(),
        }
    }

    /// Set an environment variable for every invocation.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Run terraform init.
    pub async fn init(&self, working_dir: &Path, cancel: &CancellationToken) -> ProvisioningResult<TerraformResult> {
        info!("Running terraform init in {:?}", working_dir);
        self.run_command(working_dir, &["init", "-input=false", "-no-color"], SHORT_TIMEOUT_SECONDS, cancel)
            .await
    }

    /// Run terraform plan, saving the plan to `plan_file`.
    pub async fn plan(
        &self,
        working_dir: &Path,
        var_file: &Path,
        plan_file: &Path,
        state_file: &Path,
        cancel: &CancellationToken,
    ) -> ProvisioningResult<TerraformResult> {
        info!("Running terraform plan in {:?}", working_dir);
        let var_file = format!("-var-file={}", var_file.display());
        let out = format!("-out={}", plan_file.display());
        let state = format!("-state={}", state_file.display());
        self.run_command(
            working_dir,
            &["plan", "-input=false", "-no-color", &var_file, &out, &state],
            SHORT_TIMEOUT_SECONDS,
            cancel,
        )
        .await
    }

    /// Apply a saved plan.
    pub async fn apply(
        &self,
        working_dir: &Path,
        plan_file: &Path,
        state_file: &Path,
        cancel: &CancellationToken,
    ) -> ProvisioningResult<TerraformResult> {
        info!("Running terraform apply in {:?}", working_dir);
        let state = format!("-state={}", state_file.display());
        let plan = plan_file.display().to_string();
        self.run_command(
            working_dir,
            &["apply", "-input=false", "-no-color", "-auto-approve", &state, &plan],
            LONG_TIMEOUT_SECONDS,
            cancel,
        )
        .await
    }

    /// Apply the configuration directly from a variable file, without a saved plan.
    pub async fn apply_vars(
        &self,
        working_dir: &Path,
        var_file: &Path,
        state_file: &Path,
        cancel: &CancellationToken,
    ) -> ProvisioningResult<TerraformResult> {
        info!("Running terraform apply in {:?}", working_dir);
        let var_file = format!("-var-file={}", var_file.display());
        let state = format!("-state={}", state_file.display());
        self.run_command(
            working_dir,
            &["apply", "-input=false", "-no-color", "-auto-approve", &var_file, &state],
            LONG_TIMEOUT_SECONDS,
            cancel,
        )
        .await
    }

    /// Outputs recorded in the state.
    pub async fn output(
        &self,
        working_dir: &Path,
        state_file: &Path,
        cancel: &CancellationToken,
    ) -> ProvisioningResult<BTreeMap<String, OutputParameter>> {
        let state = format!("-state={}", state_file.display());
        let result = self
            .run_command(working_dir, &["output", "-json", &state], SHORT_TIMEOUT_SECONDS, cancel)
            .await?;
        if !result.success {
            return Err(tool_failed("terraform output", &result));
        }

        let raw: BTreeMap<String, RawOutput> = if result.stdout.trim().is_empty() {
            BTreeMap::new()
        } else {
            serde_json::from_str(&result.stdout)?
        };
        Ok(raw.into_iter().map(|(name, o)| (name, o.into())).collect())
    }

    /// The state rendered as JSON.
    pub async fn show(
        &self,
        working_dir: &Path,
        state_file: &Path,
        cancel: &CancellationToken,
    ) -> ProvisioningResult<Value> {
        let state = state_file.display().to_string();
        let result = self
            .run_command(working_dir, &["show", "-json", &state], SHORT_TIMEOUT_SECONDS, cancel)
            .await?;
        if !result.success {
            return Err(tool_failed("terraform show", &result));
        }
        Ok(serde_json::from_str(&result.stdout)?)
    }

    /// Destroy everything in the state.
    pub async fn destroy(
        &self,
        working_dir: &Path,
        var_file: &Path,
        state_file: &Path,
        cancel: &CancellationToken,
    ) -> ProvisioningResult<TerraformResult> {
        info!("Running terraform destroy in {:?}", working_dir);
        let var_file = format!("-var-file={}", var_file.display());
        let state = format!("-state={}", state_file.display());
        self.run_command(
            working_dir,
            &["destroy", "-input=false", "-no-color", "-auto-approve", &var_file, &state],
            LONG_TIMEOUT_SECONDS,
            cancel,
        )
        .await
    }

    async fn run_command(
        &self,
        working_dir: &Path,
        args: &[&str],
        timeout_seconds: u64,
        cancel: &CancellationToken,
    ) -> ProvisioningResult<TerraformResult> {
        let mut run_args = RunArgs::new(TERRAFORM)
            .args(args.iter().copied())
            .cwd(working_dir)
            .timeout(timeout_seconds);
        for (key, value) in &self.env {
            run_args = run_args.env(key.clone(), value.clone());
        }

        debug!("Executing terraform {:?}", args);
        let result = self.runner.run(&run_args, cancel).await?;

        Ok(TerraformResult {
            success: result.success(),
            output: result.combined_output(),
            stdout: result.stdout,
            exit_code: result.exit_code,
        })
    }
}

/// Terraform refuses a saved plan once the state has moved past it.
fn is_stale_plan(result: &TerraformResult) -> bool {
    !result.success && result.output.contains("Saved plan is stale")
}

fn tool_failed(command: &str, result: &TerraformResult) -> ProvisioningError {
    ProvisioningError::ToolFailed {
        command: command.to_string(),
        message: result.output.trim().to_string(),
    }
}

#[derive(Debug, Deserialize)]
struct RawOutput {
    #[serde(default)]
    value: Value,
    #[serde(rename = "type", default)]
    type_hint: Value,
}

impl From<RawOutput> for OutputParameter {
    fn from(raw: RawOutput) -> Self {
        // `type` is either "string" or a constructor such as ["list", "string"].
        let kind = match &raw.type_hint {
            Value::String(name) => ParameterType::from_type_name(name),
            Value::Array(parts) => parts
                .first()
                .and_then(Value::as_str)
                .map(ParameterType::from_type_name)
                .unwrap_or_else(|| ParameterType::of_value(&raw.value)),
            _ => ParameterType::of_value(&raw.value),
        };
        OutputParameter::new(kind, raw.value)
    }
}

pub struct TerraformProvider {
    env: Environment,
    module_path: PathBuf,
    module: String,
    state_path: PathBuf,
    runner: Arc<dyn CommandRunner>,
    deployments: Arc<dyn DeploymentService>,
    resources: ResourceManager,
}

impl TerraformProvider {
    pub fn new(ctx: &ProviderContext) -> Self {
        Self {
            env: ctx.env.clone(),
            module_path: ctx.infra_path(),
            module: ctx.options.module.clone(),
            state_path: ctx.state_path(),
            runner: ctx.runner.clone(),
            deployments: ctx.deployments.clone(),
            resources: ctx.resource_manager(),
        }
    }

    fn cli(&self, subscription_id: &str) -> TerraformCli {
        TerraformCli::new(self.runner.clone()).with_env("ARM_SUBSCRIPTION_ID", subscription_id)
    }

    fn subscription_id(&self) -> ProvisioningResult<&str> {
        self.env
            .subscription_id()
            .ok_or_else(|| ProvisioningError::configuration("no subscription; set AZURE_SUBSCRIPTION_ID"))
    }

    fn var_file(&self) -> PathBuf {
        self.state_path.join(format!("{}.tfvars.json", self.module))
    }

    fn state_file(&self) -> PathBuf {
        self.state_path.join(STATE_FILE)
    }

    /// Write the substituted variable file into the state directory.
    fn write_var_file(&self) -> ProvisioningResult<BTreeMap<String, Value>> {
        let source = self.module_path.join(format!("{}.tfvars.json", self.module));
        let variables: BTreeMap<String, Value> = if source.is_file() {
            let raw = std::fs::read_to_string(&source)?;
            let substituted = substitute_json(&raw, &self.env);
            if !substituted.missing.is_empty() {
                debug!(
                    "Unset variables in {}: {}",
                    source.display(),
                    substituted.missing.join(", ")
                );
            }
            serde_json::from_str(&substituted.text)?
        } else {
            BTreeMap::new()
        };

        std::fs::create_dir_all(&self.state_path)?;
        std::fs::write(self.var_file(), serde_json::to_vec_pretty(&variables)?)?;
        Ok(variables)
    }

    fn read_var_file(&self) -> ProvisioningResult<BTreeMap<String, Value>> {
        let file = self.var_file();
        if !file.is_file() {
            return Ok(BTreeMap::new());
        }
        Ok(serde_json::from_str(&std::fs::read_to_string(file)?)?)
    }
}

#[async_trait]
impl Provider for TerraformProvider {
    async fn plan(&self, cancel: &CancellationToken) -> ProvisioningResult<DeploymentPlan> {
        if !self.module_path.is_dir() {
            return Err(ProvisioningError::configuration(format!(
                "terraform module directory {} does not exist",
                self.module_path.display()
            )));
        }
        let cli = self.cli(self.subscription_id()?);

        let variables = self.write_var_file()?;
        let init = cli.init(&self.module_path, cancel).await?;
        if !init.success {
            return Err(tool_failed("terraform init", &init));
        }

        let plan_file = self.state_path.join(PLAN_FILE);
        let planned = cli
            .plan(
                &self.module_path,
                &self.var_file(),
                &plan_file,
                &self.state_file(),
                cancel,
            )
            .await?;
        if !planned.success {
            return Err(tool_failed("terraform plan", &planned));
        }

        let parameters = variables
            .into_iter()
            .map(|(name, value)| (name, InputParameter::new(value, ParameterSource::ParametersFile)))
            .collect();
        Ok(DeploymentPlan::new(
            Deployment {
                parameters,
                outputs: BTreeMap::new(),
            },
            PlanArtifact::TerraformPlan {
                plan_file,
                var_file: self.var_file(),
            },
        ))
    }

    async fn get_deployment(&self, scope: &Scope, cancel: &CancellationToken) -> ProvisioningResult<Deployment> {
        if !self.state_file().is_file() {
            return Err(ProvisioningError::NotFound {
                scope: scope.to_string(),
            });
        }

        let state = self
            .cli(scope.subscription_id())
            .show(&self.module_path, &self.state_file(), cancel)
            .await?;
        let outputs: BTreeMap<String, OutputParameter> = state
            .pointer("/values/outputs")
            .and_then(Value::as_object)
            .map(|outputs| {
                outputs
                    .iter()
                    .map(|(name, o)| {
                        let value = o.get("value").cloned().unwrap_or(Value::Null);
                        let kind = ParameterType::of_value(&value);
                        (name.clone(), OutputParameter::new(kind, value))
                    })
                    .collect()
            })
            .unwrap_or_default();

        let parameters = self
            .read_var_file()?
            .into_iter()
            .map(|(name, value)| (name, InputParameter::new(value, ParameterSource::Deployed)))
            .collect();
        Ok(Deployment { parameters, outputs })
    }

    async fn deploy(
        &self,
        plan: &DeploymentPlan,
        scope: &Scope,
        cancel: &CancellationToken,
    ) -> ProvisioningResult<DeployResult> {
        if scope.kind() != ScopeKind::Subscription {
            return Err(ProvisioningError::configuration(format!(
                "terraform provider supports subscription scope only, got {}",
                scope.kind()
            )));
        }
        let PlanArtifact::TerraformPlan { plan_file, var_file } = &plan.artifact else {
            return Err(ProvisioningError::configuration(
                "terraform provider needs a plan with a saved terraform plan",
            ));
        };

        let cli = self.cli(scope.subscription_id());
        let state_file = self.state_file();
        // A saved plan applies once; later deploys of the same plan go
        // through the variable file.
        let applied = if plan_file.is_file() {
            let applied = cli.apply(&self.module_path, plan_file, &state_file, cancel).await?;
            if is_stale_plan(&applied) {
                warn!(
                    "Saved plan {} is stale, applying {} instead",
                    plan_file.display(),
                    var_file.display()
                );
                cli.apply_vars(&self.module_path, var_file, &state_file, cancel).await?
            } else {
                applied
            }
        } else {
            debug!("No saved plan at {}, applying variables", plan_file.display());
            cli.apply_vars(&self.module_path, var_file, &state_file, cancel).await?
        };

        if !applied.success {
            // Keep whatever made it into the state.
            let outputs = match cli.output(&self.module_path, &state_file, cancel).await {
                Ok(outputs) => outputs,
                Err(e) => {
                    warn!("Could not read terraform outputs after failed apply: {}", e);
                    BTreeMap::new()
                }
            };
            return Err(ProvisioningError::DeploymentFailed {
                message: applied.output.trim().to_string(),
                outputs,
            });
        }

        let outputs = cli.output(&self.module_path, &state_file, cancel).await?;
        Ok(DeployResult::new(Deployment {
            parameters: plan.deployment.parameters.clone(),
            outputs,
        }))
    }

    async fn destroy(
        &self,
        deployment: &Deployment,
        options: &DestroyOptions,
        cancel: &CancellationToken,
    ) -> ProvisioningResult<DestroyResult> {
        let subscription_id = self.subscription_id()?;
        let mut result = DestroyResult::from_outputs(deployment.outputs.clone());
        if !self.state_file().is_file() {
            warn!(
                "No terraform state for environment '{}', nothing to destroy",
                self.env.name()
            );
            return Ok(result);
        }

        if options.purge() {
            result.purge_targets = match self
                .resources
                .get_resource_groups_for_environment(subscription_id, self.env.name(), cancel)
                .await
            {
                Ok(groups) => {
                    let names: Vec<String> = groups.into_iter().map(|g| g.name).collect();
                    self.resources
                        .soft_delete_resources(subscription_id, &names, cancel)
                        .await?
                }
                Err(InfraError::ResourceGroupsNotFound { .. }) => Vec::new(),
                Err(e) => return Err(e.into()),
            };
        }

        if !self.var_file().is_file() {
            self.write_var_file()?;
        }
        let destroyed = self
            .cli(subscription_id)
            .destroy(&self.module_path, &self.var_file(), &self.state_file(), cancel)
            .await?;
        if !destroyed.success {
            return Err(tool_failed("terraform destroy", &destroyed));
        }

        if self.env.resource_group().is_some() {
            result.invalidated_env_keys.push(keys::RESOURCE_GROUP.to_string());
        }
        Ok(result)
    }

    async fn purge(&self, targets: &[Resource], cancel: &CancellationToken) -> ProvisioningResult<()> {
        purge_soft_deleted(self.deployments.as_ref(), targets, cancel).await
    }
}
