//! Control plane driven through the Azure CLI.
//!
//! Authentication, retries and throttling are left to `az` itself.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use provkit_runner::{CommandRunner, RunArgs, RunResult};

use crate::error::{InfraError, InfraResult};
use crate::models::{
    resource_types, ArmDeployment, DeployRequest, DeploymentTarget, ProvisioningState, Resource,
    ResourceGroup, TargetKind, TypedValue,
};
use crate::service::{DeploymentService, TenantResolver};

const AZ: &str = "az";
/// Deployments can take a long time; `az` polls until completion.
const DEPLOY_TIMEOUT_SECONDS: u64 = 60 * 60;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawDeployment {
    #[serde(default)]
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    properties: RawProperties,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawProperties {
    provisioning_state: Option<ProvisioningState>,
    #[serde(default)]
    parameters: Option<BTreeMap<String, TypedValue>>,
    #[serde(default)]
    outputs: Option<BTreeMap<String, TypedValue>>,
    timestamp: Option<DateTime<Utc>>,
    error: Option<serde_json::Value>,
    #[serde(default)]
    output_resources: Option<Vec<RawResourceRef>>,
}

#[derive(Debug, Deserialize)]
struct RawResourceRef {
    id: String,
}

impl From<RawDeployment> for ArmDeployment {
    fn from(raw: RawDeployment) -> Self {
        let props = raw.properties;
        Self {
            id: raw.id,
            name: raw.name,
            provisioning_state: props.provisioning_state.unwrap_or(ProvisioningState::Unknown),
            parameters: props.parameters.unwrap_or_default(),
            outputs: props.outputs.unwrap_or_default(),
            timestamp: props.timestamp,
            error: props.error.map(|e| {
                e.get("message")
                    .and_then(|m| m.as_str())
                    .map(str::to_string)
                    .unwrap_or_else(|| e.to_string())
            }),
        }
    }
}

/// [`DeploymentService`] implemented by invoking `az`.
pub struct AzCliDeploymentService {
    runner: Arc<dyn CommandRunner>,
}

impl AzCliDeploymentService {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    fn deployment_args(verb: &str, target: &DeploymentTarget) -> RunArgs {
        let args = RunArgs::new(AZ);
        let args = match &target.kind {
            TargetKind::Subscription { .. } => args.args(["deployment", "sub", verb]),
            TargetKind::ResourceGroup { resource_group } => args
                .args(["deployment", "group", verb])
                .args(["--resource-group", resource_group.as_str()]),
        };
        args.args([
            "--name",
            target.deployment_name.as_str(),
            "--subscription",
            target.subscription_id.as_str(),
            "--output",
            "json",
        ])
    }

    async fn run(&self, args: RunArgs, cancel: &CancellationToken) -> InfraResult<RunResult> {
        self.run_classified(args, &[], cancel).await
    }

    /// Runs `az`, reporting [`InfraError::NotFound`] only when the top-level
    /// error code is one of `not_found_codes`.
    async fn run_classified(
        &self,
        args: RunArgs,
        not_found_codes: &[&str],
        cancel: &CancellationToken,
    ) -> InfraResult<RunResult> {
        let result = self.runner.run(&args, cancel).await?;
        if result.success() {
            return Ok(result);
        }

        let message = result.stderr.trim().to_string();
        let command = args.args.iter().take(3).cloned().collect::<Vec<_>>().join(" ");
        if error_code(&message).is_some_and(|code| not_found_codes.contains(&code)) {
            debug!("az {} reported not found: {}", command, message);
            return Err(InfraError::NotFound(message));
        }
        Err(InfraError::AzCli { command, message })
    }

    async fn run_json<T: DeserializeOwned>(&self, args: RunArgs, cancel: &CancellationToken) -> InfraResult<T> {
        let result = self.run(args, cancel).await?;
        Ok(serde_json::from_str(&result.stdout)?)
    }

    async fn show(&self, target: &DeploymentTarget, cancel: &CancellationToken) -> InfraResult<RawDeployment> {
        let args = Self::deployment_args("show", target);
        let result = self.run_classified(args, DEPLOYMENT_NOT_FOUND, cancel).await?;
        Ok(serde_json::from_str(&result.stdout)?)
    }
}

const DEPLOYMENT_NOT_FOUND: &[&str] = &["DeploymentNotFound", "ResourceGroupNotFound"];
const GROUP_NOT_FOUND: &[&str] = &["ResourceGroupNotFound"];

/// The top-level error code of an `az` failure, from either
/// `ERROR: (Code) message` or a `Code: Code` line.
fn error_code(stderr: &str) -> Option<&str> {
    stderr.lines().map(str::trim).find_map(|line| {
        if let Some(rest) = line.strip_prefix("ERROR: (") {
            rest.split_once(')').map(|(code, _)| code)
        } else {
            line.strip_prefix("Code: ").map(str::trim)
        }
    })
}

#[async_trait]
impl DeploymentService for AzCliDeploymentService {
    async fn get_deployment(
        &self,
        target: &DeploymentTarget,
        cancel: &CancellationToken,
    ) -> InfraResult<ArmDeployment> {
        self.show(target, cancel).await.map(ArmDeployment::from)
    }

    async fn deploy(
        &self,
        target: &DeploymentTarget,
        request: &DeployRequest,
        cancel: &CancellationToken,
    ) -> InfraResult<ArmDeployment> {
        let dir = tempfile::tempdir()?;
        let template_file = dir.path().join("template.json");
        let parameters_file = dir.path().join("parameters.json");

        let parameters: BTreeMap<&str, serde_json::Value> = request
            .parameters
            .iter()
            .map(|(k, v)| (k.as_str(), serde_json::json!({ "value": v })))
            .collect();
        let parameters_doc = serde_json::json!({
            "$schema": "https://schema.management.azure.com/schemas/2019-04-01/deploymentParameters.json#",
            "contentVersion": "1.0.0.0",
            "parameters": parameters,
        });

        std::fs::write(&template_file, serde_json::to_vec(&request.template)?)?;
        std::fs::write(&parameters_file, serde_json::to_vec(&parameters_doc)?)?;

        let mut args = Self::deployment_args("create", target)
            .arg("--template-file")
            .arg(template_file.to_string_lossy())
            .arg("--parameters")
            .arg(format!("@{}", parameters_file.to_string_lossy()))
            .timeout(DEPLOY_TIMEOUT_SECONDS);
        if let TargetKind::Subscription { location } = &target.kind {
            args = args.args(["--location", location.as_str()]);
        }

        info!("Deploying {}", target);
        match self.run_json::<RawDeployment>(args, cancel).await {
            Ok(raw) => Ok(raw.into()),
            Err(InfraError::AzCli { command, message }) => {
                // The record may still exist with partial outputs.
                warn!("Deployment of {} failed: {}", target, message);
                match self.show(target, cancel).await {
                    Ok(raw) => {
                        let mut deployment = ArmDeployment::from(raw);
                        if deployment.provisioning_state == ProvisioningState::Succeeded {
                            return Err(InfraError::AzCli { command, message });
                        }
                        deployment.provisioning_state = ProvisioningState::Failed;
                        deployment.error.get_or_insert(message);
                        Ok(deployment)
                    }
                    Err(_) => Err(InfraError::AzCli { command, message }),
                }
            }
            Err(e) => Err(e),
        }
    }

    async fn list_deployment_resources(
        &self,
        target: &DeploymentTarget,
        cancel: &CancellationToken,
    ) -> InfraResult<Vec<Resource>> {
        let raw = self.show(target, cancel).await?;
        raw.properties
            .output_resources
            .unwrap_or_default()
            .iter()
            .map(|r| Resource::from_id(&r.id))
            .collect()
    }

    async fn list_resource_groups(
        &self,
        subscription_id: &str,
        tag: Option<(&str, &str)>,
        cancel: &CancellationToken,
    ) -> InfraResult<Vec<ResourceGroup>> {
        let mut args = RunArgs::new(AZ).args(["group", "list", "--subscription", subscription_id, "--output", "json"]);
        if let Some((key, value)) = tag {
            args = args.arg("--tag").arg(format!("{}={}", key, value));
        }
        let groups: Vec<ResourceGroup> = self.run_json(args, cancel).await?;
        Ok(groups)
    }

    async fn list_resource_group_resources(
        &self,
        subscription_id: &str,
        resource_group: &str,
        cancel: &CancellationToken,
    ) -> InfraResult<Vec<Resource>> {
        let args = RunArgs::new(AZ).args([
            "resource",
            "list",
            "--resource-group",
            resource_group,
            "--subscription",
            subscription_id,
            "--output",
            "json",
        ]);
        let result = self.run_classified(args, GROUP_NOT_FOUND, cancel).await?;
        Ok(serde_json::from_str(&result.stdout)?)
    }

    async fn delete_resource_group(
        &self,
        subscription_id: &str,
        resource_group: &str,
        cancel: &CancellationToken,
    ) -> InfraResult<()> {
        info!("Deleting resource group {}", resource_group);
        let args = RunArgs::new(AZ)
            .args([
                "group",
                "delete",
                "--name",
                resource_group,
                "--subscription",
                subscription_id,
                "--yes",
            ])
            .timeout(DEPLOY_TIMEOUT_SECONDS);
        self.run_classified(args, GROUP_NOT_FOUND, cancel).await.map(|_| ())
    }

    async fn purge_resource(&self, resource: &Resource, cancel: &CancellationToken) -> InfraResult<()> {
        let subscription_id = resource.subscription_id().unwrap_or_default();
        let location = resource.location.clone().unwrap_or_default();

        let args = if resource.is_type(resource_types::KEY_VAULT) {
            RunArgs::new(AZ).args(["keyvault", "purge", "--name", resource.name.as_str()])
        } else if resource.is_type(resource_types::API_MANAGEMENT) {
            RunArgs::new(AZ).args([
                "apim",
                "deletedservice",
                "purge",
                "--service-name",
                resource.name.as_str(),
                "--location",
                location.as_str(),
            ])
        } else if resource.is_type(resource_types::COGNITIVE_SERVICES) {
            let group = resource.resource_group().unwrap_or_default();
            RunArgs::new(AZ).args([
                "cognitiveservices",
                "account",
                "purge",
                "--name",
                resource.name.as_str(),
                "--resource-group",
                group.as_str(),
                "--location",
                location.as_str(),
            ])
        } else if resource.is_type(resource_types::APP_CONFIGURATION) {
            RunArgs::new(AZ).args(["appconfig", "purge", "--name", resource.name.as_str(), "--yes"])
        } else {
            return Err(InfraError::Unsupported(format!(
                "purge of resource type {}",
                resource.resource_type
            )));
        };

        info!("Purging {} ({})", resource.name, resource.resource_type);
        let args = args
            .args(["--subscription", subscription_id.as_str()])
            .timeout(DEPLOY_TIMEOUT_SECONDS);
        self.run(args, cancel).await.map(|_| ())
    }
}

#[async_trait]
impl TenantResolver for AzCliDeploymentService {
    async fn lookup_tenant(&self, subscription_id: &str, cancel: &CancellationToken) -> InfraResult<String> {
        let args = RunArgs::new(AZ).args([
            "account",
            "show",
            "--subscription",
            subscription_id,
            "--query",
            "tenantId",
            "--output",
            "tsv",
        ]);
        let result = self.run(args, cancel).await?;
        Ok(result.stdout.trim().to_string())
    }
}
