//! CLI command definitions.
//!
//! Each subcommand maps to one provisioning workflow. Commands share a
//! [`Workspace`]: the project file, the selected environment and the
//! collaborators a provisioning manager is built from.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use provkit_console::{Console, ConsoleOptions, TerminalConsole};
use provkit_env::{Environment, EnvironmentStore};
use provkit_infra::{AzCliDeploymentService, DeploymentService, Scope, ScopeKind};
use provkit_provisioning::{
    register_default_providers, Deployment, InputParameter, Manager, Options, ProjectConfig,
    ProviderContext, ProvisioningError, BICEP_PROVIDER, TERRAFORM_PROVIDER,
};
use provkit_runner::{tool_in_path, CommandRunner, ProcessRunner};

pub mod down;
pub mod monitor;
pub mod provision;
pub mod show;

/// provkit - provision and tear down the infrastructure of an environment
#[derive(Parser)]
#[command(name = "provkit")]
#[command(version, about = "provkit - infrastructure provisioning for named environments")]
#[command(long_about = r#"
provkit provisions the infrastructure described by a project's `infra`
directory (Bicep or Terraform) into a named environment, and tears it down
again.

WORKFLOWS:
  provision  → Plan and deploy the environment's infrastructure
  down       → Destroy the environment's infrastructure
  show       → Print the outputs of the current deployment
  monitor    → Print Application Insights portal links

EXIT CODES:
  0 - Success
  1 - General error
  2 - Configuration error
  3 - Destroy declined
  4 - Deployment failure
"#)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Commands,
}

/// Options shared by every command.
#[derive(Args, Debug, Clone, Default)]
pub struct GlobalArgs {
    /// Name of the environment to use
    #[arg(short, long, global = true, env = "AZURE_ENV_NAME")]
    pub environment: Option<String>,

    /// Never ask questions; fail instead
    #[arg(long, global = true)]
    pub no_prompt: bool,

    /// Project directory (defaults to the current directory)
    #[arg(short = 'C', long, global = true)]
    pub cwd: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Provision the environment's infrastructure
    Provision(provision::ProvisionArgs),

    /// Destroy the environment's infrastructure
    Down(down::DownArgs),

    /// Show the outputs of the current deployment
    Show(show::ShowArgs),

    /// Print monitoring links for a deployed environment
    Monitor(monitor::MonitorArgs),
}

/// A project directory opened for one command.
pub struct Workspace {
    pub project_dir: PathBuf,
    pub config: ProjectConfig,
    pub store: EnvironmentStore,
    pub env: Environment,
    pub interactive: bool,
    pub console: Arc<dyn Console>,
    pub runner: Arc<dyn CommandRunner>,
    pub service: Arc<AzCliDeploymentService>,
}

impl Workspace {
    /// Open the project and environment selected by `global`.
    pub fn open(global: &GlobalArgs) -> Result<Self> {
        let project_dir = match &global.cwd {
            Some(dir) => dir.clone(),
            None => std::env::current_dir()?,
        };
        let config = ProjectConfig::load(&project_dir)?;

        let name = global
            .environment
            .as_deref()
            .filter(|n| !n.trim().is_empty())
            .ok_or_else(|| {
                ProvisioningError::configuration(
                    "no environment selected; pass --environment or set AZURE_ENV_NAME",
                )
            })?;
        let store = EnvironmentStore::new(&project_dir);
        let env = store
            .load_or_create(name)
            .with_context(|| format!("loading environment '{}'", name))?;
        debug!("Opened environment '{}' in {}", name, project_dir.display());

        let interactive = !global.no_prompt;
        let runner: Arc<dyn CommandRunner> = Arc::new(ProcessRunner::new());
        let service = Arc::new(AzCliDeploymentService::new(runner.clone()));
        register_default_providers();

        Ok(Self {
            project_dir,
            config,
            store,
            env,
            interactive,
            console: Arc::new(TerminalConsole::new(interactive)),
            runner,
            service,
        })
    }

    pub fn options(&self) -> &Options {
        &self.config.infra
    }

    /// A manager over a snapshot of the current environment.
    pub fn manager(&self) -> Result<Manager> {
        let deployments: Arc<dyn DeploymentService> = self.service.clone();
        let ctx = ProviderContext::new(
            self.env.clone(),
            &self.project_dir,
            self.options().clone(),
            self.console.clone(),
            self.runner.clone(),
            deployments,
        )
        .interactive(self.interactive);
        Ok(Manager::new(ctx)?)
    }

    /// Fail early when the provider's command-line tool is not installed.
    pub fn check_tool(&self) -> Result<()> {
        let provider = self.options().provider_name();
        match required_tool(provider) {
            Some(tool) if tool_in_path(tool).is_none() => Err(ProvisioningError::configuration(format!(
                "the {} provider needs `{}`, which was not found on PATH",
                provider, tool
            ))
            .into()),
            Some(tool) => {
                debug!("Using {} for the {} provider", tool, provider);
                Ok(())
            }
            None => Ok(()),
        }
    }

    pub fn save(&self) -> Result<()> {
        self.store
            .save(&self.env)
            .with_context(|| format!("saving environment '{}'", self.env.name()))
    }

    /// Fill in the subscription and location, asking when allowed.
    pub async fn ensure_target(&mut self) -> Result<()> {
        if self.env.subscription_id().is_none() {
            let subscription_id = self
                .ask("Enter the Azure subscription id to use", "AZURE_SUBSCRIPTION_ID")
                .await?;
            self.env.set_subscription_id(subscription_id);
        }
        if self.env.location().is_none() {
            let location = self
                .ask("Enter the Azure location to use (e.g. eastus2)", "AZURE_LOCATION")
                .await?;
            self.env.set_location(location);
        }
        Ok(())
    }

    async fn ask(&self, question: &str, key: &str) -> Result<String> {
        if !self.interactive {
            return Err(ProvisioningError::configuration(format!(
                "{} is not set for environment '{}'",
                key,
                self.env.name()
            ))
            .into());
        }
        let answer = self
            .console
            .prompt(ConsoleOptions::new(question).help(format!("Stored as {}", key)))
            .await?;
        Ok(answer.trim().to_string())
    }

    /// Scope for a deployment of `kind` named after the environment.
    pub fn scope(&self, kind: ScopeKind) -> Result<Scope> {
        let subscription_id = self
            .env
            .subscription_id()
            .ok_or_else(|| ProvisioningError::configuration("AZURE_SUBSCRIPTION_ID is not set"))?;
        let service: Arc<dyn DeploymentService> = self.service.clone();

        let scope = match kind {
            ScopeKind::Subscription => {
                let location = self
                    .env
                    .location()
                    .ok_or_else(|| ProvisioningError::configuration("AZURE_LOCATION is not set"))?;
                Scope::subscription(service, location, subscription_id, self.env.name())
            }
            ScopeKind::ResourceGroup => {
                let resource_group = self.env.resource_group().ok_or_else(|| {
                    ProvisioningError::configuration(
                        "the template targets a resource group but AZURE_RESOURCE_GROUP is not set",
                    )
                })?;
                Scope::resource_group(service, subscription_id, resource_group, self.env.name())
            }
        };
        Ok(scope)
    }

    /// The environment's current deployment, if any.
    ///
    /// The subscription scope is tried first, then the environment's
    /// resource group when one is recorded.
    pub async fn find_deployment(
        &self,
        manager: &Manager,
        cancel: &CancellationToken,
    ) -> Result<Option<(Scope, Deployment)>> {
        let mut kinds = vec![ScopeKind::Subscription];
        if self.env.resource_group().is_some() {
            kinds.push(ScopeKind::ResourceGroup);
        }

        for kind in kinds {
            let scope = self.scope(kind)?;
            match manager.get_deployment(&scope, cancel).await {
                Ok(deployment) => {
                    info!("Found deployment at {}", scope);
                    return Ok(Some((scope, deployment)));
                }
                Err(e) if e.is_not_found() => debug!("No deployment at {}", scope),
                Err(e) => return Err(e.into()),
            }
        }
        Ok(None)
    }
}

/// Command-line tool a provider shells out to.
fn required_tool(provider: &str) -> Option<&'static str> {
    match provider {
        BICEP_PROVIDER => Some("az"),
        TERRAFORM_PROVIDER => Some("terraform"),
        _ => None,
    }
}

/// `name = value` lines for printing, with secure values masked.
pub fn parameter_lines(parameters: &BTreeMap<String, InputParameter>) -> Vec<String> {
    parameters
        .iter()
        .map(|(name, parameter)| format!("{} = {}", name, parameter.display_value()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use provkit_provisioning::{ParameterSource, PROJECT_FILE};

    fn project(yaml: &str) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(PROJECT_FILE), yaml).unwrap();
        dir
    }

    fn global(dir: &tempfile::TempDir, env: Option<&str>) -> GlobalArgs {
        GlobalArgs {
            environment: env.map(str::to_string),
            no_prompt: true,
            cwd: Some(dir.path().to_path_buf()),
        }
    }

    #[test]
    fn test_parse_down_flags() {
        let cli = Cli::try_parse_from(["provkit", "down", "--force", "--purge", "-e", "dev"]).unwrap();

        assert_eq!(cli.global.environment.as_deref(), Some("dev"));
        match cli.command {
            Commands::Down(args) => {
                assert!(args.force);
                assert!(args.purge);
            }
            _ => panic!("expected down"),
        }
    }

    #[test]
    fn test_parse_monitor_flags() {
        let cli = Cli::try_parse_from(["provkit", "monitor", "--logs", "--no-prompt"]).unwrap();

        assert!(cli.global.no_prompt);
        assert!(matches!(cli.command, Commands::Monitor(ref args) if args.logs && !args.live));
    }

    #[test]
    fn test_parameter_lines_mask_secure_values() {
        let mut parameters = BTreeMap::new();
        parameters.insert(
            "adminPassword".to_string(),
            InputParameter::new("hunter2", ParameterSource::Prompt).secure(true),
        );
        parameters.insert(
            "location".to_string(),
            InputParameter::new("eastus2", ParameterSource::ParametersFile),
        );
        parameters.insert(
            "replicas".to_string(),
            InputParameter::new(3, ParameterSource::Prompt),
        );

        let lines = parameter_lines(&parameters);

        assert_eq!(
            lines,
            vec!["adminPassword = ******", "location = eastus2", "replicas = 3"]
        );
        assert!(!lines.iter().any(|l| l.contains("hunter2")));
    }

    #[test]
    fn test_required_tool() {
        assert_eq!(required_tool("bicep"), Some("az"));
        assert_eq!(required_tool("terraform"), Some("terraform"));
        assert_eq!(required_tool("test"), None);
    }

    #[test]
    fn test_check_tool_skips_providers_without_a_tool() {
        let dir = project("name: todo\ninfra:\n  provider: test\n");
        let workspace = Workspace::open(&global(&dir, Some("dev"))).unwrap();

        workspace.check_tool().unwrap();
    }

    #[test]
    fn test_open_workspace() {
        let dir = project("name: todo\ninfra:\n  provider: terraform\n");

        let workspace = Workspace::open(&global(&dir, Some("dev"))).unwrap();

        assert_eq!(workspace.env.name(), "dev");
        assert_eq!(workspace.options().provider_name(), "terraform");
        assert!(!workspace.interactive);
    }

    #[test]
    fn test_open_without_environment() {
        let dir = project("name: todo\n");

        let err = Workspace::open(&global(&dir, None)).err().unwrap();

        let err = err.downcast_ref::<ProvisioningError>().unwrap();
        assert!(err.is_configuration());
    }

    #[tokio::test]
    async fn test_ensure_target_without_prompting() {
        let dir = project("name: todo\n");
        let mut workspace = Workspace::open(&global(&dir, Some("dev"))).unwrap();

        let err = workspace.ensure_target().await.unwrap_err();
        assert!(err.to_string().contains("AZURE_SUBSCRIPTION_ID"));

        workspace.env.set_subscription_id("sub");
        workspace.env.set_location("eastus2");
        workspace.ensure_target().await.unwrap();
    }

    #[test]
    fn test_scope_selection() {
        let dir = project("name: todo\n");
        let mut workspace = Workspace::open(&global(&dir, Some("dev"))).unwrap();
        workspace.env.set_subscription_id("sub");
        workspace.env.set_location("eastus2");

        let scope = workspace.scope(ScopeKind::Subscription).unwrap();
        assert_eq!(scope.deployment_name(), "dev");

        assert!(workspace.scope(ScopeKind::ResourceGroup).is_err());
        workspace.env.set_resource_group("rg-dev");
        let scope = workspace.scope(ScopeKind::ResourceGroup).unwrap();
        assert_eq!(scope.resource_group_name(), Some("rg-dev"));
    }
}
