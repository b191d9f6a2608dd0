//! Command implementations for the CLI
//!
//! SBIO pattern: Commands return Results, I/O is handled by caller

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, watch};

use super::OpenshiftOrchestrateArgs;
use crate::cluster::provision::default_concurrency;
use crate::cluster::{
    orchestrate, undeploy, ClusterReport, ClusterSummary, OrchestrationError, Registry,
    UndeployReport,
};
use crate::config::install::pull_secret_from_env;
use crate::config::{
    load_cluster_config, load_install_config, load_install_teardown_config, ConfigError,
};
use crate::context::{self, Config, Context, ContextError};
use crate::installer::{
    undeploy_install, InstallEvent, InstallOutcome, InstallSession, InstallSettings, Installer,
    InstallUndeployReport, InstallerApi, InstallerError,
};
use crate::services::{GlanceClient, IronicClient, MetalsmithDeployer, NeutronClient, Services};

/// Errors that can occur during command execution
#[derive(Error, Debug)]
pub enum CommandError {
    #[error("Context error: {0}")]
    Context(#[from] ContextError),

    #[error("{0}")]
    Config(#[from] ConfigError),

    #[error("{0}")]
    Orchestration(#[from] OrchestrationError),

    #[error("{0}")]
    Installer(#[from] InstallerError),

    /// Provisioning ran but the report could not be assembled
    #[error("Cluster {cluster_id} was provisioned but its report failed: {source}")]
    Report {
        cluster_id: String,
        #[source]
        source: OrchestrationError,
    },

    #[error("{failed} of {total} nodes failed to provision")]
    PartialFailure { failed: usize, total: usize },
}

/// Result type for commands
pub type CommandResult<T> = Result<T, CommandError>;

// ============================================================================
// Context Commands (Pure business logic)
// ============================================================================

/// Info about a context for display
#[derive(Debug, Clone)]
pub struct ContextInfo {
    pub name: String,
    pub url: String,
    pub is_current: bool,
}

/// List all contexts
pub fn context_list(config: &Config) -> Vec<ContextInfo> {
    let current = config.current_context.as_deref();
    context::list_contexts(config)
        .into_iter()
        .filter_map(|name| config.contexts.get(name))
        .map(|ctx| ContextInfo {
            name: ctx.name.clone(),
            url: ctx.baremetal_url.clone(),
            is_current: Some(ctx.name.as_str()) == current,
        })
        .collect()
}

/// Get current context name and bare-metal URL
pub fn context_current(config: &Config) -> CommandResult<(String, String)> {
    let ctx = config.current()?;
    Ok((ctx.name.clone(), ctx.baremetal_url.clone()))
}

/// Switch to a context
pub fn context_use(config: &mut Config, name: &str) -> CommandResult<()> {
    context::set_current_context(config, name)?;
    Ok(())
}

/// Add a new context, making it current if it is the first one
pub fn context_add(config: &mut Config, ctx: Context) -> CommandResult<()> {
    let name = ctx.name.clone();
    context::add_context(config, ctx);
    if config.current_context.is_none() {
        context::set_current_context(config, &name)?;
    }
    Ok(())
}

/// Delete a context
pub fn context_delete(config: &mut Config, name: &str) -> CommandResult<bool> {
    let removed = context::remove_context(config, name);
    Ok(removed.is_some())
}

/// Service clients for the current context
pub fn services_from_config(config: &Config) -> CommandResult<Services> {
    let ctx = config.current()?;
    Ok(Services::new(
        Arc::new(IronicClient::new(ctx.baremetal_url.clone(), ctx.token.clone())),
        Arc::new(NeutronClient::new(ctx.network_url.clone(), ctx.token.clone())),
        Arc::new(GlanceClient::new(ctx.image_url.clone(), ctx.token.clone())),
        Arc::new(MetalsmithDeployer::new()),
    ))
}

// ============================================================================
// Validate Commands
// ============================================================================

/// Result of validating a cluster document
#[derive(Debug)]
pub struct ValidationResult {
    pub valid: bool,
    pub entries: usize,
    pub nodes: usize,
    pub error: Option<String>,
}

/// Validate a cluster document
pub fn validate_cluster_file(path: &Path) -> ValidationResult {
    match load_cluster_config(path) {
        Ok(config) => ValidationResult {
            valid: true,
            entries: config.node_configs.len(),
            nodes: config.node_count(),
            error: None,
        },
        Err(e) => ValidationResult {
            valid: false,
            entries: 0,
            nodes: 0,
            error: Some(e.to_string()),
        },
    }
}

// ============================================================================
// Cluster Commands
// ============================================================================

/// Provision the cluster described by `path` and report on every node.
///
/// The report is returned even when some nodes failed; the caller decides
/// how to surface those failures.
pub async fn orchestrate_cluster(
    services: &Services,
    path: &Path,
    concurrency: Option<usize>,
) -> CommandResult<ClusterReport> {
    let config = load_cluster_config(path)?;
    let orchestration = orchestrate(
        services,
        &config,
        concurrency.unwrap_or_else(default_concurrency),
    )
    .await?;
    ClusterReport::build(services, &orchestration)
        .await
        .map_err(|source| CommandError::Report {
            cluster_id: orchestration.cluster_id.clone(),
            source,
        })
}

/// Error for a report with failed nodes
pub fn report_failures(report: &ClusterReport) -> CommandResult<()> {
    if report.failures.is_empty() {
        return Ok(());
    }
    Err(CommandError::PartialFailure {
        failed: report.failures.len(),
        total: report.failures.len() + report.rows.len(),
    })
}

pub async fn undeploy_cluster(services: &Services, cluster_id: &str) -> CommandResult<UndeployReport> {
    Ok(undeploy(services, cluster_id).await?)
}

pub async fn list_clusters(services: &Services) -> CommandResult<Vec<ClusterSummary>> {
    let registry = Registry::new(services.baremetal.clone());
    Ok(registry
        .list_clusters()
        .await
        .map_err(OrchestrationError::from)?)
}

// ============================================================================
// OpenShift Commands
// ============================================================================

fn minutes(value: u64) -> Option<Duration> {
    (value > 0).then(|| Duration::from_secs(value * 60))
}

/// Poll settings from the command line; zero minutes waits forever
pub fn install_settings(args: &OpenshiftOrchestrateArgs) -> InstallSettings {
    InstallSettings {
        poll_interval: Duration::from_secs(args.poll_interval.max(1)),
        host_timeout: minutes(args.host_timeout),
        install_timeout: minutes(args.install_timeout),
    }
}

/// Run or resume an install described by `args.file`
pub async fn openshift_orchestrate(
    services: Services,
    api: Arc<dyn InstallerApi>,
    args: &OpenshiftOrchestrateArgs,
    shutdown: watch::Receiver<bool>,
    events: mpsc::UnboundedSender<InstallEvent>,
) -> CommandResult<InstallOutcome> {
    let config = load_install_config(&args.file)?;
    let pull_secret = pull_secret_from_env()?;

    let installer = Installer::new(
        api,
        services,
        config,
        pull_secret,
        args.file.display().to_string(),
    )
    .with_settings(install_settings(args))
    .with_shutdown(shutdown)
    .with_events(events);

    let session = InstallSession::resume(args.cluster_id.clone(), args.infra_env_id.clone());
    Ok(installer.run(session).await?)
}

pub async fn openshift_undeploy(
    services: &Services,
    path: &Path,
) -> CommandResult<InstallUndeployReport> {
    let config = load_install_teardown_config(path)?;
    Ok(undeploy_install(services, &config).await?)
}
