//! # External installer flow
//!
//! Drives the hosted assisted-installer API through seven stages, each of
//! which can be skipped on a later run once its result is known:
//!
//! ```text
//!   create cluster ─► create infra-env ─► register hosts ─► private network
//!        ─► configure install ─► wait for install ─► publish endpoints
//! ```
//!
//! A failing stage is wrapped in [`InstallerError::Stage`], which carries the
//! ids discovered so far and renders the command that resumes the run.

pub mod client;
pub mod orchestrator;
pub mod poll;

pub use client::{AssistedInstallerClient, InstallerApi, DEFAULT_INSTALLER_URL};
pub use orchestrator::{
    undeploy_install, InstallEvent, InstallOutcome, InstallSession, InstallSettings, Installer,
    InstallUndeployReport,
};
pub use poll::{PollError, PollSettings, Poller};

use std::fmt;

use thiserror::Error;

use crate::cluster::OrchestrationError;
use crate::config::ConfigError;
use crate::services::ServiceError;

/// The seven steps of an install, in order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    CreateCluster,
    CreateInfraEnv,
    RegisterHosts,
    MoveToPrivateNetwork,
    ConfigureInstall,
    WaitForInstall,
    PublishEndpoints,
}

impl Stage {
    /// Message shown when the stage fails
    pub fn failure_message(&self) -> &'static str {
        match self {
            Stage::CreateCluster => "Error creating OpenShift cluster",
            Stage::CreateInfraEnv => "Error creating OpenShift cluster infra env",
            Stage::RegisterHosts => "Error registering nodes to OpenShift cluster",
            Stage::MoveToPrivateNetwork => {
                "Error preparing nodes after OpenShift cluster registration"
            }
            Stage::ConfigureInstall | Stage::WaitForInstall => "Error installing OpenShift cluster",
            Stage::PublishEndpoints => "Error during OpenShift cluster post-install",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::CreateCluster => "create cluster",
            Stage::CreateInfraEnv => "create infra env",
            Stage::RegisterHosts => "register hosts",
            Stage::MoveToPrivateNetwork => "move to private network",
            Stage::ConfigureInstall => "configure install",
            Stage::WaitForInstall => "wait for install",
            Stage::PublishEndpoints => "publish endpoints",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
pub enum InstallerError {
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("JSON parse error: {0}")]
    Parse(String),

    #[error("Unexpected response from Assisted Installer ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("{0}")]
    Config(#[from] ConfigError),

    #[error("{0}")]
    Service(#[from] ServiceError),

    #[error("{0}")]
    Orchestration(#[from] OrchestrationError),

    #[error("{0}")]
    Poll(#[from] PollError),

    #[error("Installation failed with status {status}: {info}")]
    InstallFailed { status: String, info: String },

    #[error("{}: {source}", .stage.failure_message())]
    Stage {
        stage: Stage,
        cluster_id: Option<String>,
        infra_env_id: Option<String>,
        /// Ready-to-run invocation resuming from the failed stage
        resume_command: String,
        #[source]
        source: Box<InstallerError>,
    },
}

impl InstallerError {
    /// True for rejections by the install API, often an expired token
    pub fn is_api_error(&self) -> bool {
        match self {
            InstallerError::Api { .. } => true,
            InstallerError::Stage { source, .. } => source.is_api_error(),
            _ => false,
        }
    }

    /// Multi-line text telling the operator how to pick the run back up
    pub fn diagnostic(&self) -> Option<String> {
        let InstallerError::Stage {
            stage,
            cluster_id,
            infra_env_id,
            resume_command,
            source,
        } = self
        else {
            return None;
        };

        let mut out = String::new();
        out.push_str(stage.failure_message());
        out.push('\n');
        out.push_str(&format!("* {}\n", source));
        if let Some(id) = cluster_id {
            out.push_str(&format!("* cluster ID: {}\n", id));
        }
        if let Some(id) = infra_env_id {
            out.push_str(&format!("* infra env ID: {}\n", id));
        }
        if self.is_api_error() {
            out.push_str("* YOU MAY NEED TO REFRESH YOUR OPENSHIFT API TOKEN\n");
        }
        out.push_str("Run this command to continue installation:\n");
        out.push_str(&format!("* {}\n", resume_command));
        Some(out)
    }
}

/// Command line that resumes an install with whatever ids are known
pub fn resume_command(
    config_file: &str,
    cluster_id: Option<&str>,
    infra_env_id: Option<&str>,
) -> String {
    let mut command = String::from("esi-cluster openshift orchestrate");
    if let Some(id) = cluster_id {
        command.push_str(&format!(" --cluster-id {}", id));
        if let Some(id) = infra_env_id {
            command.push_str(&format!(" --infra-env-id {}", id));
        }
    }
    command.push(' ');
    command.push_str(config_file);
    command
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resume_command() {
        assert_eq!(
            resume_command("ocp.json", None, None),
            "esi-cluster openshift orchestrate ocp.json"
        );
        assert_eq!(
            resume_command("ocp.json", Some("c1"), None),
            "esi-cluster openshift orchestrate --cluster-id c1 ocp.json"
        );
        assert_eq!(
            resume_command("ocp.json", Some("c1"), Some("i1")),
            "esi-cluster openshift orchestrate --cluster-id c1 --infra-env-id i1 ocp.json"
        );
        // an infra env without its cluster cannot be resumed alone
        assert_eq!(
            resume_command("ocp.json", None, Some("i1")),
            "esi-cluster openshift orchestrate ocp.json"
        );
    }

    #[test]
    fn test_stage_diagnostic() {
        let err = InstallerError::Stage {
            stage: Stage::RegisterHosts,
            cluster_id: Some("c1".to_string()),
            infra_env_id: Some("i1".to_string()),
            resume_command: resume_command("ocp.json", Some("c1"), Some("i1")),
            source: Box::new(InstallerError::Api {
                status: 401,
                message: "Unauthorized".to_string(),
            }),
        };

        assert!(err.is_api_error());
        assert!(err
            .to_string()
            .starts_with("Error registering nodes to OpenShift cluster"));
        let text = err.diagnostic().unwrap();
        assert!(text.contains("* cluster ID: c1"));
        assert!(text.contains("REFRESH YOUR OPENSHIFT API TOKEN"));
        assert!(text.contains("--cluster-id c1 --infra-env-id i1 ocp.json"));
    }

    #[test]
    fn test_non_stage_error_has_no_diagnostic() {
        let err = InstallerError::Http("reset".to_string());
        assert!(err.diagnostic().is_none());
        assert!(!err.is_api_error());
    }
}
