//! Image-based deployment through the external `metalsmith` tool
//!
//! The tool is handed a node, a pre-created port and an image; it requests
//! the deployment and returns. Watching the deployment finish is left to the
//! tool and the bare-metal service.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use super::ServiceError;

/// Everything the deployment tool needs for one node
#[derive(Debug, Clone, PartialEq)]
pub struct ImageDeployment {
    pub node_id: String,
    pub resource_class: String,
    pub port_id: String,
    pub image_id: String,
    /// Path to the public key injected into the deployed image
    pub ssh_key: String,
}

#[async_trait]
pub trait ImageDeployer: Send + Sync {
    async fn deploy(&self, deployment: &ImageDeployment) -> Result<(), ServiceError>;
}

// ============================================================================
// SBIO: Pure argument generation (no I/O)
// ============================================================================

/// Generate the argument list for a `metalsmith deploy` invocation
pub fn generate_deploy_args(deployment: &ImageDeployment) -> Vec<String> {
    let ssh_key = shellexpand::tilde(&deployment.ssh_key).into_owned();
    vec![
        "deploy".to_string(),
        "--image".to_string(),
        deployment.image_id.clone(),
        "--ssh-public-key".to_string(),
        ssh_key,
        "--resource-class".to_string(),
        deployment.resource_class.clone(),
        "--candidate".to_string(),
        deployment.node_id.clone(),
        "--port".to_string(),
        deployment.port_id.clone(),
    ]
}

// ============================================================================
// SBIO: I/O implementation (child process)
// ============================================================================

#[derive(Debug, Clone)]
pub struct MetalsmithDeployer {
    program: String,
}

impl MetalsmithDeployer {
    pub fn new() -> Self {
        Self::with_program("metalsmith")
    }

    /// Use a different executable, e.g. a wrapper script
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for MetalsmithDeployer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ImageDeployer for MetalsmithDeployer {
    async fn deploy(&self, deployment: &ImageDeployment) -> Result<(), ServiceError> {
        let args = generate_deploy_args(deployment);
        debug!("Running {} {}", self.program, args.join(" "));

        let output = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| ServiceError::Process(format!("{}: {}", self.program, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ServiceError::Process(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )));
        }

        info!(
            "Requested image deployment of {} on node {}",
            deployment.image_id, deployment.node_id
        );
        Ok(())
    }
}
