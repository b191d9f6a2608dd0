//! CLI module for esi-cluster
//!
//! Provides subcommands:
//! - `esi-cluster orchestrate` - Provision a cluster from a configuration file
//! - `esi-cluster undeploy` - Tear down a cluster by id
//! - `esi-cluster list` - List clusters recorded in node metadata
//! - `esi-cluster validate` - Check a configuration file without touching the cloud
//! - `esi-cluster openshift` - Drive the external installer
//! - `esi-cluster context` - Manage cloud contexts

use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;

mod commands;
mod display;

pub use commands::*;
pub use display::*;

#[derive(Parser, Debug)]
#[command(name = "esi-cluster")]
#[command(about = "Provision and tear down bare-metal clusters")]
#[command(version)]
pub struct Cli {
    /// Enable verbose logging output (-v, -vv, -vvv)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Path to config file (default: ~/.esi-cluster/config)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Path to a .env file for loading PULL_SECRET and API_TOKEN
    #[arg(long, value_name = "FILE", global = true)]
    pub env_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Allocate, wire and provision the nodes of a cluster
    Orchestrate(OrchestrateArgs),

    /// Release every node tagged with a cluster id
    Undeploy(UndeployArgs),

    /// List clusters found in node metadata
    List,

    /// Validate a cluster configuration file
    Validate(ValidateArgs),

    /// Install OpenShift through the assisted installer
    #[command(name = "openshift", visible_alias = "ocp")]
    Openshift(OpenshiftArgs),

    /// Manage cloud contexts
    Context(ContextArgs),
}

/// Arguments for the orchestrate command
#[derive(Parser, Debug)]
pub struct OrchestrateArgs {
    /// Path to the cluster configuration (JSON or YAML)
    pub file: PathBuf,

    /// Nodes provisioned at once (default: available parallelism)
    #[arg(long)]
    pub concurrency: Option<usize>,
}

/// Arguments for the undeploy command
#[derive(Parser, Debug)]
pub struct UndeployArgs {
    /// Cluster id printed by orchestrate
    pub cluster_id: String,
}

/// Arguments for the validate command
#[derive(Parser, Debug)]
pub struct ValidateArgs {
    /// Path to the cluster configuration
    pub file: PathBuf,
}

#[derive(Parser, Debug)]
pub struct OpenshiftArgs {
    #[command(subcommand)]
    pub action: OpenshiftAction,
}

#[derive(Subcommand, Debug)]
pub enum OpenshiftAction {
    /// Run (or resume) an install
    Orchestrate(OpenshiftOrchestrateArgs),

    /// Release the endpoints and nodes of an install
    Undeploy {
        /// Path to the installer configuration
        file: PathBuf,
    },
}

#[derive(Parser, Debug)]
pub struct OpenshiftOrchestrateArgs {
    /// Path to the installer configuration (JSON or YAML)
    pub file: PathBuf,

    /// Resume with an existing installer cluster
    #[arg(long)]
    pub cluster_id: Option<String>,

    /// Resume with an existing infra env (needs --cluster-id)
    #[arg(long, requires = "cluster_id")]
    pub infra_env_id: Option<String>,

    /// Seconds between status checks
    #[arg(long, default_value = "30")]
    pub poll_interval: u64,

    /// Minutes to wait for hosts to change status (0 waits forever)
    #[arg(long, default_value = "60")]
    pub host_timeout: u64,

    /// Minutes to wait for the install to finish (0 waits forever)
    #[arg(long, default_value = "180")]
    pub install_timeout: u64,
}

/// Arguments for the context command
#[derive(Parser, Debug)]
pub struct ContextArgs {
    #[command(subcommand)]
    pub action: ContextAction,
}

#[derive(Subcommand, Debug)]
pub enum ContextAction {
    /// List all contexts
    List,

    /// Show current context
    Current,

    /// Switch to a context
    Use {
        /// Context name
        name: String,
    },

    /// Add a new context
    Add {
        /// Context name
        name: String,

        /// Bare-metal service URL
        #[arg(long)]
        baremetal_url: String,

        /// Network service URL
        #[arg(long)]
        network_url: String,

        /// Image service URL
        #[arg(long)]
        image_url: String,

        /// Token for authentication
        #[arg(long, env = "ESI_TOKEN")]
        token: Option<String>,

        /// Free-form description
        #[arg(long)]
        description: Option<String>,
    },

    /// Delete a context
    Delete {
        /// Context name
        name: String,
    },
}
