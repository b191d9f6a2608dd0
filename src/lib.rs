//! Provision bare-metal clusters from declarative documents, tear them down
//! again, and drive the external OpenShift installer over the same nodes.

pub mod cli;
pub mod cluster;
pub mod config;
pub mod context;
pub mod installer;
pub mod services;
