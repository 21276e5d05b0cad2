//! Turns natural-language infrastructure requests into Terraform that has
//! been validated, security-scanned and applied.

pub mod agent;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod queue;
pub mod registry;
pub mod server;
pub mod shutdown;
pub mod terraform;
pub mod workflow;
