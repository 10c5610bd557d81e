//! VLAN CNI plugin for container runtimes
//!
//! This implementation provides a pure Rust VLAN CNI plugin that:
//! - Creates VLAN sub-interfaces off a master link
//! - Moves them into container network namespaces under their final name
//! - Delegates IP addressing to an external IPAM plugin
//! - Verifies and tears down attachments on later invocations

pub mod commands;
pub mod config;
pub mod error;
pub mod ipam;
pub mod netlink;
pub mod netns;
pub mod plugin;
pub mod types;

// Re-export commonly used items
pub use config::NetConf;
pub use error::{Error, Result};
pub use plugin::VlanPlugin;
pub use commands::{run_cni, cmd_add, cmd_check, cmd_del, cmd_status};
