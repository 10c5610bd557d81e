use thiserror::Error;

/// Errors surfaced to the container runtime.
///
/// Every variant carries enough context (operation, resource name,
/// underlying cause) to diagnose a failed invocation from the error
/// object alone.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid network configuration: {0}")]
    Config(String),

    #[error("invalid CNI environment: {0}")]
    Env(String),

    #[error("failed to open netns {path:?}: {source}")]
    NamespaceOpen {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("interface {name:?} not found{}", in_netns(.netns))]
    InterfaceNotFound { name: String, netns: Option<String> },

    #[error("failed to create vlan link on master {master:?}: {reason}")]
    LinkCreate { master: String, reason: String },

    #[error("failed to rename vlan link to {name:?}: {reason}")]
    Rename { name: String, reason: String },

    #[error("IPAM delegate returned missing IP config")]
    NoAddressAssigned,

    #[error("IPAM delegate {plugin:?} {op} failed: {msg}")]
    Delegate {
        plugin: String,
        op: &'static str,
        msg: String,
    },

    #[error("check failed: {0}")]
    Verification(String),

    #[error("netlink request failed: {0}")]
    Netlink(#[from] rtnetlink::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

fn in_netns(netns: &Option<String>) -> String {
    match netns {
        Some(path) => format!(" in netns {path:?}"),
        None => String::new(),
    }
}

impl Error {
    /// CNI error code reported in the structured error output.
    /// 1-99 are reserved by the CNI spec; plugin-specific kinds start at 100.
    pub fn cni_code(&self) -> u32 {
        match self {
            Error::Config(_) => 7,
            Error::Env(_) => 4,
            Error::NamespaceOpen { .. } => 100,
            Error::InterfaceNotFound { .. } => 101,
            Error::LinkCreate { .. } => 102,
            Error::Rename { .. } => 103,
            Error::NoAddressAssigned => 104,
            Error::Delegate { .. } => 105,
            Error::Verification(_) => 106,
            Error::Netlink(_) => 107,
            Error::Io(_) => 108,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
