use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::path::PathBuf;

use crate::error::{Error, Result};
use crate::types::{Dns, Route};

/// Operator-side settings for the ctl tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VlanCniConfig {
    /// Path to the CNI bin directory
    pub cni_bin_dir: PathBuf,
    /// Path to the CNI config directory
    pub cni_conf_dir: PathBuf,
    /// Default master interface name
    pub default_master: String,
    /// Default MTU for VLAN interfaces
    pub default_mtu: Option<u32>,
}

impl Default for VlanCniConfig {
    fn default() -> Self {
        Self {
            cni_bin_dir: PathBuf::from("/opt/cni/bin"),
            cni_conf_dir: PathBuf::from("/etc/cni/net.d"),
            default_master: "eth0".to_string(),
            default_mtu: None,
        }
    }
}

/// Network configuration for one invocation.
///
/// Parsed once from the runtime's stdin payload, never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetConf {
    /// CNI specification version declared by the caller
    #[serde(rename = "cniVersion", default)]
    pub cni_version: String,
    /// Name of the network
    #[serde(default)]
    pub name: String,
    /// Type of CNI plugin
    #[serde(rename = "type", default)]
    pub plugin_type: String,
    /// Master interface the VLAN hangs off
    #[serde(default)]
    pub master: String,
    /// VLAN tag (0-4094)
    #[serde(rename = "vlanId", default)]
    pub vlan_id: u16,
    /// Interface MTU; absent or 0 inherits the master's MTU
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mtu: Option<u32>,
    /// Master lives inside the container namespace, not the host
    #[serde(rename = "linkInContainer", default)]
    pub link_in_container: bool,
    /// IPAM delegate configuration, passed through verbatim
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ipam: Option<IpamConfig>,
    /// DNS settings copied into the attachment result
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dns: Option<Dns>,
    /// Result of the previous ADD, supplied by the runtime on CHECK
    #[serde(rename = "prevResult", skip_serializing_if = "Option::is_none")]
    pub prev_result: Option<Value>,
}

/// IPAM (IP Address Management) delegate configuration.
///
/// Only `type` matters to this plugin; the raw payload is what the
/// delegate actually receives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpamConfig {
    /// Type of IPAM plugin (the delegate binary's name)
    #[serde(rename = "type")]
    pub ipam_type: String,
    /// Subnet CIDR
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subnet: Option<String>,
    /// Gateway IP
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway: Option<String>,
    /// Routes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub routes: Option<Vec<Route>>,
}

pub const MAX_VLAN_ID: u16 = 4094;

impl NetConf {
    /// Parse and validate a NetConf from the stdin payload.
    ///
    /// Only kernel-free checks happen here; the MTU-vs-master check runs
    /// in [`NetConf::validate_mtu`] once the master has been resolved.
    /// DEL never resolves the master, so teardown keeps working after the
    /// master or the namespace is gone.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let conf: NetConf = serde_json::from_slice(bytes)
            .map_err(|e| Error::Config(format!("failed to load netconf: {e}")))?;

        if conf.master.is_empty() {
            return Err(Error::Config(
                "\"master\" field is required. It specifies the host interface name \
                 to create the VLAN for"
                    .to_string(),
            ));
        }
        if conf.vlan_id > MAX_VLAN_ID {
            return Err(Error::Config(format!(
                "invalid VLAN ID {} (must be between 0 and {} inclusive)",
                conf.vlan_id, MAX_VLAN_ID
            )));
        }

        Ok(conf)
    }

    /// Check the MTU override against the resolved master MTU.
    pub fn validate_mtu(&self, master_mtu: u32) -> Result<()> {
        if let Some(mtu) = self.mtu {
            if mtu > master_mtu {
                return Err(Error::Config(format!(
                    "invalid MTU {mtu}, must be [0, master MTU({master_mtu})]"
                )));
            }
        }
        Ok(())
    }

    /// Effective MTU request: `None` inherits from the master.
    pub fn mtu_override(&self) -> Option<u32> {
        match self.mtu {
            Some(0) | None => None,
            Some(mtu) => Some(mtu),
        }
    }

    /// IPAM type, required for ADD.
    pub fn ipam_type(&self) -> Result<&str> {
        match &self.ipam {
            Some(ipam) if !ipam.ipam_type.is_empty() => Ok(&ipam.ipam_type),
            _ => Err(Error::Config(
                "\"ipam\" section with a delegate type is required".to_string(),
            )),
        }
    }

    /// Build a vlan NetConf for the ctl tool's generate command.
    pub fn generate(name: &str, master: &str, vlan_id: u16, mtu: Option<u32>) -> Self {
        Self {
            cni_version: "1.0.0".to_string(),
            name: name.to_string(),
            plugin_type: "vlan".to_string(),
            master: master.to_string(),
            vlan_id,
            mtu,
            link_in_container: false,
            ipam: None,
            dns: None,
            prev_result: None,
        }
    }

    /// Save configuration to a file
    pub fn save(&self, path: PathBuf) -> Result<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("failed to serialize netconf: {e}")))?;
        fs::write(path, json)?;
        Ok(())
    }
}

/// Installer for the VLAN CNI plugin's conflist.
pub struct Installer {
    config: VlanCniConfig,
}

impl Installer {
    pub fn new(config: VlanCniConfig) -> Self {
        Self { config }
    }

    /// Write a conflist wrapping the given NetConf under the CNI conf dir.
    pub fn install(&self, conf: &NetConf) -> Result<PathBuf> {
        for dir in [&self.config.cni_bin_dir, &self.config.cni_conf_dir] {
            fs::create_dir_all(dir)?;
        }

        let conflist = serde_json::json!({
            "cniVersion": conf.cni_version,
            "name": conf.name,
            "plugins": [conf],
        });
        let path = self
            .config
            .cni_conf_dir
            .join(format!("10-{}.conflist", conf.name));
        fs::write(
            &path,
            serde_json::to_string_pretty(&conflist)
                .map_err(|e| Error::Config(format!("failed to serialize conflist: {e}")))?,
        )?;

        Ok(path)
    }
}
