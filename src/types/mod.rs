use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::error::{Error, Result as CniPluginResult};

/// CNI command arguments, assembled from the runtime's environment.
#[derive(Debug, Clone)]
pub struct CmdArgs {
    /// Container ID
    pub container_id: String,
    /// Network namespace path (may be empty for DEL)
    pub netns: String,
    /// Interface name inside the container
    pub ifname: String,
    /// CNI_ARGS key-value pairs
    pub args: HashMap<String, String>,
    /// Delegate plugin search path (CNI_PATH)
    pub path: String,
    /// Raw network configuration from stdin
    pub stdin_data: Vec<u8>,
}

/// Attachment result (CNI 1.0.0 shape).
///
/// Serialized to stdout on success. The runtime is the system of record:
/// it passes the result back unchanged as `prevResult` on a later CHECK.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CniResult {
    /// CNI specification version
    #[serde(rename = "cniVersion", default)]
    pub cni_version: String,
    /// Interfaces created
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interfaces: Option<Vec<Interface>>,
    /// IP configurations
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ips: Option<Vec<IPConfig>>,
    /// Routes to configure
    #[serde(skip_serializing_if = "Option::is_none")]
    pub routes: Option<Vec<Route>>,
    /// DNS configuration
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dns: Option<Dns>,
}

/// Interface information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Interface {
    /// Interface name
    pub name: String,
    /// MAC address
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mac: Option<String>,
    /// Sandbox path (network namespace the interface resides in)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sandbox: Option<String>,
}

/// IP configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IPConfig {
    /// Index into `interfaces` this address is assigned to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interface: Option<usize>,
    /// IP address with prefix length
    pub address: String,
    /// Gateway
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway: Option<String>,
}

/// DNS configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Dns {
    /// DNS nameservers
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nameservers: Option<Vec<String>>,
    /// Local domain
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    /// DNS search domains
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search: Option<Vec<String>>,
    /// DNS options
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<String>>,
}

/// Route configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Route {
    /// Destination CIDR
    pub dst: String,
    /// Gateway for this route
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gw: Option<String>,
}

/// Pre-0.3.0 delegate result: one address object per family.
#[derive(Debug, Clone, Deserialize)]
struct LegacyResult {
    ip4: Option<LegacyIpConfig>,
    ip6: Option<LegacyIpConfig>,
    dns: Option<Dns>,
}

#[derive(Debug, Clone, Deserialize)]
struct LegacyIpConfig {
    ip: String,
    gateway: Option<String>,
    #[serde(default)]
    routes: Vec<Route>,
}

impl CniResult {
    /// Create a new empty result
    pub fn new(cni_version: &str) -> Self {
        Self {
            cni_version: cni_version.to_string(),
            interfaces: None,
            ips: None,
            routes: None,
            dns: None,
        }
    }

    /// Add an interface to the result
    pub fn add_interface(&mut self, interface: Interface) {
        self.interfaces.get_or_insert_with(Vec::new).push(interface);
    }

    /// Add an IP configuration to the result
    pub fn add_ip(&mut self, ip: IPConfig) {
        self.ips.get_or_insert_with(Vec::new).push(ip);
    }

    /// Add a route to the result
    pub fn add_route(&mut self, route: Route) {
        self.routes.get_or_insert_with(Vec::new).push(route);
    }

    /// Normalize a delegate result into the current shape.
    ///
    /// IPAM delegates may answer in the current (0.3.0+) shape or in the
    /// legacy per-family shape. Everything downstream sees only the
    /// normalized form; nothing else branches on result version.
    pub fn from_delegate(value: Value) -> CniPluginResult<Self> {
        if !value.is_object() {
            return Err(Error::Config(
                "delegate result is not a JSON object".to_string(),
            ));
        }
        let is_current = value.get("ips").is_some()
            || value.get("interfaces").is_some()
            || value.get("routes").is_some();
        let is_legacy = value.get("ip4").is_some() || value.get("ip6").is_some();

        if is_legacy && !is_current {
            let legacy: LegacyResult = serde_json::from_value(value)
                .map_err(|e| Error::Config(format!("invalid legacy delegate result: {e}")))?;
            return Ok(Self::from_legacy(legacy));
        }

        serde_json::from_value(value)
            .map_err(|e| Error::Config(format!("invalid delegate result: {e}")))
    }

    /// Same normalization, applied to the caller-supplied `prevResult`.
    /// The previous result is untrusted input: it gets the same scrutiny
    /// as a fresh delegate answer.
    pub fn from_prev_result(value: Value) -> CniPluginResult<Self> {
        Self::from_delegate(value)
    }

    fn from_legacy(legacy: LegacyResult) -> Self {
        let mut result = CniResult::new("0.2.0");
        for ipc in [legacy.ip4, legacy.ip6].into_iter().flatten() {
            result.add_ip(IPConfig {
                interface: None,
                address: ipc.ip,
                gateway: ipc.gateway,
            });
            for route in ipc.routes {
                result.add_route(route);
            }
        }
        result.dns = legacy.dns;
        result
    }

    /// All addresses belong to the single vlan interface.
    pub fn attribute_ips_to_interface(&mut self, index: usize) {
        if let Some(ips) = &mut self.ips {
            for ip in ips {
                ip.interface = Some(index);
            }
        }
    }

    /// Print result as JSON on stdout
    pub fn print(&self) -> CniPluginResult<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("failed to serialize result: {e}")))?;
        println!("{}", json);
        Ok(())
    }
}

/// Structured error object printed to stdout on failure, per the command
/// protocol.
#[derive(Debug, Serialize)]
pub struct CniErrorReport {
    #[serde(rename = "cniVersion")]
    pub cni_version: String,
    pub code: u32,
    pub msg: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub details: String,
}

impl CniErrorReport {
    pub fn from_error(err: &Error) -> Self {
        Self {
            cni_version: "1.0.0".to_string(),
            code: err.cni_code(),
            msg: err.to_string(),
            details: String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn normalizes_current_shape_unchanged() {
        let value = json!({
            "cniVersion": "1.0.0",
            "ips": [{"address": "10.1.2.3/24", "gateway": "10.1.2.1"}],
            "routes": [{"dst": "0.0.0.0/0", "gw": "10.1.2.1"}]
        });
        let result = CniResult::from_delegate(value).unwrap();
        let ips = result.ips.unwrap();
        assert_eq!(ips.len(), 1);
        assert_eq!(ips[0].address, "10.1.2.3/24");
        assert_eq!(result.routes.unwrap().len(), 1);
    }

    #[test]
    fn normalizes_legacy_shape_into_ips() {
        let value = json!({
            "ip4": {
                "ip": "10.1.2.3/24",
                "gateway": "10.1.2.1",
                "routes": [{"dst": "0.0.0.0/0"}]
            },
            "dns": {"nameservers": ["10.1.2.1"]}
        });
        let result = CniResult::from_delegate(value).unwrap();
        let ips = result.ips.unwrap();
        assert_eq!(ips.len(), 1);
        assert_eq!(ips[0].address, "10.1.2.3/24");
        assert_eq!(ips[0].gateway.as_deref(), Some("10.1.2.1"));
        assert_eq!(result.routes.unwrap()[0].dst, "0.0.0.0/0");
        assert!(result.dns.is_some());
    }

    #[test]
    fn rejects_non_object_delegate_result() {
        assert!(CniResult::from_delegate(json!("not a result")).is_err());
        assert!(CniResult::from_delegate(json!(42)).is_err());
    }

    #[test]
    fn attributes_every_address_to_the_vlan_interface() {
        let mut result = CniResult::new("1.0.0");
        result.add_ip(IPConfig {
            interface: None,
            address: "10.1.2.3/24".to_string(),
            gateway: None,
        });
        result.add_ip(IPConfig {
            interface: Some(3),
            address: "fd00::2/64".to_string(),
            gateway: None,
        });
        result.attribute_ips_to_interface(0);
        for ip in result.ips.unwrap() {
            assert_eq!(ip.interface, Some(0));
        }
    }

    #[test]
    fn omits_empty_fields_when_serialized() {
        let result = CniResult::new("1.0.0");
        let json = serde_json::to_string(&result).unwrap();
        assert!(!json.contains("interfaces"));
        assert!(!json.contains("dns"));
    }
}
