use ipnetwork::IpNetwork;
use serde::Deserialize;
use std::io::Write;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::netlink::Netlink;
use crate::types::{CmdArgs, CniResult};

/// Error object an IPAM delegate prints on failure.
#[derive(Debug, Deserialize)]
struct DelegateError {
    #[allow(dead_code)]
    code: Option<u32>,
    msg: Option<String>,
    details: Option<String>,
}

/// Locate the delegate binary by IPAM type on the CNI search path.
pub fn find_delegate(plugin_type: &str, cni_path: &str) -> Result<PathBuf> {
    for dir in cni_path.split(':').filter(|d| !d.is_empty()) {
        let candidate = Path::new(dir).join(plugin_type);
        if candidate.is_file() {
            return Ok(candidate);
        }
    }
    Err(Error::Delegate {
        plugin: plugin_type.to_string(),
        op: "exec",
        msg: format!("failed to find plugin {plugin_type:?} in path {cni_path:?}"),
    })
}

/// Invoke the delegate with the original raw payload on stdin and the CNI
/// environment of the current invocation, swapping in `op` as the command.
fn exec(plugin_type: &str, op: &'static str, args: &CmdArgs) -> Result<Vec<u8>> {
    let binary = find_delegate(plugin_type, &args.path)?;
    debug!(plugin = plugin_type, op, "invoking IPAM delegate");

    let cni_args = args
        .args
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(";");

    let mut child = Command::new(&binary)
        .env("CNI_COMMAND", op)
        .env("CNI_CONTAINERID", &args.container_id)
        .env("CNI_NETNS", &args.netns)
        .env("CNI_IFNAME", &args.ifname)
        .env("CNI_PATH", &args.path)
        .env("CNI_ARGS", cni_args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| Error::Delegate {
            plugin: plugin_type.to_string(),
            op,
            msg: format!("failed to spawn {}: {e}", binary.display()),
        })?;

    let mut stdin = child.stdin.take().ok_or_else(|| Error::Delegate {
        plugin: plugin_type.to_string(),
        op,
        msg: "failed to open delegate stdin".to_string(),
    })?;
    stdin
        .write_all(&args.stdin_data)
        .map_err(|e| Error::Delegate {
            plugin: plugin_type.to_string(),
            op,
            msg: format!("failed to write netconf to delegate: {e}"),
        })?;
    drop(stdin);

    let output = child.wait_with_output().map_err(|e| Error::Delegate {
        plugin: plugin_type.to_string(),
        op,
        msg: e.to_string(),
    })?;

    if !output.status.success() {
        // Delegates report failure as an error object on stdout.
        let msg = serde_json::from_slice::<DelegateError>(&output.stdout)
            .ok()
            .map(|e| {
                let msg = e.msg.unwrap_or_default();
                match e.details {
                    Some(details) if !details.is_empty() => format!("{msg}; {details}"),
                    _ => msg,
                }
            })
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| String::from_utf8_lossy(&output.stderr).trim().to_string());
        return Err(Error::Delegate {
            plugin: plugin_type.to_string(),
            op,
            msg,
        });
    }

    Ok(output.stdout)
}

/// Run the delegate's "add" and normalize whatever shape it answers with.
pub fn exec_add(plugin_type: &str, args: &CmdArgs) -> Result<CniResult> {
    let stdout = exec(plugin_type, "ADD", args)?;
    let value = serde_json::from_slice(&stdout).map_err(|e| Error::Delegate {
        plugin: plugin_type.to_string(),
        op: "ADD",
        msg: format!("invalid result JSON: {e}"),
    })?;
    CniResult::from_delegate(value)
}

/// Release the delegate's allocation. Idempotent on the delegate's side.
pub fn exec_del(plugin_type: &str, args: &CmdArgs) -> Result<()> {
    exec(plugin_type, "DEL", args).map(|_| ())
}

/// Ask the delegate to validate its own records for this attachment.
pub fn exec_check(plugin_type: &str, args: &CmdArgs) -> Result<()> {
    exec(plugin_type, "CHECK", args).map(|_| ())
}

/// Delegate readiness probe.
pub fn exec_status(plugin_type: &str, args: &CmdArgs) -> Result<()> {
    exec(plugin_type, "STATUS", args).map(|_| ())
}

/// Apply a normalized result to the named interface: bring it up, assign
/// every address, then install the routes. Runs against a netlink handle
/// bound to the target namespace.
pub async fn configure_iface(netlink: &Netlink, ifname: &str, result: &CniResult) -> Result<()> {
    let link = netlink.link_by_name(ifname).await?;
    netlink.set_up(link.index).await?;

    for ipc in result.ips.iter().flatten() {
        let address = parse_cidr(&ipc.address)?;
        info!(ifname, %address, "assigning address");
        netlink.add_address(link.index, address).await?;
    }

    for route in result.routes.iter().flatten() {
        let dst = parse_cidr(&route.dst)?;
        let gateway = route
            .gw
            .as_deref()
            .map(parse_gateway)
            .transpose()?;
        info!(ifname, %dst, "adding route");
        netlink.add_route(dst, gateway, link.index).await?;
    }

    Ok(())
}

pub fn parse_cidr(s: &str) -> Result<IpNetwork> {
    s.parse()
        .map_err(|e| Error::Config(format!("invalid CIDR {s:?}: {e}")))
}

pub fn parse_gateway(s: &str) -> Result<IpAddr> {
    s.parse()
        .map_err(|e| Error::Config(format!("invalid gateway {s:?}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_delegate_across_path_components() {
        let dir = tempfile::tempdir().unwrap();
        let other = dir.path().join("other");
        let bins = dir.path().join("bin");
        std::fs::create_dir_all(&other).unwrap();
        std::fs::create_dir_all(&bins).unwrap();
        std::fs::write(bins.join("host-local"), "#!/bin/sh\n").unwrap();

        let cni_path = format!("{}:{}", other.display(), bins.display());
        let found = find_delegate("host-local", &cni_path).unwrap();
        assert_eq!(found, bins.join("host-local"));
    }

    #[test]
    fn missing_delegate_is_a_delegate_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = find_delegate("no-such-ipam", &dir.path().display().to_string()).unwrap_err();
        assert!(matches!(err, Error::Delegate { .. }));
        assert!(err.to_string().contains("no-such-ipam"));
    }

    #[test]
    fn rejects_malformed_cidrs_and_gateways() {
        assert!(parse_cidr("10.1.2.0/24").is_ok());
        assert!(parse_cidr("not-a-cidr").is_err());
        assert!(parse_gateway("10.1.2.1").is_ok());
        assert!(parse_gateway("10.1.2.1/24").is_err());
    }
}
