use std::collections::HashMap;
use std::env;
use std::io::{self, Read};
use tokio::runtime::Runtime;

use crate::config::NetConf;
use crate::error::{Error, Result};
use crate::plugin::VlanPlugin;
use crate::types::CmdArgs;

/// Versions of the command protocol this plugin speaks.
pub const SUPPORTED_VERSIONS: &[&str] = &["0.3.0", "0.3.1", "0.4.0", "1.0.0"];

/// Parse command arguments from the CNI environment.
///
/// Nothing is required at this point; each command enforces the variables
/// it actually needs (DEL legitimately runs without CNI_NETNS).
pub fn parse_args() -> Result<CmdArgs> {
    let container_id = env::var("CNI_CONTAINERID").unwrap_or_default();
    let netns = env::var("CNI_NETNS").unwrap_or_default();
    let ifname = env::var("CNI_IFNAME").unwrap_or_default();
    let path = env::var("CNI_PATH").unwrap_or_default();
    let args = parse_cni_args(&env::var("CNI_ARGS").unwrap_or_default());

    let mut stdin_data = Vec::new();
    io::stdin().read_to_end(&mut stdin_data)?;

    Ok(CmdArgs {
        container_id,
        netns,
        ifname,
        args,
        path,
        stdin_data,
    })
}

/// Parse CNI_ARGS string into key-value pairs
fn parse_cni_args(args_str: &str) -> HashMap<String, String> {
    let mut args = HashMap::new();
    for pair in args_str.split(';').filter(|p| !p.is_empty()) {
        if let Some(idx) = pair.find('=') {
            args.insert(pair[..idx].to_string(), pair[idx + 1..].to_string());
        }
    }
    args
}

fn require(name: &'static str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(Error::Env(format!("{name} is missing")));
    }
    Ok(())
}

/// Runtime for the netlink work. setns(2) is scoped to one OS thread, so
/// every task runs on the main thread via a current-thread runtime; this
/// is the process-lifetime pinning the namespace switches rely on.
fn runtime() -> Result<Runtime> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_io()
        .build()?;
    Ok(runtime)
}

/// Execute the add command
pub fn cmd_add() -> Result<()> {
    let args = parse_args()?;
    require("CNI_CONTAINERID", &args.container_id)?;
    require("CNI_NETNS", &args.netns)?;
    require("CNI_IFNAME", &args.ifname)?;

    let conf = NetConf::parse(&args.stdin_data)?;
    let plugin = VlanPlugin::new(conf, args);
    let result = runtime()?.block_on(plugin.add_network())?;
    result.print()
}

/// Execute the delete command
pub fn cmd_del() -> Result<()> {
    let args = parse_args()?;
    require("CNI_IFNAME", &args.ifname)?;

    let conf = NetConf::parse(&args.stdin_data)?;
    let plugin = VlanPlugin::new(conf, args);
    runtime()?.block_on(plugin.del_network())
}

/// Execute the check command
pub fn cmd_check() -> Result<()> {
    let args = parse_args()?;
    require("CNI_CONTAINERID", &args.container_id)?;
    require("CNI_NETNS", &args.netns)?;
    require("CNI_IFNAME", &args.ifname)?;

    let conf = NetConf::parse(&args.stdin_data)?;
    let plugin = VlanPlugin::new(conf, args);
    runtime()?.block_on(plugin.check_network())
}

/// Execute the status command
pub fn cmd_status() -> Result<()> {
    let args = parse_args()?;
    let conf = NetConf::parse(&args.stdin_data)?;
    let plugin = VlanPlugin::new(conf, args);
    plugin.status()
}

/// Main entry point for the CNI plugin
pub fn run_cni() -> Result<()> {
    let cmd =
        env::var("CNI_COMMAND").map_err(|_| Error::Env("CNI_COMMAND is missing".to_string()))?;

    match cmd.as_str() {
        "ADD" => cmd_add(),
        "DEL" => cmd_del(),
        "CHECK" => cmd_check(),
        "STATUS" => cmd_status(),
        "VERSION" => {
            let versions = serde_json::json!({
                "cniVersion": "1.0.0",
                "supportedVersions": SUPPORTED_VERSIONS,
            });
            println!("{versions}");
            Ok(())
        }
        other => Err(Error::Env(format!("unknown CNI command: {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_cni_args_pairs() {
        let args = parse_cni_args("K8S_POD_NAME=web-0;K8S_POD_NAMESPACE=default");
        assert_eq!(args.get("K8S_POD_NAME").unwrap(), "web-0");
        assert_eq!(args.get("K8S_POD_NAMESPACE").unwrap(), "default");
        assert!(parse_cni_args("").is_empty());
    }

    #[test]
    fn missing_required_variable_is_an_env_error() {
        let err = require("CNI_NETNS", "").unwrap_err();
        assert!(matches!(err, Error::Env(_)));
        assert!(err.to_string().contains("CNI_NETNS"));
    }
}
