use std::collections::HashMap;

use vlan_cni::config::NetConf;
use vlan_cni::plugin::VlanPlugin;
use vlan_cni::types::{CmdArgs, CniResult, IPConfig, Interface, Route};

fn sample_conf() -> NetConf {
    let bytes = serde_json::to_vec(&serde_json::json!({
        "cniVersion": "1.0.0",
        "name": "test-vlan",
        "type": "vlan",
        "master": "eth0",
        "vlanId": 100,
        "mtu": 1500,
        "ipam": {"type": "host-local", "subnet": "10.10.0.0/24"}
    }))
    .unwrap();
    NetConf::parse(&bytes).unwrap()
}

fn sample_args(conf: &NetConf) -> CmdArgs {
    CmdArgs {
        container_id: "test-container".to_string(),
        netns: "/var/run/netns/test".to_string(),
        ifname: "eth1".to_string(),
        args: HashMap::new(),
        path: "/opt/cni/bin".to_string(),
        stdin_data: serde_json::to_vec(conf).unwrap(),
    }
}

#[test]
fn test_net_conf_wire_format() {
    let conf = sample_conf();
    assert_eq!(conf.cni_version, "1.0.0");
    assert_eq!(conf.name, "test-vlan");
    assert_eq!(conf.plugin_type, "vlan");
    assert_eq!(conf.master, "eth0");
    assert_eq!(conf.vlan_id, 100);
    assert_eq!(conf.mtu, Some(1500));
    assert!(!conf.link_in_container);
    assert!(conf.prev_result.is_none());

    // vlanId and linkInContainer are the wire tags the runtime sends
    let json = serde_json::to_string(&conf).unwrap();
    assert!(json.contains("\"vlanId\":100"));
    assert!(json.contains("\"linkInContainer\":false"));
}

#[test]
fn test_cmd_args_creation() {
    let conf = sample_conf();
    let args = sample_args(&conf);

    assert_eq!(args.container_id, "test-container");
    assert_eq!(args.netns, "/var/run/netns/test");
    assert_eq!(args.ifname, "eth1");
    assert!(args.args.is_empty());
    assert_eq!(args.path, "/opt/cni/bin");
    assert!(!args.stdin_data.is_empty());
}

#[test]
fn test_vlan_plugin_creation() {
    let conf = sample_conf();
    let args = sample_args(&conf);
    let _plugin = VlanPlugin::new(conf, args);
}

#[test]
fn test_cni_result_serialization() {
    let mut result = CniResult::new("1.0.0");
    result.add_interface(Interface {
        name: "eth1".to_string(),
        mac: Some("02:42:ac:11:00:02".to_string()),
        sandbox: Some("/var/run/netns/test".to_string()),
    });
    result.add_ip(IPConfig {
        interface: Some(0),
        address: "10.10.0.5/24".to_string(),
        gateway: Some("10.10.0.1".to_string()),
    });
    result.add_route(Route {
        dst: "0.0.0.0/0".to_string(),
        gw: Some("10.10.0.1".to_string()),
    });

    let serialized = serde_json::to_string(&result).unwrap();
    let deserialized: CniResult = serde_json::from_str(&serialized).unwrap();

    assert_eq!(result.cni_version, deserialized.cni_version);
    let interfaces = deserialized.interfaces.unwrap();
    assert_eq!(interfaces[0].name, "eth1");
    assert_eq!(interfaces[0].sandbox.as_deref(), Some("/var/run/netns/test"));
    let ips = deserialized.ips.unwrap();
    assert_eq!(ips[0].interface, Some(0));
    assert_eq!(ips[0].address, "10.10.0.5/24");
}

#[test]
fn test_prev_result_round_trip() {
    // The result of an ADD, passed back verbatim as prevResult on CHECK,
    // must reconstruct the same descriptors.
    let mut result = CniResult::new("1.0.0");
    result.add_interface(Interface {
        name: "eth1".to_string(),
        mac: None,
        sandbox: Some("/var/run/netns/test".to_string()),
    });
    result.add_ip(IPConfig {
        interface: Some(0),
        address: "10.10.0.5/24".to_string(),
        gateway: None,
    });

    let value = serde_json::to_value(&result).unwrap();
    let conf_bytes = serde_json::to_vec(&serde_json::json!({
        "cniVersion": "1.0.0",
        "name": "test-vlan",
        "type": "vlan",
        "master": "eth0",
        "vlanId": 100,
        "prevResult": value,
    }))
    .unwrap();

    let conf = NetConf::parse(&conf_bytes).unwrap();
    let prev = CniResult::from_prev_result(conf.prev_result.unwrap()).unwrap();
    let interfaces = prev.interfaces.unwrap();
    assert_eq!(interfaces.len(), 1);
    assert_eq!(interfaces[0].name, "eth1");
    assert_eq!(prev.ips.unwrap()[0].address, "10.10.0.5/24");
}

#[test]
fn test_malformed_prev_result_is_rejected() {
    let conf_bytes = serde_json::to_vec(&serde_json::json!({
        "master": "eth0",
        "vlanId": 100,
        "prevResult": {"interfaces": "not-an-array"},
    }))
    .unwrap();
    let conf = NetConf::parse(&conf_bytes).unwrap();
    assert!(CniResult::from_prev_result(conf.prev_result.unwrap()).is_err());
}
