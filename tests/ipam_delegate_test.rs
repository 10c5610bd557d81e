use std::collections::HashMap;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use vlan_cni::error::Error;
use vlan_cni::ipam;
use vlan_cni::types::CmdArgs;

fn write_delegate(dir: &Path, name: &str, script: &str) {
    let path = dir.join(name);
    fs::write(&path, script).unwrap();
    let mut perms = fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    fs::set_permissions(&path, perms).unwrap();
}

fn args_for(dir: &Path) -> CmdArgs {
    CmdArgs {
        container_id: "test-container".to_string(),
        netns: "/var/run/netns/test".to_string(),
        ifname: "eth1".to_string(),
        args: HashMap::from([("K8S_POD_NAME".to_string(), "web-0".to_string())]),
        path: dir.display().to_string(),
        stdin_data: br#"{"master":"eth0","vlanId":100,"ipam":{"type":"fake"}}"#.to_vec(),
    }
}

#[test]
fn add_normalizes_a_current_shape_result() {
    let dir = tempfile::tempdir().unwrap();
    write_delegate(
        dir.path(),
        "fake",
        r#"#!/bin/sh
cat > /dev/null
echo '{"cniVersion":"1.0.0","ips":[{"address":"10.10.0.5/24","gateway":"10.10.0.1"}],"routes":[{"dst":"0.0.0.0/0","gw":"10.10.0.1"}]}'
"#,
    );

    let result = ipam::exec_add("fake", &args_for(dir.path())).unwrap();
    let ips = result.ips.unwrap();
    assert_eq!(ips.len(), 1);
    assert_eq!(ips[0].address, "10.10.0.5/24");
    assert_eq!(result.routes.unwrap()[0].dst, "0.0.0.0/0");
}

#[test]
fn add_normalizes_a_legacy_shape_result() {
    let dir = tempfile::tempdir().unwrap();
    write_delegate(
        dir.path(),
        "fake",
        r#"#!/bin/sh
cat > /dev/null
echo '{"ip4":{"ip":"10.10.0.5/24","gateway":"10.10.0.1","routes":[{"dst":"0.0.0.0/0"}]},"dns":{}}'
"#,
    );

    let result = ipam::exec_add("fake", &args_for(dir.path())).unwrap();
    let ips = result.ips.unwrap();
    assert_eq!(ips.len(), 1);
    assert_eq!(ips[0].address, "10.10.0.5/24");
    assert_eq!(ips[0].gateway.as_deref(), Some("10.10.0.1"));
}

#[test]
fn delegate_error_object_surfaces_in_the_message() {
    let dir = tempfile::tempdir().unwrap();
    write_delegate(
        dir.path(),
        "fake",
        r#"#!/bin/sh
cat > /dev/null
echo '{"cniVersion":"1.0.0","code":11,"msg":"no IP addresses available","details":"pool exhausted"}'
exit 1
"#,
    );

    let err = ipam::exec_add("fake", &args_for(dir.path())).unwrap_err();
    assert!(matches!(err, Error::Delegate { .. }));
    let msg = err.to_string();
    assert!(msg.contains("no IP addresses available"));
    assert!(msg.contains("pool exhausted"));
}

#[test]
fn delegate_sees_the_swapped_command_and_raw_payload() {
    let dir = tempfile::tempdir().unwrap();
    let witness = dir.path().join("seen");
    write_delegate(
        dir.path(),
        "fake",
        &format!(
            r#"#!/bin/sh
printf '%s ' "$CNI_COMMAND" "$CNI_IFNAME" "$CNI_ARGS" > {witness}
cat >> {witness}
"#,
            witness = witness.display()
        ),
    );

    ipam::exec_del("fake", &args_for(dir.path())).unwrap();
    let seen = fs::read_to_string(&witness).unwrap();
    assert!(seen.starts_with("DEL eth1 K8S_POD_NAME=web-0 "));
    // The delegate receives the original netconf bytes untouched.
    assert!(seen.contains(r#""vlanId":100"#));
}

#[test]
fn check_and_status_propagate_delegate_failures() {
    let dir = tempfile::tempdir().unwrap();
    write_delegate(
        dir.path(),
        "fake",
        "#!/bin/sh\ncat > /dev/null\necho 'daemon unreachable' >&2\nexit 1\n",
    );

    let args = args_for(dir.path());
    let err = ipam::exec_check("fake", &args).unwrap_err();
    assert!(err.to_string().contains("daemon unreachable"));
    let err = ipam::exec_status("fake", &args).unwrap_err();
    assert!(matches!(err, Error::Delegate { .. }));
}

#[test]
fn missing_delegate_binary_fails_before_spawning() {
    let dir = tempfile::tempdir().unwrap();
    let err = ipam::exec_add("absent", &args_for(dir.path())).unwrap_err();
    assert!(err.to_string().contains("absent"));
}
