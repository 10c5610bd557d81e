use rtnetlink::IpVersion;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::NetConf;
use crate::error::{Error, Result};
use crate::ipam;
use crate::netlink::{LinkDetails, Netlink};
use crate::netns::NetNs;
use crate::types::{CmdArgs, CniResult, Interface};

/// VLAN plugin command state machine.
///
/// One instance handles exactly one command; nothing persists between
/// invocations. DEL and CHECK rebuild whatever context they need from the
/// runtime's inputs.
pub struct VlanPlugin {
    /// Network configuration
    config: NetConf,
    /// Command arguments
    args: CmdArgs,
}

impl VlanPlugin {
    /// Create a new VLAN plugin
    pub fn new(config: NetConf, args: CmdArgs) -> Self {
        Self { config, args }
    }

    /// Attach: create the VLAN interface in the container namespace and
    /// have the IPAM delegate address it.
    pub async fn add_network(&self) -> Result<CniResult> {
        let ipam_type = self.config.ipam_type()?;

        let netns = NetNs::open(&self.args.netns)?;
        let host = Netlink::connect()?;

        let master = self.resolve_master(&host, &netns).await?;
        self.config.validate_mtu(master.mtu)?;

        let vlan_interface = self.create_vlan(&host, &netns, &master).await?;

        let delegate_result = ipam::exec_add(ipam_type, &self.args)?;

        // The delegate now holds an allocation for us. Any failure past
        // this point releases it so addresses don't leak.
        match self.finish_add(&netns, vlan_interface, delegate_result).await {
            Ok(result) => Ok(result),
            Err(err) => {
                if let Err(del_err) = ipam::exec_del(ipam_type, &self.args) {
                    warn!("IPAM delegate del after failed add also failed: {}", del_err);
                }
                Err(err)
            }
        }
    }

    async fn finish_add(
        &self,
        netns: &NetNs,
        vlan_interface: Interface,
        mut result: CniResult,
    ) -> Result<CniResult> {
        if result.ips.as_ref().map_or(true, |ips| ips.is_empty()) {
            return Err(Error::NoAddressAssigned);
        }

        result.attribute_ips_to_interface(0);
        result.interfaces = Some(vec![vlan_interface]);

        let ns_netlink = Netlink::connect_in(netns)?;
        ipam::configure_iface(&ns_netlink, &self.args.ifname, &result).await?;

        result.cni_version = self.result_version();
        result.dns = self.config.dns.clone();
        Ok(result)
    }

    /// Detach: release the delegate's allocation, then remove the link.
    ///
    /// The runtime may call this repeatedly, or after the kernel already
    /// tore the namespace down; an absent link or namespace is success.
    pub async fn del_network(&self) -> Result<()> {
        if let Some(ipam_conf) = &self.config.ipam {
            if !ipam_conf.ipam_type.is_empty() {
                ipam::exec_del(&ipam_conf.ipam_type, &self.args)?;
            }
        }

        if self.args.netns.is_empty() {
            return Ok(());
        }

        let netns = match NetNs::open(&self.args.netns) {
            Ok(netns) => netns,
            Err(Error::NamespaceOpen { path, .. }) => {
                info!(netns = %path, "netns already gone, nothing to detach");
                return Ok(());
            }
            Err(err) => return Err(err),
        };
        let ns_netlink = match Netlink::connect_in(&netns) {
            Ok(netlink) => netlink,
            Err(Error::NamespaceOpen { path, .. }) => {
                info!(netns = %path, "netns no longer enterable, nothing to detach");
                return Ok(());
            }
            Err(err) => return Err(err),
        };

        if ns_netlink.del_by_name(&self.args.ifname).await? {
            info!(ifname = %self.args.ifname, "removed vlan link");
        } else {
            info!(ifname = %self.args.ifname, "vlan link already absent");
        }
        Ok(())
    }

    /// Verify: assert the live interface still agrees with the
    /// configuration and the previously recorded result.
    pub async fn check_network(&self) -> Result<()> {
        let prev_value = self
            .config
            .prev_result
            .clone()
            .ok_or_else(|| Error::Verification("required prevResult missing".to_string()))?;

        let netns = NetNs::open(&self.args.netns)?;

        if let Some(ipam_conf) = &self.config.ipam {
            if !ipam_conf.ipam_type.is_empty() {
                ipam::exec_check(&ipam_conf.ipam_type, &self.args)?;
            }
        }

        let prev_result = CniResult::from_prev_result(prev_value)?;
        let recorded = find_prev_interface(&prev_result, &self.args.ifname, &self.args.netns)
            .ok_or_else(|| {
                Error::Verification(format!(
                    "no interface {:?} with sandbox {:?} in prevResult",
                    self.args.ifname, self.args.netns
                ))
            })?;

        let host = Netlink::connect()?;
        self.resolve_master(&host, &netns).await?;

        let ns_netlink = Netlink::connect_in(&netns)?;
        self.validate_container_interface(&ns_netlink, &recorded)
            .await?;
        self.validate_addresses(&ns_netlink, &prev_result).await?;
        self.validate_routes(&ns_netlink, &prev_result).await?;

        Ok(())
    }

    /// Status: delegate readiness only; no link or namespace work.
    pub fn status(&self) -> Result<()> {
        if let Some(ipam_conf) = &self.config.ipam {
            if !ipam_conf.ipam_type.is_empty() {
                ipam::exec_status(&ipam_conf.ipam_type, &self.args)?;
            }
        }
        Ok(())
    }

    /// Resolve the master link, in the container namespace when the
    /// configuration says it lives there.
    async fn resolve_master(&self, host: &Netlink, netns: &NetNs) -> Result<LinkDetails> {
        let lookup = if self.config.link_in_container {
            let ns_netlink = Netlink::connect_in(netns)?;
            ns_netlink.link_by_name(&self.config.master).await
        } else {
            host.link_by_name(&self.config.master).await
        };
        lookup.map_err(|err| match err {
            Error::InterfaceNotFound { name, .. } => Error::InterfaceNotFound {
                name,
                netns: self
                    .config
                    .link_in_container
                    .then(|| netns.path()),
            },
            other => other,
        })
    }

    /// Create the VLAN link and land it in the target namespace under the
    /// requested name.
    async fn create_vlan(
        &self,
        host: &Netlink,
        netns: &NetNs,
        master: &LinkDetails,
    ) -> Result<Interface> {
        // The kernel instantiates new links in the creating socket's
        // namespace before moving them, so the requested name could clash
        // with an existing host interface. Create under a random
        // temporary name and rename after the move.
        let tmp_name = self.free_tmp_name(host).await?;

        let created = if self.config.link_in_container {
            let ns_netlink = Netlink::connect_in(netns)?;
            ns_netlink
                .add_vlan(
                    &tmp_name,
                    master.index,
                    self.config.vlan_id,
                    self.config.mtu_override(),
                    Some(netns.fd()),
                )
                .await
        } else {
            host.add_vlan(
                &tmp_name,
                master.index,
                self.config.vlan_id,
                self.config.mtu_override(),
                Some(netns.fd()),
            )
            .await
        };
        created.map_err(|err| match err {
            Error::Netlink(e) => Error::LinkCreate {
                master: self.config.master.clone(),
                reason: e.to_string(),
            },
            other => other,
        })?;
        info!(
            tmp_name = %tmp_name,
            master = %self.config.master,
            vlan_id = self.config.vlan_id,
            "created vlan link in target netns"
        );

        let ns_netlink = Netlink::connect_in(netns)?;
        let tmp_link = ns_netlink.link_by_name(&tmp_name).await?;
        ns_netlink.rename(tmp_link.index, &self.args.ifname).await?;
        info!(ifname = %self.args.ifname, "renamed vlan link");

        // Re-read after the rename: the MAC is assigned at creation time
        // and only visible now.
        let vlan_link = ns_netlink.link_by_name(&self.args.ifname).await?;
        Ok(Interface {
            name: self.args.ifname.clone(),
            mac: vlan_link.mac,
            sandbox: Some(netns.path()),
        })
    }

    /// Pick a random temporary name that is free in the host namespace.
    async fn free_tmp_name(&self, host: &Netlink) -> Result<String> {
        for _ in 0..3 {
            let candidate = random_link_name();
            match host.link_by_name(&candidate).await {
                Err(Error::InterfaceNotFound { .. }) => return Ok(candidate),
                Ok(_) => continue,
                Err(err) => return Err(err),
            }
        }
        Err(Error::LinkCreate {
            master: self.config.master.clone(),
            reason: "failed to find a free temporary link name".to_string(),
        })
    }

    async fn validate_container_interface(
        &self,
        ns_netlink: &Netlink,
        recorded: &Interface,
    ) -> Result<()> {
        if recorded.name.is_empty() {
            return Err(Error::Verification(
                "container interface name missing in prevResult".to_string(),
            ));
        }
        if recorded.sandbox.as_deref().unwrap_or("").is_empty() {
            return Err(Error::Verification(format!(
                "container interface {} should not be in the host namespace",
                recorded.name
            )));
        }

        let link = ns_netlink
            .link_by_name(&recorded.name)
            .await
            .map_err(|_| {
                Error::Verification(format!(
                    "container interface {} from prevResult not found",
                    recorded.name
                ))
            })?;

        if !link.is_vlan {
            return Err(Error::Verification(format!(
                "container interface {} is not of type vlan",
                recorded.name
            )));
        }
        if link.vlan_id != Some(self.config.vlan_id) {
            return Err(Error::Verification(format!(
                "interface {} vlan id is {:?}, configured value is {}",
                recorded.name, link.vlan_id, self.config.vlan_id
            )));
        }
        if let Some(mac) = &recorded.mac {
            if link.mac.as_ref() != Some(mac) {
                return Err(Error::Verification(format!(
                    "interface {} mac {} doesn't match recorded mac {}",
                    recorded.name,
                    link.mac.as_deref().unwrap_or("<none>"),
                    mac
                )));
            }
        }
        if let Some(mtu) = self.config.mtu_override() {
            if link.mtu != mtu {
                return Err(Error::Verification(format!(
                    "interface {} mtu is {}, configured value is {}",
                    recorded.name, link.mtu, mtu
                )));
            }
        }
        Ok(())
    }

    async fn validate_addresses(&self, ns_netlink: &Netlink, prev: &CniResult) -> Result<()> {
        let expected = match &prev.ips {
            Some(ips) if !ips.is_empty() => ips,
            _ => return Ok(()),
        };
        let link = ns_netlink.link_by_name(&self.args.ifname).await?;
        let assigned = ns_netlink.addresses(link.index).await?;
        for ipc in expected {
            let want = ipam::parse_cidr(&ipc.address)?;
            if !assigned.contains(&want) {
                return Err(Error::Verification(format!(
                    "address {} from prevResult not assigned to {}",
                    ipc.address, self.args.ifname
                )));
            }
        }
        Ok(())
    }

    async fn validate_routes(&self, ns_netlink: &Netlink, prev: &CniResult) -> Result<()> {
        let expected = match &prev.routes {
            Some(routes) if !routes.is_empty() => routes,
            _ => return Ok(()),
        };
        let mut table = ns_netlink.routes(IpVersion::V4).await?;
        table.extend(ns_netlink.routes(IpVersion::V6).await?);
        for route in expected {
            let dst = ipam::parse_cidr(&route.dst)?;
            let gateway = route.gw.as_deref().map(ipam::parse_gateway).transpose()?;
            let found = table.iter().any(|entry| {
                entry.dst == dst && (gateway.is_none() || entry.gateway == gateway)
            });
            if !found {
                return Err(Error::Verification(format!(
                    "route to {} from prevResult not present",
                    route.dst
                )));
            }
        }
        Ok(())
    }

    fn result_version(&self) -> String {
        if self.config.cni_version.is_empty() {
            "1.0.0".to_string()
        } else {
            self.config.cni_version.clone()
        }
    }
}

/// Random name for the creation-time link, always distinct from the final
/// name and short enough for IFNAMSIZ.
fn random_link_name() -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("vlan{}", &suffix[..11])
}

/// Locate the descriptor recorded for this attachment in the previous
/// result: name and sandbox must both match the current invocation.
fn find_prev_interface(prev: &CniResult, ifname: &str, netns: &str) -> Option<Interface> {
    prev.interfaces
        .iter()
        .flatten()
        .find(|intf| intf.name == ifname && intf.sandbox.as_deref() == Some(netns))
        .cloned()
}
