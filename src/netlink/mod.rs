use futures::TryStreamExt;
use ipnetwork::IpNetwork;
use netlink_packet_route::address::{AddressAttribute, AddressMessage};
use netlink_packet_route::link::{InfoData, InfoKind, InfoVlan, LinkAttribute, LinkInfo, LinkMessage};
use netlink_packet_route::route::{RouteAddress, RouteAttribute, RouteMessage};
use rtnetlink::{new_connection, Handle, IpVersion};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::os::unix::io::RawFd;
use tracing::debug;

use crate::error::{Error, Result};
use crate::netns::NetNs;

/// Attributes of a resolved link, as reported by the kernel.
#[derive(Debug, Clone)]
pub struct LinkDetails {
    pub index: u32,
    pub name: String,
    pub mtu: u32,
    pub mac: Option<String>,
    pub is_vlan: bool,
    pub vlan_id: Option<u16>,
}

/// One route from the kernel's table.
#[derive(Debug, Clone)]
pub struct RouteEntry {
    pub dst: IpNetwork,
    pub gateway: Option<IpAddr>,
}

/// Handle to a route netlink socket.
///
/// A netlink socket stays bound to the namespace it was opened in, so
/// per-namespace operations go through a handle from [`Netlink::connect_in`].
pub struct Netlink {
    handle: Handle,
}

impl Netlink {
    /// Connect in the calling thread's current namespace.
    /// Must run inside the tokio runtime; the connection task is spawned
    /// onto it.
    pub fn connect() -> Result<Self> {
        let (connection, handle, _) = new_connection()?;
        tokio::spawn(connection);
        Ok(Self { handle })
    }

    /// Connect with the socket bound to the given namespace.
    pub fn connect_in(netns: &NetNs) -> Result<Self> {
        netns.run(Self::connect)
    }

    /// Look up a link by name.
    pub async fn link_by_name(&self, name: &str) -> Result<LinkDetails> {
        let mut links = self
            .handle
            .link()
            .get()
            .match_name(name.to_string())
            .execute();
        match links.try_next().await {
            Ok(Some(msg)) => Ok(link_details(name, &msg)),
            Ok(None) => Err(Error::InterfaceNotFound {
                name: name.to_string(),
                netns: None,
            }),
            Err(err) if errno_of(&err) == Some(-libc::ENODEV) => Err(Error::InterfaceNotFound {
                name: name.to_string(),
                netns: None,
            }),
            Err(err) => Err(err.into()),
        }
    }

    /// Create a VLAN link on `parent` with the given tag.
    ///
    /// The kernel instantiates the link in the socket's namespace first;
    /// setting `netns_fd` makes it land in the target namespace in the
    /// same request, so no window exists where the final name could clash
    /// on the host.
    pub async fn add_vlan(
        &self,
        name: &str,
        parent_index: u32,
        vlan_id: u16,
        mtu: Option<u32>,
        netns_fd: Option<RawFd>,
    ) -> Result<()> {
        let mut request = self
            .handle
            .link()
            .add()
            .vlan(name.to_string(), parent_index, vlan_id);
        if let Some(mtu) = mtu {
            request.message_mut().attributes.push(LinkAttribute::Mtu(mtu));
        }
        if let Some(fd) = netns_fd {
            request
                .message_mut()
                .attributes
                .push(LinkAttribute::NetNsFd(fd));
        }
        debug!(name, parent_index, vlan_id, "creating vlan link");
        request.execute().await?;
        Ok(())
    }

    /// Rename a link. The kernel answers EEXIST when the target name is
    /// already taken in this namespace.
    pub async fn rename(&self, index: u32, new_name: &str) -> Result<()> {
        self.handle
            .link()
            .set(index)
            .name(new_name.to_string())
            .execute()
            .await
            .map_err(|err| {
                let reason = if errno_of(&err) == Some(-libc::EEXIST) {
                    "name already in use".to_string()
                } else {
                    err.to_string()
                };
                Error::Rename {
                    name: new_name.to_string(),
                    reason,
                }
            })
    }

    /// Delete a link by name. Returns false when the link was already
    /// gone, which callers on the teardown path treat as success.
    pub async fn del_by_name(&self, name: &str) -> Result<bool> {
        let details = match self.link_by_name(name).await {
            Ok(details) => details,
            Err(Error::InterfaceNotFound { .. }) => return Ok(false),
            Err(err) => return Err(err),
        };
        match self.handle.link().del(details.index).execute().await {
            Ok(()) => Ok(true),
            Err(err)
                if matches!(errno_of(&err), Some(code) if code == -libc::ENODEV || code == -libc::ENOENT) =>
            {
                Ok(false)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Bring a link up.
    pub async fn set_up(&self, index: u32) -> Result<()> {
        self.handle.link().set(index).up().execute().await?;
        Ok(())
    }

    /// Assign an address to a link.
    pub async fn add_address(&self, index: u32, address: IpNetwork) -> Result<()> {
        self.handle
            .address()
            .add(index, address.ip(), address.prefix())
            .execute()
            .await?;
        Ok(())
    }

    /// Addresses currently assigned to a link.
    pub async fn addresses(&self, index: u32) -> Result<Vec<IpNetwork>> {
        let mut out = Vec::new();
        let mut messages = self
            .handle
            .address()
            .get()
            .set_link_index_filter(index)
            .execute();
        while let Some(msg) = messages.try_next().await? {
            if let Some(net) = address_of(&msg) {
                out.push(net);
            }
        }
        Ok(out)
    }

    /// Add a route through a link, optionally via a gateway.
    pub async fn add_route(
        &self,
        dst: IpNetwork,
        gateway: Option<IpAddr>,
        out_index: u32,
    ) -> Result<()> {
        match (dst, gateway) {
            (IpNetwork::V4(net), Some(IpAddr::V4(gw))) => {
                self.handle
                    .route()
                    .add()
                    .v4()
                    .destination_prefix(net.ip(), net.prefix())
                    .output_interface(out_index)
                    .gateway(gw)
                    .execute()
                    .await?
            }
            (IpNetwork::V4(net), None) => {
                self.handle
                    .route()
                    .add()
                    .v4()
                    .destination_prefix(net.ip(), net.prefix())
                    .output_interface(out_index)
                    .execute()
                    .await?
            }
            (IpNetwork::V6(net), Some(IpAddr::V6(gw))) => {
                self.handle
                    .route()
                    .add()
                    .v6()
                    .destination_prefix(net.ip(), net.prefix())
                    .output_interface(out_index)
                    .gateway(gw)
                    .execute()
                    .await?
            }
            (IpNetwork::V6(net), None) => {
                self.handle
                    .route()
                    .add()
                    .v6()
                    .destination_prefix(net.ip(), net.prefix())
                    .output_interface(out_index)
                    .execute()
                    .await?
            }
            (dst, Some(gw)) => {
                return Err(Error::Config(format!(
                    "route {dst} and gateway {gw} have mismatched address families"
                )))
            }
        }
        Ok(())
    }

    /// Dump the routing table for one address family.
    pub async fn routes(&self, ip_version: IpVersion) -> Result<Vec<RouteEntry>> {
        let default: IpAddr = match ip_version {
            IpVersion::V4 => Ipv4Addr::UNSPECIFIED.into(),
            IpVersion::V6 => Ipv6Addr::UNSPECIFIED.into(),
        };
        let mut out = Vec::new();
        let mut messages = self.handle.route().get(ip_version).execute();
        while let Some(msg) = messages.try_next().await? {
            if let Some(entry) = route_entry(&msg, default) {
                out.push(entry);
            }
        }
        Ok(out)
    }
}

fn errno_of(err: &rtnetlink::Error) -> Option<i32> {
    match err {
        rtnetlink::Error::NetlinkError(e) => Some(e.raw_code()),
        _ => None,
    }
}

fn link_details(name: &str, msg: &LinkMessage) -> LinkDetails {
    let mut details = LinkDetails {
        index: msg.header.index,
        name: name.to_string(),
        mtu: 0,
        mac: None,
        is_vlan: false,
        vlan_id: None,
    };
    for attr in &msg.attributes {
        match attr {
            LinkAttribute::IfName(n) => details.name = n.clone(),
            LinkAttribute::Mtu(mtu) => details.mtu = *mtu,
            LinkAttribute::Address(bytes) => details.mac = Some(format_mac(bytes)),
            LinkAttribute::LinkInfo(infos) => {
                for info in infos {
                    match info {
                        LinkInfo::Kind(InfoKind::Vlan) => details.is_vlan = true,
                        LinkInfo::Data(InfoData::Vlan(vlan)) => {
                            for v in vlan {
                                if let InfoVlan::Id(id) = v {
                                    details.vlan_id = Some(*id);
                                }
                            }
                        }
                        _ => {}
                    }
                }
            }
            _ => {}
        }
    }
    details
}

fn address_of(msg: &AddressMessage) -> Option<IpNetwork> {
    let mut address = None;
    let mut local = None;
    for attr in &msg.attributes {
        match attr {
            AddressAttribute::Address(ip) => address = Some(*ip),
            AddressAttribute::Local(ip) => local = Some(*ip),
            _ => {}
        }
    }
    // IFA_LOCAL is the interface address; IFA_ADDRESS is the peer on
    // point-to-point links.
    let ip = local.or(address)?;
    IpNetwork::new(ip, msg.header.prefix_len).ok()
}

fn route_entry(msg: &RouteMessage, default: IpAddr) -> Option<RouteEntry> {
    let mut dst_ip = None;
    let mut gateway = None;
    for attr in &msg.attributes {
        match attr {
            RouteAttribute::Destination(addr) => dst_ip = route_address(addr),
            RouteAttribute::Gateway(addr) => gateway = route_address(addr),
            _ => {}
        }
    }
    let prefix = msg.header.destination_prefix_length;
    let dst = IpNetwork::new(dst_ip.unwrap_or(default), prefix).ok()?;
    Some(RouteEntry { dst, gateway })
}

fn route_address(addr: &RouteAddress) -> Option<IpAddr> {
    match addr {
        RouteAddress::Inet(ip) => Some(IpAddr::V4(*ip)),
        RouteAddress::Inet6(ip) => Some(IpAddr::V6(*ip)),
        _ => None,
    }
}

fn format_mac(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(":")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_hardware_addresses() {
        assert_eq!(
            format_mac(&[0x02, 0x42, 0xac, 0x11, 0x00, 0x02]),
            "02:42:ac:11:00:02"
        );
    }

    #[test]
    fn extracts_vlan_details_from_a_link_message() {
        let mut msg = LinkMessage::default();
        msg.header.index = 7;
        msg.attributes.push(LinkAttribute::IfName("eth0".to_string()));
        msg.attributes.push(LinkAttribute::Mtu(1500));
        msg.attributes
            .push(LinkAttribute::Address(vec![0, 1, 2, 3, 4, 5]));
        msg.attributes.push(LinkAttribute::LinkInfo(vec![
            LinkInfo::Kind(InfoKind::Vlan),
            LinkInfo::Data(InfoData::Vlan(vec![InfoVlan::Id(100)])),
        ]));

        let details = link_details("eth0", &msg);
        assert_eq!(details.index, 7);
        assert_eq!(details.mtu, 1500);
        assert_eq!(details.mac.as_deref(), Some("00:01:02:03:04:05"));
        assert!(details.is_vlan);
        assert_eq!(details.vlan_id, Some(100));
    }

    #[test]
    fn non_vlan_links_report_no_tag() {
        let mut msg = LinkMessage::default();
        msg.attributes.push(LinkAttribute::IfName("eth0".to_string()));
        let details = link_details("eth0", &msg);
        assert!(!details.is_vlan);
        assert_eq!(details.vlan_id, None);
    }

    #[test]
    fn default_route_message_maps_to_zero_prefix() {
        let msg = RouteMessage::default();
        let entry = route_entry(&msg, Ipv4Addr::UNSPECIFIED.into()).unwrap();
        assert_eq!(entry.dst.to_string(), "0.0.0.0/0");
        assert!(entry.gateway.is_none());
    }
}
