//! Normalized, queryable form of a declarative network configuration.
//!
//! Both version 1 (a list of typed entries) and version 2 (maps of
//! ethernets, bonds, bridges, and vlans keyed by name) documents are
//! accepted, optionally wrapped in a top-level `network` key.

use std::collections::BTreeMap;
use std::net::Ipv4Addr;

use serde::Deserialize;
use serde_json::Value;

use crate::error::{Error, Result};

pub type Document = Value;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InterfaceKind {
    Physical,
    Bond,
    Bridge,
    Vlan,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubnetKind {
    Dhcp4,
    Dhcp6,
    Static,
    Static6,
    Manual,
}

impl SubnetKind {
    fn parse(value: &str) -> Result<Self> {
        match value {
            "dhcp" | "dhcp4" => Ok(SubnetKind::Dhcp4),
            "dhcp6" => Ok(SubnetKind::Dhcp6),
            "static" => Ok(SubnetKind::Static),
            "static6" => Ok(SubnetKind::Static6),
            "manual" => Ok(SubnetKind::Manual),
            other => Err(Error::ConfigParse(format!("unknown subnet type {}", other))),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Route {
    pub network: String,
    pub netmask: String,
    pub gateway: String,
    pub metric: Option<u32>,
}

impl Route {
    pub fn is_default(&self) -> bool {
        self.network == "0.0.0.0"
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Dns {
    pub nameservers: Vec<String>,
    pub search: Vec<String>,
}

impl Dns {
    fn extend(&mut self, nameservers: &[String], search: &[String]) {
        for ns in nameservers {
            if !self.nameservers.contains(ns) {
                self.nameservers.push(ns.clone());
            }
        }
        for domain in search {
            if !self.search.contains(domain) {
                self.search.push(domain.clone());
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Subnet {
    pub kind: SubnetKind,
    pub address: Option<String>,
    pub netmask: Option<String>,
    pub gateway: Option<String>,
    pub routes: Vec<Route>,
}

impl Subnet {
    fn new(kind: SubnetKind) -> Self {
        Self {
            kind,
            address: None,
            netmask: None,
            gateway: None,
            routes: Vec::new(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct InterfaceRecord {
    pub name: Option<String>,
    pub mac_address: Option<String>,
    pub kind: InterfaceKind,
    pub subnets: Vec<Subnet>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct NetworkState {
    version: u32,
    interfaces: Vec<InterfaceRecord>,
    routes: Vec<Route>,
    dns: Dns,
}

impl NetworkState {
    pub fn parse(document: &Document) -> Result<Self> {
        let root = match document.get("network") {
            Some(inner) if inner.is_object() => inner,
            _ => document,
        };
        if !root.is_object() {
            return Err(Error::ConfigParse(
                "network config must be a mapping".into(),
            ));
        }
        let version = root
            .get("version")
            .and_then(Value::as_u64)
            .ok_or_else(|| Error::ConfigParse("missing network config version".into()))?;
        match version {
            1 => parse_v1(root),
            2 => parse_v2(root),
            v => Err(Error::ConfigParse(format!(
                "unknown network config version {}",
                v
            ))),
        }
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn iter_interfaces(&self) -> impl Iterator<Item = &InterfaceRecord> {
        self.interfaces.iter()
    }

    /// Global routes followed by routes attached to static subnets, including
    /// a default route for each IPv4 subnet gateway.
    pub fn iter_routes(&self) -> impl Iterator<Item = Route> + '_ {
        let subnet_routes = self
            .interfaces
            .iter()
            .flat_map(|iface| iface.subnets.iter())
            .filter(|subnet| subnet.kind == SubnetKind::Static)
            .flat_map(|subnet| {
                let default = subnet
                    .gateway
                    .as_ref()
                    .filter(|gw| gw.parse::<Ipv4Addr>().is_ok())
                    .map(|gw| default_route(gw.clone(), None));
                default.into_iter().chain(subnet.routes.iter().cloned())
            });
        self.routes.iter().cloned().chain(subnet_routes)
    }

    pub fn dns(&self) -> &Dns {
        &self.dns
    }
}

fn parse_err(e: serde_json::Error) -> Error {
    Error::ConfigParse(e.to_string())
}

fn prefix_to_netmask(prefix: u8) -> Result<String> {
    if prefix > 32 {
        return Err(Error::ConfigParse(format!(
            "invalid IPv4 prefix length {}",
            prefix
        )));
    }
    let bits = if prefix == 0 {
        0
    } else {
        u32::MAX << (32 - prefix)
    };
    Ok(Ipv4Addr::from(bits).to_string())
}

// Split "10.0.0.5/24" into ("10.0.0.5", Some("255.255.255.0")). IPv6 prefixes
// are dropped since no renderer expresses them as a netmask.
fn split_cidr(address: &str) -> Result<(String, Option<String>)> {
    let Some((addr, prefix)) = address.split_once('/') else {
        return Ok((address.to_string(), None));
    };
    let prefix: u8 = prefix
        .parse()
        .map_err(|_| Error::ConfigParse(format!("invalid address {}", address)))?;
    if addr.contains(':') {
        return Ok((addr.to_string(), None));
    }
    addr.parse::<Ipv4Addr>()
        .map_err(|_| Error::ConfigParse(format!("invalid address {}", address)))?;
    Ok((addr.to_string(), Some(prefix_to_netmask(prefix)?)))
}

fn default_route(gateway: String, metric: Option<u32>) -> Route {
    Route {
        network: "0.0.0.0".into(),
        netmask: "0.0.0.0".into(),
        gateway,
        metric,
    }
}

// Version 1.

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum V1Entry {
    Physical(V1Interface),
    Bond(V1Interface),
    Bridge(V1Interface),
    Vlan(V1Interface),
    Nameserver(V1Nameserver),
    Route(V1Route),
}

#[derive(Deserialize)]
struct V1Interface {
    name: String,
    mac_address: Option<String>,
    #[serde(default)]
    subnets: Vec<V1Subnet>,
}

#[derive(Deserialize)]
struct V1Subnet {
    #[serde(rename = "type")]
    kind: String,
    address: Option<String>,
    netmask: Option<String>,
    gateway: Option<String>,
    #[serde(default)]
    routes: Vec<V1Route>,
    #[serde(default)]
    dns_nameservers: Vec<String>,
    #[serde(default)]
    dns_search: Vec<String>,
}

#[derive(Deserialize)]
struct V1Nameserver {
    #[serde(default)]
    address: Vec<String>,
    #[serde(default)]
    search: Vec<String>,
}

#[derive(Deserialize)]
struct V1Route {
    network: Option<String>,
    destination: Option<String>,
    netmask: Option<String>,
    gateway: String,
    metric: Option<u32>,
}

impl V1Route {
    fn normalize(self) -> Result<Route> {
        let target = self
            .network
            .or(self.destination)
            .ok_or_else(|| Error::ConfigParse("route without network".into()))?;
        let (network, cidr_mask) = split_cidr(&target)?;
        let netmask = self
            .netmask
            .or(cidr_mask)
            .unwrap_or_else(|| "255.255.255.255".into());
        Ok(Route {
            network,
            netmask,
            gateway: self.gateway,
            metric: self.metric,
        })
    }
}

#[derive(Deserialize)]
struct V1Document {
    #[serde(default)]
    config: Vec<V1Entry>,
}

fn parse_v1(root: &Value) -> Result<NetworkState> {
    let document: V1Document = serde_json::from_value(root.clone()).map_err(parse_err)?;
    let mut state = NetworkState {
        version: 1,
        ..Default::default()
    };
    for entry in document.config {
        let (kind, iface) = match entry {
            V1Entry::Physical(i) => (InterfaceKind::Physical, i),
            V1Entry::Bond(i) => (InterfaceKind::Bond, i),
            V1Entry::Bridge(i) => (InterfaceKind::Bridge, i),
            V1Entry::Vlan(i) => (InterfaceKind::Vlan, i),
            V1Entry::Nameserver(ns) => {
                state.dns.extend(&ns.address, &ns.search);
                continue;
            }
            V1Entry::Route(route) => {
                state.routes.push(route.normalize()?);
                continue;
            }
        };
        let mut subnets = Vec::with_capacity(iface.subnets.len());
        for raw in iface.subnets {
            state.dns.extend(&raw.dns_nameservers, &raw.dns_search);
            let mut subnet = Subnet::new(SubnetKind::parse(&raw.kind)?);
            if let Some(address) = raw.address {
                let (address, cidr_mask) = split_cidr(&address)?;
                subnet.address = Some(address);
                subnet.netmask = raw.netmask.or(cidr_mask);
            }
            subnet.gateway = raw.gateway;
            subnet.routes = raw
                .routes
                .into_iter()
                .map(V1Route::normalize)
                .collect::<Result<_>>()?;
            subnets.push(subnet);
        }
        state.interfaces.push(InterfaceRecord {
            name: Some(iface.name),
            mac_address: iface.mac_address,
            kind,
            subnets,
        });
    }
    Ok(state)
}

// Version 2.

#[derive(Default, Deserialize)]
struct V2Match {
    macaddress: Option<String>,
}

#[derive(Default, Deserialize)]
struct V2Nameservers {
    #[serde(default)]
    addresses: Vec<String>,
    #[serde(default)]
    search: Vec<String>,
}

#[derive(Deserialize)]
struct V2Route {
    to: String,
    via: String,
    metric: Option<u32>,
}

#[derive(Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct V2Device {
    #[serde(rename = "match")]
    matches: Option<V2Match>,
    macaddress: Option<String>,
    set_name: Option<String>,
    dhcp4: Option<bool>,
    dhcp6: Option<bool>,
    #[serde(default)]
    addresses: Vec<String>,
    gateway4: Option<String>,
    nameservers: Option<V2Nameservers>,
    #[serde(default)]
    routes: Vec<V2Route>,
}

#[derive(Deserialize)]
struct V2Document {
    #[serde(default)]
    ethernets: BTreeMap<String, V2Device>,
    #[serde(default)]
    bonds: BTreeMap<String, V2Device>,
    #[serde(default)]
    bridges: BTreeMap<String, V2Device>,
    #[serde(default)]
    vlans: BTreeMap<String, V2Device>,
}

fn v2_interface(
    key: String,
    device: V2Device,
    kind: InterfaceKind,
    dns: &mut Dns,
) -> Result<InterfaceRecord> {
    let mac_address = device
        .matches
        .and_then(|m| m.macaddress)
        .or(device.macaddress);
    let mut subnets = Vec::new();
    if device.dhcp4.unwrap_or(false) {
        subnets.push(Subnet::new(SubnetKind::Dhcp4));
    }
    if device.dhcp6.unwrap_or(false) {
        subnets.push(Subnet::new(SubnetKind::Dhcp6));
    }
    let mut gateway4 = device.gateway4;
    for address in &device.addresses {
        let (address, netmask) = split_cidr(address)?;
        let kind = if address.contains(':') {
            SubnetKind::Static6
        } else {
            SubnetKind::Static
        };
        let mut subnet = Subnet::new(kind);
        subnet.address = Some(address);
        subnet.netmask = netmask;
        if kind == SubnetKind::Static {
            subnet.gateway = gateway4.take();
        }
        subnets.push(subnet);
    }
    let routes = device
        .routes
        .into_iter()
        .map(|r| {
            if r.to == "default" || r.to == "0.0.0.0/0" {
                return Ok(default_route(r.via, r.metric));
            }
            let (network, netmask) = split_cidr(&r.to)?;
            Ok(Route {
                network,
                netmask: netmask.unwrap_or_else(|| "255.255.255.255".into()),
                gateway: r.via,
                metric: r.metric,
            })
        })
        .collect::<Result<Vec<_>>>()?;
    match subnets.iter_mut().find(|s| s.kind == SubnetKind::Static) {
        Some(subnet) => subnet.routes = routes,
        None if !routes.is_empty() => {
            let mut manual = Subnet::new(SubnetKind::Static);
            manual.routes = routes;
            subnets.push(manual);
        }
        None => (),
    }
    if let Some(ns) = device.nameservers {
        dns.extend(&ns.addresses, &ns.search);
    }
    Ok(InterfaceRecord {
        name: Some(device.set_name.unwrap_or(key)),
        mac_address,
        kind,
        subnets,
    })
}

fn parse_v2(root: &Value) -> Result<NetworkState> {
    let document: V2Document = serde_json::from_value(root.clone()).map_err(parse_err)?;
    let mut state = NetworkState {
        version: 2,
        ..Default::default()
    };
    let groups = [
        (document.ethernets, InterfaceKind::Physical),
        (document.bonds, InterfaceKind::Bond),
        (document.bridges, InterfaceKind::Bridge),
        (document.vlans, InterfaceKind::Vlan),
    ];
    for (devices, kind) in groups {
        for (key, device) in devices {
            let record = v2_interface(key, device, kind, &mut state.dns)?;
            state.interfaces.push(record);
        }
    }
    Ok(state)
}
