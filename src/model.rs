//! Declarative network entities and the aggregate desired-state document.
//!
//! Every entity exposes an identity key through [`NetworkEntity`]; diffs
//! remove entities by that key alone.

use hickory_proto::rr::{DNSClass, Name};
use ipnetwork::Ipv6Network;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use crate::error::EntityError;

/// Default TTL for DNS records, in seconds.
pub const DEFAULT_TTL: u32 = 3600;

/// Anything that participates in the declarative document.
pub trait NetworkEntity {
    /// Category name, used in logs and errors.
    const KIND: &'static str;

    /// Identity key used for diffing.
    fn key(&self) -> &str;
}

fn check_key(kind: &'static str, key: &str) -> Result<(), EntityError> {
    if key.is_empty() || key.chars().any(char::is_whitespace) {
        return Err(EntityError::InvalidKey {
            kind,
            key: key.to_string(),
        });
    }
    Ok(())
}

fn check_label(kind: &'static str, label: &str) -> Result<(), EntityError> {
    check_key(kind, label)?;
    let invalid = || EntityError::InvalidKey {
        kind,
        key: label.to_string(),
    };
    // the root name is never served from the document
    if normalize_name(label).is_empty() {
        return Err(invalid());
    }
    Name::from_ascii(label).map_err(|_| invalid())?;
    Ok(())
}

fn parse_addr<A: std::str::FromStr>(
    kind: &'static str,
    key: &str,
    value: &str,
) -> Result<A, EntityError> {
    value.parse().map_err(|_| EntityError::InvalidAddress {
        kind,
        key: key.to_string(),
        value: value.to_string(),
    })
}

/// A dummy interface carrying one or more addresses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "InterfaceDeser")]
pub struct Interface {
    /// Interface name.
    pub name: String,
    /// Addresses, in configuration order.
    pub addrs: Vec<IpAddr>,
}

impl Interface {
    /// Build an interface from address strings.
    pub fn parse(name: &str, addrs: &[&str]) -> Result<Self, EntityError> {
        check_key(Self::KIND, name)?;
        let addrs = addrs
            .iter()
            .map(|a| parse_addr(Self::KIND, name, a))
            .collect::<Result<_, _>>()?;
        Ok(Self {
            name: name.to_string(),
            addrs,
        })
    }
}

/// Shadow of [`Interface`] so deserialized input still has its key checked.
#[derive(Deserialize)]
struct InterfaceDeser {
    name: String,
    addrs: Vec<IpAddr>,
}

impl TryFrom<InterfaceDeser> for Interface {
    type Error = EntityError;

    fn try_from(raw: InterfaceDeser) -> Result<Self, Self::Error> {
        check_key(Self::KIND, &raw.name)?;
        Ok(Self {
            name: raw.name,
            addrs: raw.addrs,
        })
    }
}

impl NetworkEntity for Interface {
    const KIND: &'static str = "interface";

    fn key(&self) -> &str {
        &self.name
    }
}

fn default_ttl() -> u32 {
    DEFAULT_TTL
}

/// An AAAA record served directly from the document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "DnsRecordDeser")]
pub struct DnsRecord {
    /// Owner name, e.g. `foo.bar`.
    pub label: String,
    /// Addresses returned for the label.
    pub addrs: Vec<Ipv6Addr>,
    /// Only return addresses inside the instance subnet.
    pub localize: bool,
    /// Record TTL in seconds.
    pub ttl: u32,
}

/// Shadow of [`DnsRecord`]; the label must be a usable DNS name.
#[derive(Deserialize)]
struct DnsRecordDeser {
    label: String,
    addrs: Vec<Ipv6Addr>,
    #[serde(default)]
    localize: bool,
    #[serde(default = "default_ttl")]
    ttl: u32,
}

impl TryFrom<DnsRecordDeser> for DnsRecord {
    type Error = EntityError;

    fn try_from(raw: DnsRecordDeser) -> Result<Self, Self::Error> {
        check_label(Self::KIND, &raw.label)?;
        Ok(Self {
            label: raw.label,
            addrs: raw.addrs,
            localize: raw.localize,
            ttl: raw.ttl,
        })
    }
}

impl DnsRecord {
    /// Build a record with the default TTL.
    pub fn parse(label: &str, addrs: &[&str], localize: bool) -> Result<Self, EntityError> {
        check_label(Self::KIND, label)?;
        let addrs = addrs
            .iter()
            .map(|a| parse_addr(Self::KIND, label, a))
            .collect::<Result<_, _>>()?;
        Ok(Self {
            label: label.to_string(),
            addrs,
            localize,
            ttl: DEFAULT_TTL,
        })
    }

    /// Lookup form of the label: lower-cased, without the trailing dot.
    pub fn normalized_label(&self) -> String {
        normalize_name(&self.label)
    }

    /// Wire-format owner name.
    pub fn dns_name(&self) -> Result<Name, hickory_proto::ProtoError> {
        Name::from_ascii(&self.label)
    }

    /// Records are always class IN.
    pub fn dns_class(&self) -> DNSClass {
        DNSClass::IN
    }

    /// TTL in seconds.
    pub fn ttl(&self) -> u32 {
        self.ttl
    }
}

impl NetworkEntity for DnsRecord {
    const KIND: &'static str = "dns record";

    fn key(&self) -> &str {
        &self.label
    }
}

/// Normalize a queried or configured name for index lookups.
pub fn normalize_name(name: &str) -> String {
    name.trim_end_matches('.').to_ascii_lowercase()
}

/// One entrypoint address fanned out to several endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "NatFanDeser")]
pub struct NatFan {
    /// Fan name.
    pub name: String,
    /// Address clients connect to.
    pub entrypoint: Ipv6Addr,
    /// Addresses traffic is spread across.
    pub endpoints: Vec<Ipv6Addr>,
}

impl NatFan {
    /// Build a NAT fan from address strings.
    pub fn parse(name: &str, entrypoint: &str, endpoints: &[&str]) -> Result<Self, EntityError> {
        check_key(Self::KIND, name)?;
        Ok(Self {
            name: name.to_string(),
            entrypoint: parse_addr(Self::KIND, name, entrypoint)?,
            endpoints: endpoints
                .iter()
                .map(|a| parse_addr(Self::KIND, name, a))
                .collect::<Result<_, _>>()?,
        })
    }
}

#[derive(Deserialize)]
struct NatFanDeser {
    name: String,
    entrypoint: Ipv6Addr,
    endpoints: Vec<Ipv6Addr>,
}

impl TryFrom<NatFanDeser> for NatFan {
    type Error = EntityError;

    fn try_from(raw: NatFanDeser) -> Result<Self, Self::Error> {
        check_key(Self::KIND, &raw.name)?;
        Ok(Self {
            name: raw.name,
            entrypoint: raw.entrypoint,
            endpoints: raw.endpoints,
        })
    }
}

impl NetworkEntity for NatFan {
    const KIND: &'static str = "natfan";

    fn key(&self) -> &str {
        &self.name
    }
}

/// A 6-in-4 tunnel between two IPv4 endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "TunnelDeser")]
pub struct Tunnel {
    /// Tunnel name.
    pub name: String,
    /// Local IPv4 endpoint.
    pub local: Ipv4Addr,
    /// Remote IPv4 endpoint.
    pub remote: Ipv4Addr,
    /// IPv6 address on the tunnel device.
    pub addr: Ipv6Addr,
    /// IPv6 subnet routed through the tunnel.
    pub remote_subnet: Ipv6Network,
}

impl Tunnel {
    /// Build a tunnel from address strings. `remote_subnet` is `addr/len`.
    pub fn parse(
        name: &str,
        local: &str,
        remote: &str,
        addr: &str,
        remote_subnet: &str,
    ) -> Result<Self, EntityError> {
        check_key(Self::KIND, name)?;
        let remote_subnet = remote_subnet
            .parse()
            .map_err(|_| EntityError::InvalidSubnet {
                key: name.to_string(),
                value: remote_subnet.to_string(),
            })?;
        Ok(Self {
            name: name.to_string(),
            local: parse_addr(Self::KIND, name, local)?,
            remote: parse_addr(Self::KIND, name, remote)?,
            addr: parse_addr(Self::KIND, name, addr)?,
            remote_subnet,
        })
    }
}

#[derive(Deserialize)]
struct TunnelDeser {
    name: String,
    local: Ipv4Addr,
    remote: Ipv4Addr,
    addr: Ipv6Addr,
    remote_subnet: Ipv6Network,
}

impl TryFrom<TunnelDeser> for Tunnel {
    type Error = EntityError;

    fn try_from(raw: TunnelDeser) -> Result<Self, Self::Error> {
        check_key(Self::KIND, &raw.name)?;
        Ok(Self {
            name: raw.name,
            local: raw.local,
            remote: raw.remote,
            addr: raw.addr,
            remote_subnet: raw.remote_subnet,
        })
    }
}

impl NetworkEntity for Tunnel {
    const KIND: &'static str = "tunnel";

    fn key(&self) -> &str {
        &self.name
    }
}

/// The complete desired network state at a point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Doc {
    /// Dummy interfaces.
    #[serde(default)]
    pub interfaces: Vec<Interface>,
    /// AAAA records.
    #[serde(default)]
    pub dns: Vec<DnsRecord>,
    /// NAT fan-out groups.
    #[serde(default)]
    pub natfans: Vec<NatFan>,
    /// 6-in-4 tunnels.
    #[serde(default)]
    pub tunnels: Vec<Tunnel>,
}

impl Doc {
    /// Total number of entities across all categories.
    pub fn len(&self) -> usize {
        self.interfaces.len() + self.dns.len() + self.natfans.len() + self.tunnels.len()
    }

    /// True if the document holds no entities.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
