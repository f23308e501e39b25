use crate::tcp::TcpHeader;

use pnet_packet::ip::{IpNextHeaderProtocol, IpNextHeaderProtocols};
use pnet_packet::ipv4::{self, MutableIpv4Packet};
use pnet_packet::ipv6::MutableIpv6Packet;
use pnet_packet::tcp::{self, MutableTcpPacket};
use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

fn default_ipv4() -> Ipv4Addr {
    Ipv4Addr::LOCALHOST
}

fn default_ipv6() -> Ipv6Addr {
    Ipv6Addr::LOCALHOST
}

fn default_ttl() -> u8 {
    64
}

/// An IPv4 header layer. Fields are named as in the spec attributes.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Ipv4Header {
    #[serde(default = "default_ipv4")]
    pub src: Ipv4Addr,
    #[serde(default = "default_ipv4")]
    pub dst: Ipv4Addr,
    #[serde(default = "default_ttl")]
    pub ttl: u8,
    #[serde(default)]
    pub tos: u8,
    #[serde(default)]
    pub id: u16,
    #[serde(default)]
    pub flags: u8,
    #[serde(default)]
    pub frag: u16,
    /// Overrides the protocol number deduced from the inner layer
    #[serde(default)]
    pub proto: Option<u8>,
}

/// An IPv6 header layer
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Ipv6Header {
    #[serde(default = "default_ipv6")]
    pub src: Ipv6Addr,
    #[serde(default = "default_ipv6")]
    pub dst: Ipv6Addr,
    #[serde(default = "default_ttl")]
    pub hlim: u8,
    #[serde(default)]
    pub tc: u8,
    #[serde(default)]
    pub fl: u32,
    /// Overrides the next header deduced from the inner layer
    #[serde(default)]
    pub nh: Option<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Layer {
    Ipv4(Ipv4Header),
    Ipv6(Ipv6Header),
    Tcp(TcpHeader),
    Raw(Vec<u8>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerKind {
    Ipv4,
    Ipv6,
    Tcp,
    Raw,
}

impl Layer {
    pub fn kind(&self) -> LayerKind {
        match self {
            Layer::Ipv4(_) => LayerKind::Ipv4,
            Layer::Ipv6(_) => LayerKind::Ipv6,
            Layer::Tcp(_) => LayerKind::Tcp,
            Layer::Raw(_) => LayerKind::Raw,
        }
    }

    fn is_ip(&self) -> bool {
        matches!(self, Layer::Ipv4(_) | Layer::Ipv6(_))
    }
}

/// A layered packet, outermost layer first
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Packet {
    layers: Vec<Layer>,
}

impl Packet {
    /// A packet made of a single raw payload
    pub fn from_payload(data: Vec<u8>) -> Self {
        Packet {
            layers: vec![Layer::Raw(data)],
        }
    }

    /// Put this packet inside a new outer layer
    pub fn encapsulate(mut self, outer: Layer) -> Self {
        self.layers.insert(0, outer);
        self
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub fn outermost(&self) -> Option<&Layer> {
        self.layers.first()
    }

    pub fn has_layer(&self, kind: LayerKind) -> bool {
        self.layers.iter().any(|l| l.kind() == kind)
    }

    /// Index of the first TCP layer carried directly by an IPv4 or IPv6 layer
    pub fn tcp_over_ip(&self) -> Option<usize> {
        self.layers
            .windows(2)
            .position(|w| w[0].is_ip() && matches!(w[1], Layer::Tcp(_)))
            .map(|i| i + 1)
    }

    pub fn tcp(&self) -> Option<&TcpHeader> {
        self.layers.iter().find_map(|l| match l {
            Layer::Tcp(h) => Some(h),
            _ => None,
        })
    }

    pub fn layer_mut(&mut self, index: usize) -> Option<&mut Layer> {
        self.layers.get_mut(index)
    }

    /// Source and destination of the first IP layer
    pub fn addresses(&self) -> Option<(IpAddr, IpAddr)> {
        self.layers.iter().find_map(|l| match l {
            Layer::Ipv4(h) => Some((h.src.into(), h.dst.into())),
            Layer::Ipv6(h) => Some((h.src.into(), h.dst.into())),
            _ => None,
        })
    }

    /// Swap source and destination of the IP layer at that index. Other layers are ignored.
    pub fn swap_addresses(&mut self, index: usize) {
        match self.layers.get_mut(index) {
            Some(Layer::Ipv4(h)) => std::mem::swap(&mut h.src, &mut h.dst),
            Some(Layer::Ipv6(h)) => std::mem::swap(&mut h.src, &mut h.dst),
            _ => (),
        }
    }

    /// Drop every layer after the one at that index
    pub fn clear_payload_after(&mut self, index: usize) {
        self.layers.truncate(index + 1);
    }

    /// The raw payload carried by the innermost layer (empty if there is none)
    pub fn payload(&self) -> &[u8] {
        match self.layers.last() {
            Some(Layer::Raw(data)) => data,
            _ => &[],
        }
    }

    /// Serialize the packet, computing lengths and checksums
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut inner: Vec<u8> = vec![];
        for (i, layer) in self.layers.iter().enumerate().rev() {
            let next = self.layers.get(i + 1);
            let parent = i.checked_sub(1).and_then(|p| self.layers.get(p));
            inner = match layer {
                Layer::Raw(data) => {
                    let mut data = data.clone();
                    data.extend_from_slice(&inner);
                    data
                }
                Layer::Ipv4(h) => build_ipv4(h, next, &inner),
                Layer::Ipv6(h) => build_ipv6(h, next, &inner),
                Layer::Tcp(h) => build_tcp(h, parent, &inner),
            };
        }
        inner
    }
}

/// Protocol number of a layer, as written in the enclosing IP header
fn protocol_of(layer: Option<&Layer>, ipv6: bool) -> IpNextHeaderProtocol {
    match layer {
        Some(Layer::Tcp(_)) => IpNextHeaderProtocols::Tcp,
        Some(Layer::Ipv4(_)) => IpNextHeaderProtocols::Ipv4,
        Some(Layer::Ipv6(_)) => IpNextHeaderProtocols::Ipv6,
        _ if ipv6 => IpNextHeaderProtocols::Ipv6NoNxt,
        _ => IpNextHeaderProtocols::Hopopt,
    }
}

fn saturating_len(len: usize) -> u16 {
    u16::try_from(len).unwrap_or(u16::MAX)
}

fn build_ipv4(h: &Ipv4Header, next: Option<&Layer>, inner: &[u8]) -> Vec<u8> {
    let header_len = MutableIpv4Packet::minimum_packet_size();
    let mut buffer = vec![0; header_len + inner.len()];
    buffer[header_len..].copy_from_slice(inner);
    let len = buffer.len();
    // the buffer is at least as large as the header, it cannot fail
    let mut packet = MutableIpv4Packet::new(&mut buffer).unwrap();
    packet.set_version(4);
    packet.set_header_length(5);
    packet.set_dscp(h.tos >> 2);
    packet.set_ecn(h.tos & 0b11);
    packet.set_total_length(saturating_len(len));
    packet.set_identification(h.id);
    packet.set_flags(h.flags);
    packet.set_fragment_offset(h.frag);
    packet.set_ttl(h.ttl);
    packet.set_next_level_protocol(
        h.proto
            .map(IpNextHeaderProtocol::new)
            .unwrap_or_else(|| protocol_of(next, false)),
    );
    packet.set_source(h.src);
    packet.set_destination(h.dst);
    packet.set_checksum(ipv4::checksum(&packet.to_immutable()));
    buffer
}

fn build_ipv6(h: &Ipv6Header, next: Option<&Layer>, inner: &[u8]) -> Vec<u8> {
    let header_len = MutableIpv6Packet::minimum_packet_size();
    let mut buffer = vec![0; header_len + inner.len()];
    buffer[header_len..].copy_from_slice(inner);
    // cannot fail
    let mut packet = MutableIpv6Packet::new(&mut buffer).unwrap();
    packet.set_version(6);
    packet.set_traffic_class(h.tc);
    packet.set_flow_label(h.fl);
    packet.set_payload_length(saturating_len(inner.len()));
    packet.set_next_header(
        h.nh.map(IpNextHeaderProtocol::new)
            .unwrap_or_else(|| protocol_of(next, true)),
    );
    packet.set_hop_limit(h.hlim);
    packet.set_source(h.src);
    packet.set_destination(h.dst);
    buffer
}

fn build_tcp(h: &TcpHeader, parent: Option<&Layer>, inner: &[u8]) -> Vec<u8> {
    let header_len = MutableTcpPacket::minimum_packet_size();
    let mut buffer = vec![0; header_len + inner.len()];
    buffer[header_len..].copy_from_slice(inner);
    // cannot fail
    let mut packet = MutableTcpPacket::new(&mut buffer).unwrap();
    packet.set_source(h.sport);
    packet.set_destination(h.dport);
    packet.set_sequence(h.seq);
    packet.set_acknowledgement(h.ack);
    packet.set_data_offset(5);
    packet.set_flags(h.flags);
    packet.set_window(h.window);
    packet.set_urgent_ptr(h.urgptr);
    // the checksum covers a pseudo-header taken from the enclosing IP layer, if any
    let checksum = match parent {
        Some(Layer::Ipv4(ip)) => tcp::ipv4_checksum(&packet.to_immutable(), &ip.src, &ip.dst),
        Some(Layer::Ipv6(ip)) => tcp::ipv6_checksum(&packet.to_immutable(), &ip.src, &ip.dst),
        _ => 0,
    };
    packet.set_checksum(checksum);
    buffer
}
