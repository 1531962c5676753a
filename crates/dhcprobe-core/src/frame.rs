//! Ethernet + IPv4 + UDP encapsulation of DHCP messages
//!
//! The encode path produces a complete broadcast frame with every length
//! field and checksum filled in. The decode path accepts anything the link
//! hands us and answers either with a DHCP message or with the reason the
//! bytes were not one; it never panics on foreign or malformed traffic.

use pnet::datalink::MacAddr;
use pnet::packet::ethernet::{EtherTypes, EthernetPacket, MutableEthernetPacket};
use pnet::packet::ip::IpNextHeaderProtocols;
use pnet::packet::ipv4::{self, Ipv4Packet, MutableIpv4Packet};
use pnet::packet::udp::{self, MutableUdpPacket, UdpPacket};
use std::net::Ipv4Addr;
use thiserror::Error;

use crate::message::{DhcpMessage, TransactionId, DHCP_CLIENT_PORT, DHCP_SERVER_PORT};

pub const ETHERNET_HEADER_LEN: usize = 14;
pub const IPV4_HEADER_LEN: usize = 20;
pub const UDP_HEADER_LEN: usize = 8;

/// TTL for outbound datagrams
pub const DEFAULT_TTL: u8 = 64;

const IPV4_MORE_FRAGMENTS: u8 = 0b001;

#[derive(Error, Debug)]
pub enum FrameError {
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Why a received buffer is not a DHCP message
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Truncated {0} layer")]
    Truncated(&'static str),
    #[error("Not IPv4 (ethertype {0:#06x})")]
    NotIpv4(u16),
    #[error("Malformed IPv4 header: {0}")]
    BadIpv4Header(&'static str),
    #[error("IPv4 header checksum mismatch")]
    Ipv4Checksum,
    #[error("Fragmented datagram")]
    Fragmented,
    #[error("Not UDP (protocol {0})")]
    NotUdp(u8),
    #[error("Not a DHCP port pair ({0} -> {1})")]
    NotDhcpPort(u16, u16),
    #[error("UDP checksum mismatch")]
    UdpChecksum,
    #[error("Unknown BOOTP operation {0}")]
    UnknownOperation(u8),
    #[error("Hardware address length {0} out of range")]
    BadHardwareLength(u8),
    #[error("Bad magic cookie")]
    BadMagicCookie,
    #[error("Malformed option {0}")]
    MalformedOption(u8),
}

/// Addresses and ports for every layer of a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameAddressing {
    pub src_mac: MacAddr,
    pub dst_mac: MacAddr,
    pub src_ip: Ipv4Addr,
    pub dst_ip: Ipv4Addr,
    pub src_port: u16,
    pub dst_port: u16,
    pub ttl: u8,
}

impl FrameAddressing {
    /// Client without an address talking to every server on the link:
    /// 0.0.0.0:68 -> 255.255.255.255:67, link broadcast destination
    pub fn client_broadcast(client_mac: MacAddr) -> Self {
        Self {
            src_mac: client_mac,
            dst_mac: MacAddr::broadcast(),
            src_ip: Ipv4Addr::UNSPECIFIED,
            dst_ip: Ipv4Addr::BROADCAST,
            src_port: DHCP_CLIENT_PORT,
            dst_port: DHCP_SERVER_PORT,
            ttl: DEFAULT_TTL,
        }
    }
}

/// Build the broadcast DHCPDISCOVER frame for `client_mac`
pub fn build_discover_frame(
    client_mac: MacAddr,
    xid: TransactionId,
) -> Result<Vec<u8>, FrameError> {
    encode_frame(
        &DhcpMessage::discover(client_mac, xid),
        &FrameAddressing::client_broadcast(client_mac),
    )
}

/// Encapsulate `message` in UDP, IPv4 and Ethernet headers
pub fn encode_frame(
    message: &DhcpMessage,
    addressing: &FrameAddressing,
) -> Result<Vec<u8>, FrameError> {
    let payload = message.encode()?;

    let udp_len = UDP_HEADER_LEN + payload.len();
    let ip_len = IPV4_HEADER_LEN + udp_len;
    let ip_len_field = u16::try_from(ip_len).map_err(|_| {
        FrameError::Serialization(format!(
            "IPv4 datagram of {} bytes exceeds the total length field",
            ip_len
        ))
    })?;

    let mut buf = vec![0u8; ETHERNET_HEADER_LEN + ip_len];

    {
        let mut eth = MutableEthernetPacket::new(&mut buf[..])
            .ok_or_else(|| too_small("ethernet"))?;
        eth.set_destination(addressing.dst_mac);
        eth.set_source(addressing.src_mac);
        eth.set_ethertype(EtherTypes::Ipv4);
    }

    {
        let mut ip = MutableIpv4Packet::new(&mut buf[ETHERNET_HEADER_LEN..])
            .ok_or_else(|| too_small("ipv4"))?;
        ip.set_version(4);
        ip.set_header_length((IPV4_HEADER_LEN / 4) as u8);
        ip.set_total_length(ip_len_field);
        ip.set_ttl(addressing.ttl);
        ip.set_next_level_protocol(IpNextHeaderProtocols::Udp);
        ip.set_source(addressing.src_ip);
        ip.set_destination(addressing.dst_ip);
        let checksum = ipv4::checksum(&ip.to_immutable());
        ip.set_checksum(checksum);
    }

    {
        let mut udp = MutableUdpPacket::new(&mut buf[ETHERNET_HEADER_LEN + IPV4_HEADER_LEN..])
            .ok_or_else(|| too_small("udp"))?;
        udp.set_source(addressing.src_port);
        udp.set_destination(addressing.dst_port);
        // udp_len < ip_len, which already fits
        udp.set_length(udp_len as u16);
        udp.set_payload(&payload);
        let checksum = udp::ipv4_checksum(
            &udp.to_immutable(),
            &addressing.src_ip,
            &addressing.dst_ip,
        );
        udp.set_checksum(wire_udp_checksum(checksum));
    }

    Ok(buf)
}

/// Decode a raw link frame down to its DHCP message
pub fn decode(raw: &[u8]) -> Result<DhcpMessage, DecodeError> {
    let eth = EthernetPacket::new(raw).ok_or(DecodeError::Truncated("ethernet"))?;
    let ethertype = eth.get_ethertype();
    if ethertype != EtherTypes::Ipv4 {
        return Err(DecodeError::NotIpv4(ethertype.0));
    }

    let ip_bytes = &raw[ETHERNET_HEADER_LEN..];
    let ip = Ipv4Packet::new(ip_bytes).ok_or(DecodeError::Truncated("ipv4"))?;
    if ip.get_version() != 4 {
        return Err(DecodeError::BadIpv4Header("version"));
    }
    let header_len = ip.get_header_length() as usize * 4;
    if header_len < IPV4_HEADER_LEN {
        return Err(DecodeError::BadIpv4Header("header length"));
    }
    // Frames below the Ethernet minimum arrive padded, so only the
    // IPv4 total length bounds the datagram
    let total_len = ip.get_total_length() as usize;
    if total_len < header_len || total_len > ip_bytes.len() {
        return Err(DecodeError::Truncated("ipv4"));
    }
    if ipv4::checksum(&ip) != ip.get_checksum() {
        return Err(DecodeError::Ipv4Checksum);
    }
    if ip.get_fragment_offset() != 0 || ip.get_flags() & IPV4_MORE_FRAGMENTS != 0 {
        return Err(DecodeError::Fragmented);
    }
    let protocol = ip.get_next_level_protocol();
    if protocol != IpNextHeaderProtocols::Udp {
        return Err(DecodeError::NotUdp(protocol.0));
    }

    let udp_bytes = &ip_bytes[header_len..total_len];
    let udp_len = UdpPacket::new(udp_bytes)
        .ok_or(DecodeError::Truncated("udp"))?
        .get_length() as usize;
    if udp_len < UDP_HEADER_LEN || udp_len > udp_bytes.len() {
        return Err(DecodeError::Truncated("udp"));
    }
    let udp_bytes = &udp_bytes[..udp_len];
    let udp = UdpPacket::new(udp_bytes).ok_or(DecodeError::Truncated("udp"))?;

    let (src_port, dst_port) = (udp.get_source(), udp.get_destination());
    if !is_dhcp_port(src_port) && !is_dhcp_port(dst_port) {
        return Err(DecodeError::NotDhcpPort(src_port, dst_port));
    }

    // A zero checksum means the sender did not compute one
    let carried = udp.get_checksum();
    if carried != 0 {
        let computed = udp::ipv4_checksum(&udp, &ip.get_source(), &ip.get_destination());
        if wire_udp_checksum(computed) != carried {
            return Err(DecodeError::UdpChecksum);
        }
    }

    DhcpMessage::decode(&udp_bytes[UDP_HEADER_LEN..])
}

/// [`decode`], collapsing every rejection into "no message"
pub fn try_decode(raw: &[u8]) -> Option<DhcpMessage> {
    decode(raw).ok()
}

fn is_dhcp_port(port: u16) -> bool {
    port == DHCP_SERVER_PORT || port == DHCP_CLIENT_PORT
}

/// A computed checksum of zero goes on the wire as all ones (RFC 768)
fn wire_udp_checksum(checksum: u16) -> u16 {
    if checksum == 0 {
        0xffff
    } else {
        checksum
    }
}

fn too_small(layer: &str) -> FrameError {
    FrameError::Serialization(format!("buffer too small for {} header", layer))
}
