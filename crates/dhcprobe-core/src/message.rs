//! BOOTP/DHCP message model and binary layout (RFC 2131, RFC 2132)

use byteorder::{ByteOrder, NetworkEndian};
use pnet::datalink::MacAddr;
use serde::Serialize;
use std::fmt;
use std::net::Ipv4Addr;
use std::num::ParseIntError;
use std::str::FromStr;

use crate::frame::{DecodeError, FrameError};

/// UDP port the server listens on
pub const DHCP_SERVER_PORT: u16 = 67;

/// UDP port the client listens on
pub const DHCP_CLIENT_PORT: u16 = 68;

/// Marks the start of the options field
pub const MAGIC_COOKIE: [u8; 4] = [99, 130, 83, 99];

/// Fixed BOOTP header, from `op` up to and including `file`
pub const BOOTP_FIXED_LEN: usize = 236;

/// Smallest BOOTP payload relay agents are required to accept (RFC 1542)
pub const BOOTP_MIN_LEN: usize = 300;

/// Hardware type for 10Mb Ethernet (ARP hardware type 1)
pub const HTYPE_ETHERNET: u8 = 1;

/// BOOTP broadcast flag, asks the server to broadcast its reply
pub const FLAG_BROADCAST: u16 = 0x8000;

const CHADDR_LEN: usize = 16;
const SNAME_LEN: usize = 64;
const FILE_LEN: usize = 128;
const OPTIONS_OFFSET: usize = BOOTP_FIXED_LEN + MAGIC_COOKIE.len();

/// Field offsets in the fixed header
mod offset {
    pub const OP: usize = 0;
    pub const HTYPE: usize = 1;
    pub const HLEN: usize = 2;
    pub const HOPS: usize = 3;
    pub const XID: usize = 4;
    pub const SECS: usize = 8;
    pub const FLAGS: usize = 10;
    pub const CIADDR: usize = 12;
    pub const YIADDR: usize = 16;
    pub const SIADDR: usize = 20;
    pub const GIADDR: usize = 24;
    pub const CHADDR: usize = 28;
    pub const SNAME: usize = 44;
    pub const FILE: usize = 108;
    pub const COOKIE: usize = 236;
}

/// DHCP option codes used by the probe
pub mod opt {
    pub const PAD: u8 = 0;
    pub const SUBNET_MASK: u8 = 1;
    pub const ROUTER: u8 = 3;
    pub const DNS_SERVER: u8 = 6;
    pub const LEASE_TIME: u8 = 51;
    pub const MESSAGE_TYPE: u8 = 53;
    pub const SERVER_IDENTIFIER: u8 = 54;
    pub const END: u8 = 255;
}

/// Correlation key between one outbound request and its reply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransactionId(pub u32);

impl TransactionId {
    /// Draw a fresh identifier from the thread-local RNG
    pub fn random() -> Self {
        Self(rand::random())
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

/// Parses hex, with or without a `0x` prefix
impl FromStr for TransactionId {
    type Err = ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s
            .strip_prefix("0x")
            .or_else(|| s.strip_prefix("0X"))
            .unwrap_or(s);
        u32::from_str_radix(digits, 16).map(Self)
    }
}

/// BOOTP operation code, the direction of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Operation {
    Request = 1,
    Reply = 2,
}

impl Operation {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Request),
            2 => Some(Self::Reply),
            _ => None,
        }
    }
}

/// DHCP message type (option 53)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum MessageType {
    Discover = 1,
    Offer = 2,
    Request = 3,
    Decline = 4,
    Ack = 5,
    Nak = 6,
    Release = 7,
    Inform = 8,
}

impl MessageType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Discover),
            2 => Some(Self::Offer),
            3 => Some(Self::Request),
            4 => Some(Self::Decline),
            5 => Some(Self::Ack),
            6 => Some(Self::Nak),
            7 => Some(Self::Release),
            8 => Some(Self::Inform),
            _ => None,
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Discover => "DHCPDISCOVER",
            Self::Offer => "DHCPOFFER",
            Self::Request => "DHCPREQUEST",
            Self::Decline => "DHCPDECLINE",
            Self::Ack => "DHCPACK",
            Self::Nak => "DHCPNAK",
            Self::Release => "DHCPRELEASE",
            Self::Inform => "DHCPINFORM",
        };
        f.write_str(name)
    }
}

/// A single TLV option
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DhcpOption {
    pub code: u8,
    pub data: Vec<u8>,
}

impl DhcpOption {
    pub fn new(code: u8, data: impl Into<Vec<u8>>) -> Self {
        Self {
            code,
            data: data.into(),
        }
    }

    pub fn message_type(kind: MessageType) -> Self {
        Self::new(opt::MESSAGE_TYPE, [kind as u8])
    }
}

/// A BOOTP/DHCP message, either direction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DhcpMessage {
    pub op: Operation,
    pub htype: u8,
    pub hlen: u8,
    pub hops: u8,
    pub xid: TransactionId,
    pub secs: u16,
    pub flags: u16,
    /// Client address, filled in by a client that already has one
    pub ciaddr: Ipv4Addr,
    /// "Your" address, the address offered to the client
    pub yiaddr: Ipv4Addr,
    /// Next server address
    pub siaddr: Ipv4Addr,
    /// Relay agent address
    pub giaddr: Ipv4Addr,
    pub chaddr: [u8; CHADDR_LEN],
    pub server_name: Option<String>,
    pub boot_file: Option<String>,
    pub options: Vec<DhcpOption>,
}

impl DhcpMessage {
    /// DHCPDISCOVER carrying only the message type option
    pub fn discover(client_mac: MacAddr, xid: TransactionId) -> Self {
        let mut chaddr = [0u8; CHADDR_LEN];
        chaddr[..6].copy_from_slice(&mac_octets(client_mac));

        Self {
            op: Operation::Request,
            htype: HTYPE_ETHERNET,
            hlen: 6,
            hops: 0,
            xid,
            secs: 0,
            flags: 0,
            ciaddr: Ipv4Addr::UNSPECIFIED,
            yiaddr: Ipv4Addr::UNSPECIFIED,
            siaddr: Ipv4Addr::UNSPECIFIED,
            giaddr: Ipv4Addr::UNSPECIFIED,
            chaddr,
            server_name: None,
            boot_file: None,
            options: vec![DhcpOption::message_type(MessageType::Discover)],
        }
    }

    /// Ask the server to broadcast its reply instead of unicasting it
    pub fn with_broadcast_flag(mut self) -> Self {
        self.flags |= FLAG_BROADCAST;
        self
    }

    pub fn is_reply(&self) -> bool {
        self.op == Operation::Reply
    }

    /// Client hardware address, if it is an Ethernet-sized one
    pub fn client_mac(&self) -> Option<MacAddr> {
        if self.hlen != 6 {
            return None;
        }
        let c = &self.chaddr;
        Some(MacAddr::new(c[0], c[1], c[2], c[3], c[4], c[5]))
    }

    /// Raw data of the first option with `code`
    pub fn option(&self, code: u8) -> Option<&[u8]> {
        self.options
            .iter()
            .find(|o| o.code == code)
            .map(|o| o.data.as_slice())
    }

    pub fn message_type(&self) -> Option<MessageType> {
        match self.option(opt::MESSAGE_TYPE)? {
            [value] => MessageType::from_u8(*value),
            _ => None,
        }
    }

    pub fn server_identifier(&self) -> Option<Ipv4Addr> {
        self.option(opt::SERVER_IDENTIFIER).and_then(single_ipv4)
    }

    pub fn subnet_mask(&self) -> Option<Ipv4Addr> {
        self.option(opt::SUBNET_MASK).and_then(single_ipv4)
    }

    /// Lease time in seconds
    pub fn lease_time(&self) -> Option<u32> {
        match self.option(opt::LEASE_TIME)? {
            data if data.len() == 4 => Some(NetworkEndian::read_u32(data)),
            _ => None,
        }
    }

    pub fn routers(&self) -> Vec<Ipv4Addr> {
        self.option(opt::ROUTER).map(ipv4_list).unwrap_or_default()
    }

    pub fn dns_servers(&self) -> Vec<Ipv4Addr> {
        self.option(opt::DNS_SERVER).map(ipv4_list).unwrap_or_default()
    }

    /// Serialize to the BOOTP layout, options terminated by END and padded
    /// up to [`BOOTP_MIN_LEN`]
    pub fn encode(&self) -> Result<Vec<u8>, FrameError> {
        if self.hlen as usize > CHADDR_LEN {
            return Err(FrameError::Serialization(format!(
                "hardware address length {} exceeds {} bytes",
                self.hlen, CHADDR_LEN
            )));
        }

        let mut buf = vec![0u8; OPTIONS_OFFSET];
        buf[offset::OP] = self.op as u8;
        buf[offset::HTYPE] = self.htype;
        buf[offset::HLEN] = self.hlen;
        buf[offset::HOPS] = self.hops;
        NetworkEndian::write_u32(&mut buf[offset::XID..offset::SECS], self.xid.0);
        NetworkEndian::write_u16(&mut buf[offset::SECS..offset::FLAGS], self.secs);
        NetworkEndian::write_u16(&mut buf[offset::FLAGS..offset::CIADDR], self.flags);
        buf[offset::CIADDR..offset::YIADDR].copy_from_slice(&self.ciaddr.octets());
        buf[offset::YIADDR..offset::SIADDR].copy_from_slice(&self.yiaddr.octets());
        buf[offset::SIADDR..offset::GIADDR].copy_from_slice(&self.siaddr.octets());
        buf[offset::GIADDR..offset::CHADDR].copy_from_slice(&self.giaddr.octets());
        buf[offset::CHADDR..offset::SNAME].copy_from_slice(&self.chaddr);
        write_cstr(
            &mut buf[offset::SNAME..offset::FILE],
            self.server_name.as_deref(),
        );
        write_cstr(
            &mut buf[offset::FILE..offset::COOKIE],
            self.boot_file.as_deref(),
        );
        buf[offset::COOKIE..OPTIONS_OFFSET].copy_from_slice(&MAGIC_COOKIE);

        for option in &self.options {
            if option.code == opt::PAD || option.code == opt::END {
                return Err(FrameError::Serialization(format!(
                    "option code {} is reserved",
                    option.code
                )));
            }
            let len = u8::try_from(option.data.len()).map_err(|_| {
                FrameError::Serialization(format!(
                    "option {} is {} bytes, limit is 255",
                    option.code,
                    option.data.len()
                ))
            })?;
            buf.push(option.code);
            buf.push(len);
            buf.extend_from_slice(&option.data);
        }
        buf.push(opt::END);

        if buf.len() < BOOTP_MIN_LEN {
            buf.resize(BOOTP_MIN_LEN, opt::PAD);
        }

        Ok(buf)
    }

    /// Parse a UDP payload as a BOOTP/DHCP message
    pub fn decode(data: &[u8]) -> Result<Self, DecodeError> {
        if data.len() < OPTIONS_OFFSET {
            return Err(DecodeError::Truncated("dhcp"));
        }

        let op = Operation::from_u8(data[offset::OP])
            .ok_or(DecodeError::UnknownOperation(data[offset::OP]))?;

        let hlen = data[offset::HLEN];
        if hlen as usize > CHADDR_LEN {
            return Err(DecodeError::BadHardwareLength(hlen));
        }

        if data[offset::COOKIE..OPTIONS_OFFSET] != MAGIC_COOKIE {
            return Err(DecodeError::BadMagicCookie);
        }

        let mut chaddr = [0u8; CHADDR_LEN];
        chaddr.copy_from_slice(&data[offset::CHADDR..offset::SNAME]);

        Ok(Self {
            op,
            htype: data[offset::HTYPE],
            hlen,
            hops: data[offset::HOPS],
            xid: TransactionId(NetworkEndian::read_u32(&data[offset::XID..])),
            secs: NetworkEndian::read_u16(&data[offset::SECS..]),
            flags: NetworkEndian::read_u16(&data[offset::FLAGS..]),
            ciaddr: read_ipv4(&data[offset::CIADDR..]),
            yiaddr: read_ipv4(&data[offset::YIADDR..]),
            siaddr: read_ipv4(&data[offset::SIADDR..]),
            giaddr: read_ipv4(&data[offset::GIADDR..]),
            chaddr,
            server_name: read_cstr(&data[offset::SNAME..offset::FILE]),
            boot_file: read_cstr(&data[offset::FILE..offset::COOKIE]),
            options: parse_options(&data[OPTIONS_OFFSET..])?,
        })
    }
}

/// Walk the option TLVs up to END or the end of data
fn parse_options(mut data: &[u8]) -> Result<Vec<DhcpOption>, DecodeError> {
    let mut options = Vec::new();

    while let Some((&code, rest)) = data.split_first() {
        match code {
            opt::PAD => data = rest,
            opt::END => break,
            _ => {
                let (&len, rest) = rest
                    .split_first()
                    .ok_or(DecodeError::MalformedOption(code))?;
                let len = len as usize;
                if rest.len() < len {
                    return Err(DecodeError::MalformedOption(code));
                }
                options.push(DhcpOption::new(code, &rest[..len]));
                data = &rest[len..];
            }
        }
    }

    Ok(options)
}

pub(crate) fn mac_octets(mac: MacAddr) -> [u8; 6] {
    [mac.0, mac.1, mac.2, mac.3, mac.4, mac.5]
}

fn read_ipv4(data: &[u8]) -> Ipv4Addr {
    Ipv4Addr::new(data[0], data[1], data[2], data[3])
}

fn single_ipv4(data: &[u8]) -> Option<Ipv4Addr> {
    (data.len() == 4).then(|| read_ipv4(data))
}

fn ipv4_list(data: &[u8]) -> Vec<Ipv4Addr> {
    if data.len() % 4 != 0 {
        return Vec::new();
    }
    data.chunks_exact(4).map(read_ipv4).collect()
}

/// NUL-terminated field; an empty field reads as `None`
fn read_cstr(field: &[u8]) -> Option<String> {
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    if end == 0 {
        return None;
    }
    Some(String::from_utf8_lossy(&field[..end]).into_owned())
}

/// Copy `value` into `field`, truncated so a trailing NUL always fits
fn write_cstr(field: &mut [u8], value: Option<&str>) {
    if let Some(value) = value {
        let bytes = value.as_bytes();
        let len = bytes.len().min(field.len() - 1);
        field[..len].copy_from_slice(&bytes[..len]);
    }
}

// Sanity checks on the layout constants
const _: () = assert!(offset::SNAME + SNAME_LEN == offset::FILE);
const _: () = assert!(offset::FILE + FILE_LEN == BOOTP_FIXED_LEN);

#[cfg(test)]
mod tests {
    use super::*;

    fn test_mac() -> MacAddr {
        MacAddr::new(0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff)
    }

    #[test]
    fn test_discover_layout() {
        let msg = DhcpMessage::discover(test_mac(), TransactionId(0x12345678));
        let bytes = msg.encode().unwrap();

        assert_eq!(bytes.len(), BOOTP_MIN_LEN);
        assert_eq!(bytes[0], 1); // BOOTREQUEST
        assert_eq!(bytes[1], HTYPE_ETHERNET);
        assert_eq!(bytes[2], 6);
        assert_eq!(&bytes[4..8], &[0x12, 0x34, 0x56, 0x78]);
        assert_eq!(&bytes[28..34], &[0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]);
        assert_eq!(&bytes[236..240], &MAGIC_COOKIE);
        // message type = DISCOVER, then END
        assert_eq!(&bytes[240..244], &[53, 1, 1, 255]);
        assert!(bytes[244..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_discover_decodes_back() {
        let msg = DhcpMessage::discover(test_mac(), TransactionId(0xdeadbeef));
        let decoded = DhcpMessage::decode(&msg.encode().unwrap()).unwrap();

        assert_eq!(decoded, msg);
        assert_eq!(decoded.client_mac(), Some(test_mac()));
        assert_eq!(decoded.message_type(), Some(MessageType::Discover));
    }

    #[test]
    fn test_broadcast_flag() {
        let msg = DhcpMessage::discover(test_mac(), TransactionId(1)).with_broadcast_flag();
        let bytes = msg.encode().unwrap();
        assert_eq!(&bytes[10..12], &[0x80, 0x00]);
    }

    #[test]
    fn test_offer_options() {
        let mut msg = DhcpMessage::discover(test_mac(), TransactionId(7));
        msg.op = Operation::Reply;
        msg.yiaddr = Ipv4Addr::new(10, 0, 0, 5);
        msg.siaddr = Ipv4Addr::new(10, 0, 0, 1);
        msg.server_name = Some("dhcp-1".to_string());
        msg.options = vec![
            DhcpOption::message_type(MessageType::Offer),
            DhcpOption::new(opt::SERVER_IDENTIFIER, [10, 0, 0, 1]),
            DhcpOption::new(opt::LEASE_TIME, [0, 0, 0x0e, 0x10]),
            DhcpOption::new(opt::SUBNET_MASK, [255, 255, 255, 0]),
            DhcpOption::new(opt::ROUTER, [10, 0, 0, 1]),
            DhcpOption::new(opt::DNS_SERVER, [1, 1, 1, 1, 8, 8, 8, 8]),
        ];

        let decoded = DhcpMessage::decode(&msg.encode().unwrap()).unwrap();
        assert!(decoded.is_reply());
        assert_eq!(decoded.message_type(), Some(MessageType::Offer));
        assert_eq!(decoded.server_identifier(), Some(Ipv4Addr::new(10, 0, 0, 1)));
        assert_eq!(decoded.lease_time(), Some(3600));
        assert_eq!(decoded.subnet_mask(), Some(Ipv4Addr::new(255, 255, 255, 0)));
        assert_eq!(decoded.routers(), vec![Ipv4Addr::new(10, 0, 0, 1)]);
        assert_eq!(
            decoded.dns_servers(),
            vec![Ipv4Addr::new(1, 1, 1, 1), Ipv4Addr::new(8, 8, 8, 8)]
        );
        assert_eq!(decoded.server_name.as_deref(), Some("dhcp-1"));
    }

    #[test]
    fn test_oversized_option_rejected() {
        let mut msg = DhcpMessage::discover(test_mac(), TransactionId(1));
        msg.options.push(DhcpOption::new(43, vec![0u8; 256]));
        assert!(matches!(msg.encode(), Err(FrameError::Serialization(_))));
    }

    #[test]
    fn test_decode_rejects_bad_cookie() {
        let mut bytes = DhcpMessage::discover(test_mac(), TransactionId(1))
            .encode()
            .unwrap();
        bytes[236] = 0;
        assert_eq!(
            DhcpMessage::decode(&bytes),
            Err(DecodeError::BadMagicCookie)
        );
    }

    #[test]
    fn test_decode_rejects_unknown_op() {
        let mut bytes = DhcpMessage::discover(test_mac(), TransactionId(1))
            .encode()
            .unwrap();
        bytes[0] = 3;
        assert_eq!(
            DhcpMessage::decode(&bytes),
            Err(DecodeError::UnknownOperation(3))
        );
    }

    #[test]
    fn test_decode_rejects_short_payload() {
        assert_eq!(
            DhcpMessage::decode(&[1u8; 100]),
            Err(DecodeError::Truncated("dhcp"))
        );
    }

    #[test]
    fn test_decode_rejects_truncated_option() {
        let mut bytes = DhcpMessage::discover(test_mac(), TransactionId(1))
            .encode()
            .unwrap();
        bytes.truncate(240);
        // server identifier claims 4 bytes, carries 2
        bytes.extend_from_slice(&[54, 4, 10, 0]);
        assert_eq!(
            DhcpMessage::decode(&bytes),
            Err(DecodeError::MalformedOption(54))
        );
    }

    #[test]
    fn test_transaction_id_parse() {
        assert_eq!("0x12345678".parse(), Ok(TransactionId(0x12345678)));
        assert_eq!("DEADBEEF".parse(), Ok(TransactionId(0xdeadbeef)));
        assert!("xyz".parse::<TransactionId>().is_err());
        assert_eq!(TransactionId(0xab).to_string(), "0x000000ab");
    }
}
