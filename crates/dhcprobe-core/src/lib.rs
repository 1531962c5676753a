//! dhcprobe Core - DHCP message model and frame codec
//!
//! This crate provides the wire-level building blocks for the probe:
//! - BOOTP/DHCP message layout, options and transaction identifiers
//! - Ethernet + IPv4 + UDP encapsulation with consistent lengths and checksums
//! - A decode path that turns arbitrary link traffic into "DHCP or nothing"

pub mod frame;
pub mod message;

pub use frame::{
    build_discover_frame, decode, encode_frame, try_decode, DecodeError, FrameAddressing,
    FrameError,
};
pub use message::{DhcpMessage, DhcpOption, MessageType, Operation, TransactionId};
