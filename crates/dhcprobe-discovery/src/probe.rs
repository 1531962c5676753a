//! One-shot DHCP discover probe

use dhcprobe_core::{
    encode_frame, DhcpMessage, FrameAddressing, FrameError, MessageType, TransactionId,
};
use pnet::datalink::MacAddr;
use serde::Serialize;
use std::io;
use std::net::Ipv4Addr;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::correlator::{Correlation, ResponseCorrelator, DEFAULT_RECEIVE_BUFFER};
use crate::link::{LinkError, LinkTransport};

/// Default time to wait for an offer
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("Could not build discover frame: {0}")]
    Serialization(#[from] FrameError),
    #[error("Failed to send discover frame: {0}")]
    TransportSend(#[source] io::Error),
    #[error("Failed to receive: {0}")]
    Transport(#[source] LinkError),
    #[error("Timeout of {0:?} is too large to schedule")]
    InvalidTimeout(Duration),
}

/// Probe tunables
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeOptions {
    /// Total wait for a reply, measured from just before the send
    pub timeout: Duration,
    /// Size of the receive buffer, one link frame
    pub receive_buffer: usize,
    /// Set the BOOTP broadcast flag on the request
    pub broadcast_flag: bool,
}

impl Default for ProbeOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            receive_buffer: DEFAULT_RECEIVE_BUFFER,
            broadcast_flag: false,
        }
    }
}

impl ProbeOptions {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout,
            ..Default::default()
        }
    }
}

/// Addressing information from a matched reply
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Offer {
    /// Address offered to the client (yiaddr)
    pub client: Ipv4Addr,
    /// Responding server (siaddr)
    pub server: Ipv4Addr,
    pub message_type: Option<MessageType>,
    pub server_identifier: Option<Ipv4Addr>,
    /// Lease time in seconds
    pub lease_time: Option<u32>,
    pub subnet_mask: Option<Ipv4Addr>,
    pub routers: Vec<Ipv4Addr>,
    pub dns_servers: Vec<Ipv4Addr>,
}

impl From<&DhcpMessage> for Offer {
    fn from(reply: &DhcpMessage) -> Self {
        Self {
            client: reply.yiaddr,
            server: reply.siaddr,
            message_type: reply.message_type(),
            server_identifier: reply.server_identifier(),
            lease_time: reply.lease_time(),
            subnet_mask: reply.subnet_mask(),
            routers: reply.routers(),
            dns_servers: reply.dns_servers(),
        }
    }
}

/// Caller-visible result of a completed probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    Offered(Offer),
    NoReply,
}

/// Broadcast a DHCPDISCOVER and wait up to `timeout` for the reply to `xid`
pub fn probe<L: LinkTransport>(
    link: L,
    client_mac: MacAddr,
    xid: TransactionId,
    timeout: Duration,
) -> Result<ProbeOutcome, ProbeError> {
    probe_with_options(link, client_mac, xid, &ProbeOptions::with_timeout(timeout))
}

/// [`probe`] with every tunable exposed.
///
/// The link is owned for the duration of the probe and released on every
/// exit path.
pub fn probe_with_options<L: LinkTransport>(
    mut link: L,
    client_mac: MacAddr,
    xid: TransactionId,
    options: &ProbeOptions,
) -> Result<ProbeOutcome, ProbeError> {
    let result = run(&mut link, client_mac, xid, options);

    if let Err(e) = link.close() {
        warn!(error = %e, "Failed to close link");
    }

    result
}

fn run<L: LinkTransport>(
    link: &mut L,
    client_mac: MacAddr,
    xid: TransactionId,
    options: &ProbeOptions,
) -> Result<ProbeOutcome, ProbeError> {
    let mut request = DhcpMessage::discover(client_mac, xid);
    if options.broadcast_flag {
        request = request.with_broadcast_flag();
    }
    let addressing = FrameAddressing::client_broadcast(client_mac);
    let frame = encode_frame(&request, &addressing)?;

    let deadline = Instant::now()
        .checked_add(options.timeout)
        .ok_or(ProbeError::InvalidTimeout(options.timeout))?;

    info!(xid = %xid, mac = %client_mac, "Sending DHCPDISCOVER");
    link.send(&frame, addressing.dst_mac)
        .map_err(ProbeError::TransportSend)?;

    let mut correlator = ResponseCorrelator::new(xid, deadline, options.receive_buffer);
    let correlation = correlator.run(link).map_err(ProbeError::Transport)?;

    match correlation {
        Correlation::Matched(reply) => {
            let offer = Offer::from(&reply);
            info!(client = %offer.client, server = %offer.server, "Received reply");
            if offer.message_type.is_none() {
                debug!(xid = %xid, "Reply carries no message type option");
            }
            Ok(ProbeOutcome::Offered(offer))
        }
        Correlation::TimedOut => {
            info!(
                xid = %xid,
                timeout_ms = options.timeout.as_millis() as u64,
                "No reply before deadline"
            );
            Ok(ProbeOutcome::NoReply)
        }
    }
}
