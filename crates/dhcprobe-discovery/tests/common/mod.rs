//! Scripted link and frame builders shared by the integration tests

#![allow(dead_code)]

use dhcprobe_core::message::{opt, DHCP_CLIENT_PORT, DHCP_SERVER_PORT};
use dhcprobe_core::{
    encode_frame, DhcpMessage, DhcpOption, FrameAddressing, MessageType, Operation, TransactionId,
};
use dhcprobe_discovery::{LinkError, LinkTransport, Received};
use pnet::datalink::MacAddr;
use std::collections::VecDeque;
use std::io;
use std::net::Ipv4Addr;
use std::thread;
use std::time::{Duration, Instant};

pub fn client_mac() -> MacAddr {
    MacAddr::new(0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff)
}

pub fn server_mac() -> MacAddr {
    MacAddr::new(0x02, 0x00, 0x00, 0x00, 0x00, 0x01)
}

/// One scripted receive event
pub enum Step {
    /// Deliver `bytes` `after` the read call starts
    Frame { after: Duration, bytes: Vec<u8> },
    /// Fail the read with an I/O error
    Fail(io::ErrorKind),
}

impl Step {
    pub fn now(bytes: Vec<u8>) -> Self {
        Step::Frame {
            after: Duration::ZERO,
            bytes,
        }
    }

    pub fn after(after: Duration, bytes: Vec<u8>) -> Self {
        Step::Frame { after, bytes }
    }
}

/// In-memory link replaying a script of inbound frames.
///
/// When the script runs dry, or the next frame would arrive after the
/// deadline, the read sleeps until the deadline and reports a timeout, as a
/// real datalink read would.
pub struct ScriptedLink {
    steps: VecDeque<Step>,
    pub sent: Vec<(Vec<u8>, MacAddr)>,
    pub fail_send: Option<io::ErrorKind>,
    pub closed: bool,
    pub close_calls: usize,
}

impl ScriptedLink {
    pub fn new(steps: impl IntoIterator<Item = Step>) -> Self {
        Self {
            steps: steps.into_iter().collect(),
            sent: Vec::new(),
            fail_send: None,
            closed: false,
            close_calls: 0,
        }
    }

    pub fn silent() -> Self {
        Self::new([])
    }

    pub fn remaining(&self) -> usize {
        self.steps.len()
    }
}

impl LinkTransport for ScriptedLink {
    fn send(&mut self, frame: &[u8], destination: MacAddr) -> io::Result<()> {
        if let Some(kind) = self.fail_send {
            return Err(io::Error::new(kind, "scripted send failure"));
        }
        self.sent.push((frame.to_vec(), destination));
        Ok(())
    }

    fn receive(&mut self, buf: &mut [u8], deadline: Instant) -> Result<Received, LinkError> {
        if self.closed {
            return Err(LinkError::Closed);
        }

        let now = Instant::now();
        match self.steps.pop_front() {
            Some(Step::Frame { after, bytes }) if now + after <= deadline => {
                thread::sleep(after);
                let len = bytes.len().min(buf.len());
                buf[..len].copy_from_slice(&bytes[..len]);
                Ok(Received {
                    len,
                    source: server_mac(),
                })
            }
            Some(Step::Fail(kind)) => Err(LinkError::Io(io::Error::new(kind, "scripted failure"))),
            Some(late) => {
                self.steps.push_front(late);
                sleep_until(deadline);
                Err(LinkError::Timeout)
            }
            None => {
                sleep_until(deadline);
                Err(LinkError::Timeout)
            }
        }
    }

    fn close(&mut self) -> io::Result<()> {
        self.closed = true;
        self.close_calls += 1;
        Ok(())
    }
}

fn sleep_until(deadline: Instant) {
    let now = Instant::now();
    if deadline > now {
        thread::sleep(deadline - now);
    }
}

fn server_addressing() -> FrameAddressing {
    FrameAddressing {
        src_mac: server_mac(),
        dst_mac: MacAddr::broadcast(),
        src_ip: Ipv4Addr::new(10, 0, 0, 1),
        dst_ip: Ipv4Addr::BROADCAST,
        src_port: DHCP_SERVER_PORT,
        dst_port: DHCP_CLIENT_PORT,
        ttl: 64,
    }
}

/// DHCPOFFER for `xid` as a server on the link would send it
pub fn offer_frame(xid: TransactionId, client: Ipv4Addr, server: Ipv4Addr) -> Vec<u8> {
    let mut reply = DhcpMessage::discover(client_mac(), xid);
    reply.op = Operation::Reply;
    reply.yiaddr = client;
    reply.siaddr = server;
    reply.options = vec![
        DhcpOption::message_type(MessageType::Offer),
        DhcpOption::new(opt::SERVER_IDENTIFIER, server.octets()),
        DhcpOption::new(opt::LEASE_TIME, 3600u32.to_be_bytes()),
        DhcpOption::new(opt::SUBNET_MASK, [255, 255, 255, 0]),
    ];
    encode_frame(&reply, &server_addressing()).unwrap()
}

/// Reply with no options at all
pub fn bare_reply_frame(xid: TransactionId, client: Ipv4Addr, server: Ipv4Addr) -> Vec<u8> {
    let mut reply = DhcpMessage::discover(client_mac(), xid);
    reply.op = Operation::Reply;
    reply.yiaddr = client;
    reply.siaddr = server;
    reply.options.clear();
    encode_frame(&reply, &server_addressing()).unwrap()
}

/// Another client's DHCPDISCOVER, or our own echoed back
pub fn discover_frame(xid: TransactionId) -> Vec<u8> {
    dhcprobe_core::build_discover_frame(client_mac(), xid).unwrap()
}

pub fn arp_frame() -> Vec<u8> {
    let mut frame = vec![0u8; 60];
    frame[..6].copy_from_slice(&[0xff; 6]);
    frame[12] = 0x08;
    frame[13] = 0x06;
    frame
}

/// Deterministic junk of `len` bytes
pub fn noise(len: usize, seed: u32) -> Vec<u8> {
    let mut state = seed | 1;
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            state as u8
        })
        .collect()
}

/// A valid offer cut short
pub fn truncated_offer(xid: TransactionId) -> Vec<u8> {
    let mut frame = offer_frame(xid, Ipv4Addr::new(10, 0, 0, 5), Ipv4Addr::new(10, 0, 0, 1));
    frame.truncate(frame.len() / 2);
    frame
}

/// A valid offer with one payload byte flipped
pub fn corrupted_offer(xid: TransactionId) -> Vec<u8> {
    let mut frame = offer_frame(xid, Ipv4Addr::new(10, 0, 0, 5), Ipv4Addr::new(10, 0, 0, 1));
    let last = frame.len() - 1;
    frame[last] ^= 0x5a;
    frame
}
