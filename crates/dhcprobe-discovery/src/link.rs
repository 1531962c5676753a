//! Raw link-layer transport used by the probe
//!
//! The correlator only needs "send a frame" and "read a frame before this
//! instant". [`PnetLink`] provides both over a pnet datalink channel; tests
//! substitute a scripted implementation.

use pnet::datalink::{self, Channel, DataLinkReceiver, DataLinkSender, MacAddr, NetworkInterface};
use std::io;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, trace};

/// Default poll slice for the datalink read timeout
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Error, Debug)]
pub enum LinkError {
    #[error("Read deadline exceeded")]
    Timeout,
    #[error("Link closed")]
    Closed,
    #[error("Interface {0} not found")]
    InterfaceNotFound(String),
    #[error("Interface {0} has no hardware address")]
    NoHardwareAddress(String),
    #[error("Interface {0} is down")]
    InterfaceDown(String),
    #[error("Unsupported datalink channel on {0}")]
    UnsupportedChannel(String),
    #[error("Link I/O error: {0}")]
    Io(#[from] io::Error),
}

/// One frame read from the link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Received {
    /// Bytes copied into the caller's buffer
    pub len: usize,
    /// Link-layer source of the frame
    pub source: MacAddr,
}

/// Send/receive capability over a broadcast link
pub trait LinkTransport {
    /// Transmit a complete link frame addressed to `destination`
    fn send(&mut self, frame: &[u8], destination: MacAddr) -> io::Result<()>;

    /// Block until a frame arrives or `deadline` passes.
    ///
    /// Frames larger than `buf` are truncated to fit. Returns
    /// [`LinkError::Timeout`] once the deadline has elapsed and
    /// [`LinkError::Closed`] after [`LinkTransport::close`].
    fn receive(&mut self, buf: &mut [u8], deadline: Instant) -> Result<Received, LinkError>;

    /// Release the underlying resource; later reads fail with `Closed`
    fn close(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<T: LinkTransport + ?Sized> LinkTransport for Box<T> {
    fn send(&mut self, frame: &[u8], destination: MacAddr) -> io::Result<()> {
        (**self).send(frame, destination)
    }

    fn receive(&mut self, buf: &mut [u8], deadline: Instant) -> Result<Received, LinkError> {
        (**self).receive(buf, deadline)
    }

    fn close(&mut self) -> io::Result<()> {
        (**self).close()
    }
}

impl<T: LinkTransport + ?Sized> LinkTransport for &mut T {
    fn send(&mut self, frame: &[u8], destination: MacAddr) -> io::Result<()> {
        (**self).send(frame, destination)
    }

    fn receive(&mut self, buf: &mut [u8], deadline: Instant) -> Result<Received, LinkError> {
        (**self).receive(buf, deadline)
    }

    fn close(&mut self) -> io::Result<()> {
        (**self).close()
    }
}

/// Ethernet channel on a single interface
pub struct PnetLink {
    interface: String,
    channel: Option<(Box<dyn DataLinkSender>, Box<dyn DataLinkReceiver>)>,
}

impl PnetLink {
    /// Open a layer-2 channel on `interface`.
    ///
    /// The read timeout is the poll slice between deadline checks, not the
    /// probe deadline itself.
    pub fn open(interface: &NetworkInterface, poll_interval: Duration) -> Result<Self, LinkError> {
        let config = datalink::Config {
            read_timeout: Some(poll_interval),
            // broadcast and our own address are all we need
            promiscuous: false,
            ..Default::default()
        };

        let channel = match datalink::channel(interface, config)? {
            Channel::Ethernet(tx, rx) => (tx, rx),
            _ => return Err(LinkError::UnsupportedChannel(interface.name.clone())),
        };

        debug!(
            interface = %interface.name,
            poll_ms = poll_interval.as_millis() as u64,
            "Opened datalink channel"
        );

        Ok(Self {
            interface: interface.name.clone(),
            channel: Some(channel),
        })
    }
}

impl LinkTransport for PnetLink {
    fn send(&mut self, frame: &[u8], destination: MacAddr) -> io::Result<()> {
        let (tx, _) = self
            .channel
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "link closed"))?;

        // The destination already sits in the Ethernet header
        trace!(
            interface = %self.interface,
            destination = %destination,
            len = frame.len(),
            "Sending frame"
        );

        tx.send_to(frame, None).unwrap_or_else(|| {
            Err(io::Error::new(
                io::ErrorKind::Other,
                "datalink sender produced no result",
            ))
        })
    }

    fn receive(&mut self, buf: &mut [u8], deadline: Instant) -> Result<Received, LinkError> {
        let (_, rx) = self.channel.as_mut().ok_or(LinkError::Closed)?;

        loop {
            if Instant::now() >= deadline {
                return Err(LinkError::Timeout);
            }

            match rx.next() {
                Ok(frame) => {
                    let len = frame.len().min(buf.len());
                    buf[..len].copy_from_slice(&frame[..len]);
                    let source = match frame.get(6..12) {
                        Some(s) => MacAddr::new(s[0], s[1], s[2], s[3], s[4], s[5]),
                        None => MacAddr::zero(),
                    };
                    return Ok(Received { len, source });
                }
                // poll slice elapsed without traffic, check the deadline again
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::TimedOut
                            | io::ErrorKind::WouldBlock
                            | io::ErrorKind::Interrupted
                    ) =>
                {
                    continue
                }
                Err(e) => return Err(LinkError::Io(e)),
            }
        }
    }

    fn close(&mut self) -> io::Result<()> {
        if self.channel.take().is_some() {
            debug!(interface = %self.interface, "Closed datalink channel");
        }
        Ok(())
    }
}

/// Look up an interface that can carry the probe, returning it with its MAC
pub fn find_interface(name: &str) -> Result<(NetworkInterface, MacAddr), LinkError> {
    let interface = datalink::interfaces()
        .into_iter()
        .find(|iface| iface.name == name)
        .ok_or_else(|| LinkError::InterfaceNotFound(name.to_string()))?;

    if !interface.is_up() {
        return Err(LinkError::InterfaceDown(name.to_string()));
    }

    let mac = match interface.mac {
        Some(mac) if mac != MacAddr::zero() => mac,
        _ => return Err(LinkError::NoHardwareAddress(name.to_string())),
    };

    debug!(interface = %name, mac = %mac, index = interface.index, "Using interface");
    Ok((interface, mac))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_interface() {
        let err = find_interface("dhcprobe-does-not-exist0").unwrap_err();
        assert!(matches!(
            err,
            LinkError::InterfaceNotFound(name) if name == "dhcprobe-does-not-exist0"
        ));
    }

    #[test]
    fn test_loopback_has_no_hardware_address() {
        // Loopback is up on any Linux host and carries an all-zero MAC
        let loopback = datalink::interfaces()
            .into_iter()
            .find(|i| i.is_loopback() && i.is_up());
        if let Some(lo) = loopback {
            assert!(matches!(
                find_interface(&lo.name),
                Err(LinkError::NoHardwareAddress(_))
            ));
        }
    }
}
