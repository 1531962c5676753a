//! Matches inbound frames against the outstanding request
//!
//! The link is a shared broadcast medium, so the receive loop sees any mix of
//! unrelated traffic, other clients' transactions and our own request echoed
//! back. Only a BOOTREPLY carrying our transaction id ends the wait.

use dhcprobe_core::{decode, DhcpMessage, TransactionId};
use std::time::Instant;
use tracing::{debug, trace};

use crate::link::{LinkError, LinkTransport};

/// Largest standard Ethernet frame without FCS, plus headroom for a VLAN tag
pub const DEFAULT_RECEIVE_BUFFER: usize = 1518;

/// Terminal result of a correlation run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Correlation {
    /// A reply with the expected transaction id arrived
    Matched(DhcpMessage),
    /// The deadline passed without a matching reply
    TimedOut,
}

/// What happened to the frames read during one run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CorrelatorStats {
    pub frames: u64,
    pub undecodable: u64,
    pub foreign_transactions: u64,
    pub requests: u64,
}

/// Receive loop for a single transaction
pub struct ResponseCorrelator {
    xid: TransactionId,
    deadline: Instant,
    buf: Vec<u8>,
    stats: CorrelatorStats,
}

impl ResponseCorrelator {
    /// `deadline` is absolute and is never pushed back while waiting
    pub fn new(xid: TransactionId, deadline: Instant, buffer_len: usize) -> Self {
        Self {
            xid,
            deadline,
            buf: vec![0u8; buffer_len],
            stats: CorrelatorStats::default(),
        }
    }

    pub fn stats(&self) -> CorrelatorStats {
        self.stats
    }

    /// Read until a matching reply, the deadline, or a transport failure.
    ///
    /// Timeout is an ordinary outcome; only link failures are errors.
    pub fn run<L>(&mut self, link: &mut L) -> Result<Correlation, LinkError>
    where
        L: LinkTransport + ?Sized,
    {
        let outcome = loop {
            let received = match link.receive(&mut self.buf, self.deadline) {
                Ok(received) => received,
                Err(LinkError::Timeout) => break Correlation::TimedOut,
                Err(e) => {
                    debug!(xid = %self.xid, error = %e, stats = ?self.stats, "Receive failed");
                    return Err(e);
                }
            };
            self.stats.frames += 1;

            let len = received.len.min(self.buf.len());
            let message = match decode(&self.buf[..len]) {
                Ok(message) => message,
                Err(reason) => {
                    self.stats.undecodable += 1;
                    trace!(
                        source = %received.source,
                        len,
                        %reason,
                        "Discarded frame"
                    );
                    continue;
                }
            };

            if message.xid != self.xid {
                self.stats.foreign_transactions += 1;
                trace!(
                    source = %received.source,
                    xid = %message.xid,
                    "Discarded foreign transaction"
                );
                continue;
            }

            if !message.is_reply() {
                // our own request looped back, or another client reusing the id
                self.stats.requests += 1;
                trace!(source = %received.source, "Discarded request with matching xid");
                continue;
            }

            debug!(
                xid = %self.xid,
                source = %received.source,
                message_type = ?message.message_type(),
                "Matched reply"
            );
            break Correlation::Matched(message);
        };

        debug!(
            xid = %self.xid,
            frames = self.stats.frames,
            undecodable = self.stats.undecodable,
            foreign = self.stats.foreign_transactions,
            requests = self.stats.requests,
            matched = matches!(outcome, Correlation::Matched(_)),
            "Correlation finished"
        );
        Ok(outcome)
    }
}
