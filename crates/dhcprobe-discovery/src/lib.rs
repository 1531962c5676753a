//! dhcprobe Discovery - DHCP server discovery over a raw link
//!
//! This crate provides the moving parts of a probe:
//! - A narrow link transport trait and its pnet datalink implementation
//! - A response correlator that picks our reply out of broadcast traffic
//! - The one-shot discover probe tying both to the frame codec

pub mod correlator;
pub mod link;
pub mod probe;

pub use correlator::{Correlation, CorrelatorStats, ResponseCorrelator};
pub use link::{find_interface, LinkError, LinkTransport, PnetLink, Received};
pub use probe::{probe, probe_with_options, Offer, ProbeError, ProbeOptions, ProbeOutcome};
