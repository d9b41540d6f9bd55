// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2024.

//! Interface to the wireless sensor nodes.
//!
//! The bridge talks to its remote soil-moisture nodes through a radio
//! modem. This interface is expressed in terms of operations on a node:
//! the modem driver behind it owns frame construction, escaping,
//! checksums, and retries, and reports per-node link quality events back
//! through [`NodePortClient::link_error`].
//!
//! Operations are asynchronous; each has a completion callback. The
//! network sleeps and wakes as one unit, reported by
//! [`NodePortClient::network_awake`] and [`NodePortClient::network_asleep`].

use crate::ErrorCode;

/// Factory-assigned 64-bit radio identifier, the SH:SL register pair.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct NodeId(pub u64);

/// Link-level failures the modem driver attributes to a single node.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum LinkError {
    /// The modem did not produce a response in time.
    UartTimeout,
    /// A malformed or unexpected frame arrived.
    Packet,
    /// A frame arrived with a bad checksum.
    Crc,
}

/// Commands the session controller issues to remote nodes.
pub trait NodePort<'a> {
    /// Set the client receiving node events.
    fn set_client(&self, client: &'a dyn NodePortClient);

    /// Broadcast a discovery request. Every node in range answers with its
    /// identifier via [`NodePortClient::node_discovered`]; the caller owns
    /// the collection window.
    fn start_discovery(&self) -> Result<(), ErrorCode>;

    /// Configure the node's digital and analog inputs and pull-ups.
    fn configure_io(&self, node: NodeId) -> Result<(), ErrorCode>;

    /// Sample the node's DIP switch bank.
    fn read_switches(&self, node: NodeId) -> Result<(), ErrorCode>;

    /// Program the node for network-synchronized cyclic sleep.
    fn enter_cyclic_sleep(&self, node: NodeId) -> Result<(), ErrorCode>;

    /// Switch the node's probe supply rail on or off.
    fn set_probe_power(&self, node: NodeId, on: bool) -> Result<(), ErrorCode>;

    /// Read one analog probe. The converted value arrives via
    /// [`NodePortClient::sample_ready`].
    fn sample(&self, node: NodeId, probe: usize) -> Result<(), ErrorCode>;
}

/// Events from the wireless network.
pub trait NodePortClient {
    /// A node answered the discovery broadcast.
    fn node_discovered(&self, node: NodeId);

    /// The node acknowledged its I/O configuration.
    fn io_configured(&self, node: NodeId, result: Result<(), ErrorCode>);

    /// The node reported its DIP switch bank.
    fn switches_read(&self, node: NodeId, switches: u8, result: Result<(), ErrorCode>);

    /// The node acknowledged the cyclic sleep configuration.
    fn sleep_entered(&self, node: NodeId, result: Result<(), ErrorCode>);

    /// The node acknowledged a probe supply change.
    fn probe_power_set(&self, node: NodeId, result: Result<(), ErrorCode>);

    /// A probe conversion finished. `value` is the raw ADC count.
    fn sample_ready(&self, node: NodeId, probe: usize, value: u16, result: Result<(), ErrorCode>);

    /// The sleeping network just woke as a unit.
    fn network_awake(&self);

    /// The network just entered its sleep period.
    fn network_asleep(&self);

    /// A link-level failure was attributed to `node`.
    fn link_error(&self, node: NodeId, error: LinkError);
}
