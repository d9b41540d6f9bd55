// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2024.

//! Registry of the wireless nodes the bridge speaks for.
//!
//! Slots are indexed by the node's DIP-switch setting, which is also its
//! SDI-12 address; the deployment fixes both in hardware. The registry is
//! populated once by the discovery pass, never resized, mutated only by
//! the session controller, and read by the protocol side through
//! [`AddressBook`] and the probe averages.

use core::cell::Cell;

use capsules_sdi12::device::AddressBook;
use kernel::hil::wsn::{LinkError, NodeId};
use kernel::ErrorCode;

/// Upper bound on nodes in one deployment.
pub const MAX_NODES: usize = 10;

/// Soil-moisture probes wired to each node.
pub const PROBES_PER_NODE: usize = 2;

/// Samples retained per probe.
pub const SAMPLES_PER_PROBE: usize = 16;

/// Which raw ADC counts are rejected as electrically implausible.
///
/// A reading equal to either sentinel is what a disconnected or shorted
/// probe produces, not soil.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct SamplePolicy {
    /// Full-scale ADC count for the node's converter.
    pub full_scale: u16,
    /// The low sentinel, normally zero.
    pub zero: u16,
}

impl SamplePolicy {
    pub const fn new(full_scale: u16, zero: u16) -> SamplePolicy {
        SamplePolicy { full_scale, zero }
    }

    pub fn is_valid(&self, value: u16) -> bool {
        value != self.full_scale && value != self.zero
    }
}

/// Ring of recent samples from one probe.
struct Probe {
    samples: Cell<[u16; SAMPLES_PER_PROBE]>,
    write_index: Cell<usize>,
    good: Cell<usize>,
}

impl Probe {
    const fn new() -> Probe {
        Probe {
            samples: Cell::new([0; SAMPLES_PER_PROBE]),
            write_index: Cell::new(0),
            good: Cell::new(0),
        }
    }

    fn record_valid(&self, value: u16) {
        let mut samples = self.samples.get();
        let index = self.write_index.get();
        samples[index] = value;
        self.samples.set(samples);
        self.write_index.set((index + 1) % SAMPLES_PER_PROBE);
        self.good
            .set(core::cmp::min(self.good.get() + 1, SAMPLES_PER_PROBE));
    }

    fn record_invalid(&self) {
        self.good.set(self.good.get().saturating_sub(1));
    }

    fn average(&self) -> u16 {
        let good = self.good.get();
        if good == 0 {
            return 0;
        }
        let sum: u32 = self.samples.get().iter().map(|&s| s as u32).sum();
        (sum / good as u32) as u16
    }
}

struct Node {
    id: Cell<Option<NodeId>>,
    uart_timeouts: Cell<u32>,
    packet_errors: Cell<u32>,
    crc_errors: Cell<u32>,
    /// At least one complete probe pass has been stored.
    sampled: Cell<bool>,
    probes: [Probe; PROBES_PER_NODE],
}

impl Node {
    const fn new() -> Node {
        Node {
            id: Cell::new(None),
            uart_timeouts: Cell::new(0),
            packet_errors: Cell::new(0),
            crc_errors: Cell::new(0),
            sampled: Cell::new(false),
            probes: [Probe::new(), Probe::new()],
        }
    }
}

/// Fixed table of nodes, indexed by DIP-derived SDI-12 address.
pub struct NodeRegistry {
    nodes: [Node; MAX_NODES],
    policy: SamplePolicy,
}

impl NodeRegistry {
    pub fn new(policy: SamplePolicy) -> NodeRegistry {
        NodeRegistry {
            nodes: core::array::from_fn(|_| Node::new()),
            policy,
        }
    }

    /// Place a discovered node at the slot its DIP switches name.
    pub fn install(&self, switches: u8, id: NodeId) -> Result<(), ErrorCode> {
        let node = self
            .nodes
            .get(switches as usize)
            .ok_or(ErrorCode::INVAL)?;
        if node.id.get().is_some() {
            return Err(ErrorCode::ALREADY);
        }
        node.id.set(Some(id));
        Ok(())
    }

    pub fn is_installed(&self, address: u8) -> bool {
        self.node_id(address).is_some()
    }

    pub fn node_id(&self, address: u8) -> Option<NodeId> {
        self.nodes.get(address as usize).and_then(|n| n.id.get())
    }

    fn node_by_id(&self, id: NodeId) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id.get() == Some(id))
    }

    /// Validate and store one probe reading. Returns whether it was
    /// accepted; a sentinel reading instead erodes the good count.
    pub fn record_sample(&self, address: u8, probe: usize, value: u16) -> bool {
        let valid = self.policy.is_valid(value);
        if let Some(p) = self
            .nodes
            .get(address as usize)
            .and_then(|n| n.probes.get(probe))
        {
            if valid {
                p.record_valid(value);
            } else {
                p.record_invalid();
            }
        }
        valid
    }

    /// Note that `address` finished a complete probe pass.
    pub fn mark_sampled(&self, address: u8) {
        if let Some(node) = self.nodes.get(address as usize) {
            node.sampled.set(true);
        }
    }

    /// Has `address` ever finished a complete probe pass?
    pub fn has_samples(&self, address: u8) -> bool {
        self.nodes
            .get(address as usize)
            .map_or(false, |n| n.sampled.get())
    }

    /// Mean of the probe's ring over its good samples; 0 with none.
    pub fn average(&self, address: u8, probe: usize) -> u16 {
        self.nodes
            .get(address as usize)
            .and_then(|n| n.probes.get(probe))
            .map_or(0, |p| p.average())
    }

    /// Attribute a link failure to the node carrying `id`. Unknown
    /// identifiers (a node that never finished setup) are dropped.
    pub fn record_link_error(&self, id: NodeId, error: LinkError) {
        if let Some(node) = self.node_by_id(id) {
            let counter = match error {
                LinkError::UartTimeout => &node.uart_timeouts,
                LinkError::Packet => &node.packet_errors,
                LinkError::Crc => &node.crc_errors,
            };
            counter.set(counter.get() + 1);
        }
    }

    /// Diagnostic counters: (UART timeouts, packet errors, CRC errors).
    pub fn error_counters(&self, address: u8) -> Option<(u32, u32, u32)> {
        self.nodes.get(address as usize).map(|n| {
            (
                n.uart_timeouts.get(),
                n.packet_errors.get(),
                n.crc_errors.get(),
            )
        })
    }
}

impl AddressBook for NodeRegistry {
    fn is_configured(&self, address: u8) -> bool {
        self.is_installed(address)
    }

    fn count(&self) -> usize {
        self.nodes.iter().filter(|n| n.id.get().is_some()).count()
    }

    fn get(&self, index: usize) -> Option<u8> {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| n.id.get().is_some())
            .nth(index)
            .map(|(address, _)| address as u8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> NodeRegistry {
        NodeRegistry::new(SamplePolicy::new(1023, 0))
    }

    #[test]
    fn install_by_switches() {
        let r = registry();
        assert!(r.install(3, NodeId(0xa)).is_ok());
        assert!(r.install(0, NodeId(0xb)).is_ok());

        // The slot is the address.
        assert_eq!(r.node_id(3), Some(NodeId(0xa)));
        assert_eq!(r.node_id(0), Some(NodeId(0xb)));
        assert!(!r.is_installed(1));

        // A slot installs once; switches beyond the table are rejected.
        assert_eq!(r.install(3, NodeId(0xc)), Err(ErrorCode::ALREADY));
        assert_eq!(r.install(10, NodeId(0xc)), Err(ErrorCode::INVAL));
    }

    #[test]
    fn address_book_is_ascending() {
        let r = registry();
        r.install(7, NodeId(1)).unwrap();
        r.install(0, NodeId(2)).unwrap();
        r.install(3, NodeId(3)).unwrap();

        assert_eq!(r.count(), 3);
        assert_eq!(r.get(0), Some(0));
        assert_eq!(r.get(1), Some(3));
        assert_eq!(r.get(2), Some(7));
        assert_eq!(r.get(3), None);
        assert!(r.is_configured(7));
        assert!(!r.is_configured(4));
    }

    #[test]
    fn sentinel_samples_are_rejected() {
        let r = registry();
        r.install(0, NodeId(1)).unwrap();

        assert!(r.record_sample(0, 0, 512));
        assert!(r.record_sample(0, 0, 514));
        assert_eq!(r.average(0, 0), (512 + 514) / 2);

        // Full-scale is what broken wiring reads like. It is not stored,
        // and it erodes the divisor: the average is sum(ring)/good.
        assert!(!r.record_sample(0, 0, 1023));
        assert_eq!(r.average(0, 0), 512 + 514);
    }

    #[test]
    fn good_count_floors_at_zero() {
        let r = registry();
        r.install(0, NodeId(1)).unwrap();

        assert!(!r.record_sample(0, 0, 0));
        assert!(!r.record_sample(0, 0, 0));
        assert_eq!(r.average(0, 0), 0);

        assert!(r.record_sample(0, 1, 300));
        assert_eq!(r.average(0, 1), 300);
    }

    #[test]
    fn ring_wraps_at_capacity() {
        let r = registry();
        r.install(0, NodeId(1)).unwrap();

        for _ in 0..SAMPLES_PER_PROBE {
            r.record_sample(0, 0, 100);
        }
        for _ in 0..4 {
            r.record_sample(0, 0, 200);
        }
        // Four oldest entries were overwritten; the good count stays
        // capped at the ring size.
        let expected = (12 * 100 + 4 * 200) / SAMPLES_PER_PROBE as u32;
        assert_eq!(r.average(0, 0) as u32, expected);
    }

    #[test]
    fn link_errors_count_per_node() {
        let r = registry();
        r.install(2, NodeId(9)).unwrap();

        r.record_link_error(NodeId(9), LinkError::UartTimeout);
        r.record_link_error(NodeId(9), LinkError::Crc);
        r.record_link_error(NodeId(9), LinkError::Crc);
        // Unknown node: dropped.
        r.record_link_error(NodeId(5), LinkError::Packet);

        assert_eq!(r.error_counters(2), Some((1, 0, 2)));
    }
}
