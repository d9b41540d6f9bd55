// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2024.

//! Wireless session controller.
//!
//! Orchestrates the sensor network: a discovery window collects node
//! identifiers, each node is then configured, asked for its DIP switches
//! (which name its SDI-12 address), and put into network-synchronized
//! cyclic sleep. After that the controller rides the network's wake
//! cycle: every time the nodes wake it powers each node's probes, waits
//! out the warmup, samples the probes into the registry, and powers them
//! back down.
//!
//! The SDI-12 side is served lazily. When the protocol engine reports a
//! measurement request, the controller composes a value message from the
//! requested node's probe averages and moves it into the device's data
//! mailbox: immediately if that node has sampled before, otherwise as
//! soon as its next pass completes. A request the network cannot serve in
//! time simply expires on the protocol side.

use core::cell::Cell;

use capsules_sdi12::device::{DataMailbox, Sdi12Client};
use kernel::debug;
use kernel::hil::time::{Alarm, AlarmClient, ConvertTicks};
use kernel::hil::wsn::{LinkError, NodeId, NodePort, NodePortClient};
use kernel::utilities::cells::{OptionalCell, TakeCell};
use kernel::ErrorCode;

use crate::registry::{NodeRegistry, MAX_NODES, PROBES_PER_NODE};

/// How long discovery responses are collected.
pub const DISCOVERY_WINDOW_MS: u32 = 1_000;

/// Size of the value message buffer: placeholder, `+<value>` per probe,
/// and the slack the protocol side fills in.
pub const MESSAGE_BUFFER_LENGTH: usize = 32;

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
enum State {
    /// Not started.
    Idle,
    /// Collecting discovery responses until the window alarm.
    Discovery,
    /// Configuring inputs and pull-ups, one node at a time.
    ConfigureIo { index: usize },
    /// Learning each node's DIP-derived address.
    ReadSwitches { index: usize },
    /// Programming each node for cyclic sleep.
    EnterSleep { index: usize },
    /// Asleep; waiting for the network to wake.
    AwaitWake,
    /// Turning a node's probe supply on.
    PowerOn { address: u8 },
    /// Probe supply on; waiting out the electrical warmup.
    Warmup { address: u8 },
    /// Reading a node's probes.
    Sampling { address: u8, probe: usize },
    /// Turning the probe supply back off.
    PowerOff { address: u8 },
    /// Pass complete; waiting for the network to sleep.
    AwaitSleep,
    /// Discovery found nothing; nothing to bridge.
    Halted,
}

/// Drives the wireless network and produces SDI-12 data messages.
pub struct SessionController<'a, A: Alarm<'a>> {
    port: &'a dyn NodePort<'a>,
    alarm: &'a A,
    registry: &'a NodeRegistry,
    mailbox: &'a dyn DataMailbox,
    warmup_ms: u32,

    state: Cell<State>,
    discovered: Cell<[Option<NodeId>; MAX_NODES]>,
    discovered_count: Cell<usize>,
    /// Numeric address the protocol side wants data for.
    pending: OptionalCell<u8>,
    message: TakeCell<'static, [u8]>,
}

impl<'a, A: Alarm<'a>> SessionController<'a, A> {
    /// Create the controller.
    ///
    /// warmup_ms - probe supply settling time before sampling
    /// message - at least `MESSAGE_BUFFER_LENGTH` bytes
    pub fn new(
        port: &'a dyn NodePort<'a>,
        alarm: &'a A,
        registry: &'a NodeRegistry,
        mailbox: &'a dyn DataMailbox,
        warmup_ms: u32,
        message: &'static mut [u8],
    ) -> SessionController<'a, A> {
        SessionController {
            port,
            alarm,
            registry,
            mailbox,
            warmup_ms,
            state: Cell::new(State::Idle),
            discovered: Cell::new([None; MAX_NODES]),
            discovered_count: Cell::new(0),
            pending: OptionalCell::empty(),
            message: TakeCell::new(message),
        }
    }

    /// Open the discovery window. Must complete before the first SDI-12
    /// activity; the data logger is not listening yet.
    pub fn start(&self) -> Result<(), ErrorCode> {
        if self.state.get() != State::Idle {
            return Err(ErrorCode::ALREADY);
        }
        self.port.start_discovery()?;
        let now = self.alarm.now();
        self.alarm
            .set_alarm(now, self.alarm.ticks_from_ms(DISCOVERY_WINDOW_MS));
        self.state.set(State::Discovery);
        Ok(())
    }

    fn discovered_node(&self, index: usize) -> Option<NodeId> {
        self.discovered.get()[index]
    }

    fn configure_node(&self, index: usize) {
        if index >= self.discovered_count.get() {
            self.read_node_switches(0);
            return;
        }
        match self.discovered_node(index) {
            Some(node) => {
                self.state.set(State::ConfigureIo { index });
                if self.port.configure_io(node).is_err() {
                    debug!("wsn: io configuration request failed");
                    self.state.set(State::Halted);
                }
            }
            None => self.state.set(State::Halted),
        }
    }

    fn read_node_switches(&self, index: usize) {
        if index >= self.discovered_count.get() {
            self.sleep_node(0);
            return;
        }
        match self.discovered_node(index) {
            Some(node) => {
                self.state.set(State::ReadSwitches { index });
                if self.port.read_switches(node).is_err() {
                    debug!("wsn: switch sample request failed");
                    self.state.set(State::Halted);
                }
            }
            None => self.state.set(State::Halted),
        }
    }

    fn sleep_node(&self, index: usize) {
        if index >= self.discovered_count.get() {
            debug!("wsn: network up, {} nodes", self.discovered_count.get());
            self.state.set(State::AwaitWake);
            return;
        }
        match self.discovered_node(index) {
            Some(node) => {
                self.state.set(State::EnterSleep { index });
                if self.port.enter_cyclic_sleep(node).is_err() {
                    debug!("wsn: sleep configuration request failed");
                    self.state.set(State::Halted);
                }
            }
            None => self.state.set(State::Halted),
        }
    }

    /// First installed address at or after `from`.
    fn next_installed(&self, from: usize) -> Option<u8> {
        (from..MAX_NODES).find(|&a| self.registry.is_installed(a as u8)).map(|a| a as u8)
    }

    fn power_node(&self, address: u8, on: bool) {
        match self.registry.node_id(address) {
            None => self.finish_node(address),
            Some(node) => {
                self.state.set(if on {
                    State::PowerOn { address }
                } else {
                    State::PowerOff { address }
                });
                if self.port.set_probe_power(node, on).is_err() {
                    debug!("wsn: probe power request failed");
                    self.finish_node(address);
                }
            }
        }
    }

    fn sample_probe(&self, address: u8, probe: usize) {
        match self.registry.node_id(address) {
            None => self.finish_node(address),
            Some(node) => {
                self.state.set(State::Sampling { address, probe });
                if self.port.sample(node, probe).is_err() {
                    debug!("wsn: sample request failed");
                    self.power_node(address, false);
                }
            }
        }
    }

    /// Move the pass to the node after `address`, or wait for sleep.
    fn finish_node(&self, address: u8) {
        match self.next_installed(address as usize + 1) {
            Some(next) => self.power_node(next, true),
            None => self.state.set(State::AwaitSleep),
        }
    }

    /// Compose the pending value message and hand it to the protocol
    /// side. A refused delivery means the request expired; the buffer
    /// comes straight back and the request is dropped either way.
    fn compose_and_deliver(&self, address: u8) {
        let buffer = match self.message.take() {
            Some(buffer) => buffer,
            None => return,
        };
        self.compose_message(address, buffer);
        match self.mailbox.deliver_data(buffer) {
            Ok(()) => {}
            Err((_, buffer)) => {
                self.message.put(Some(buffer));
            }
        }
        self.pending.clear();
    }

    fn compose_message(&self, address: u8, buffer: &mut [u8]) {
        buffer.fill(0);
        // Placeholder; the protocol side overwrites it with the address.
        buffer[0] = 0xff;
        let mut at = 1;
        for probe in 0..PROBES_PER_NODE {
            at = write_value(buffer, at, self.registry.average(address, probe));
        }
    }
}

/// Append `+<value>` in ASCII, returning the next write position.
fn write_value(buffer: &mut [u8], mut at: usize, value: u16) -> usize {
    buffer[at] = b'+';
    at += 1;
    let mut digits = [0u8; 5];
    let mut remaining = value;
    let mut count = 0;
    loop {
        digits[count] = b'0' + (remaining % 10) as u8;
        remaining /= 10;
        count += 1;
        if remaining == 0 {
            break;
        }
    }
    while count > 0 {
        count -= 1;
        buffer[at] = digits[count];
        at += 1;
    }
    at
}

impl<'a, A: Alarm<'a>> AlarmClient for SessionController<'a, A> {
    fn alarm(&self) {
        match self.state.get() {
            State::Discovery => {
                let count = self.discovered_count.get();
                if count == 0 {
                    debug!("wsn: discovery found no nodes");
                    self.state.set(State::Halted);
                } else {
                    debug!("wsn: discovered {} nodes", count);
                    self.configure_node(0);
                }
            }
            State::Warmup { address } => self.sample_probe(address, 0),
            _ => {}
        }
    }
}

impl<'a, A: Alarm<'a>> NodePortClient for SessionController<'a, A> {
    fn node_discovered(&self, node: NodeId) {
        if self.state.get() != State::Discovery {
            return;
        }
        let mut list = self.discovered.get();
        let count = self.discovered_count.get();
        if count >= MAX_NODES || list[..count].contains(&Some(node)) {
            return;
        }
        list[count] = Some(node);
        self.discovered.set(list);
        self.discovered_count.set(count + 1);
    }

    fn io_configured(&self, _node: NodeId, result: Result<(), ErrorCode>) {
        if let State::ConfigureIo { index } = self.state.get() {
            if result.is_err() {
                debug!("wsn: node refused io configuration");
            }
            self.configure_node(index + 1);
        }
    }

    fn switches_read(&self, node: NodeId, switches: u8, result: Result<(), ErrorCode>) {
        if let State::ReadSwitches { index } = self.state.get() {
            match result {
                Ok(()) => {
                    if self.registry.install(switches, node).is_err() {
                        debug!("wsn: unusable switch setting {}", switches);
                    }
                }
                Err(_) => debug!("wsn: switch sample failed"),
            }
            self.read_node_switches(index + 1);
        }
    }

    fn sleep_entered(&self, _node: NodeId, result: Result<(), ErrorCode>) {
        if let State::EnterSleep { index } = self.state.get() {
            if result.is_err() {
                debug!("wsn: node refused sleep configuration");
            }
            self.sleep_node(index + 1);
        }
    }

    fn probe_power_set(&self, _node: NodeId, result: Result<(), ErrorCode>) {
        match self.state.get() {
            State::PowerOn { address } => {
                if result.is_err() {
                    self.finish_node(address);
                } else {
                    self.state.set(State::Warmup { address });
                    let now = self.alarm.now();
                    self.alarm
                        .set_alarm(now, self.alarm.ticks_from_ms(self.warmup_ms));
                }
            }
            State::PowerOff { address } => self.finish_node(address),
            _ => {}
        }
    }

    fn sample_ready(&self, _node: NodeId, probe: usize, value: u16, result: Result<(), ErrorCode>) {
        if let State::Sampling { address, probe: current } = self.state.get() {
            if probe != current {
                return;
            }
            if result.is_ok() {
                let _ = self.registry.record_sample(address, probe, value);
            }
            let next = probe + 1;
            if next < PROBES_PER_NODE {
                self.sample_probe(address, next);
            } else {
                self.registry.mark_sampled(address);
                if self.pending.contains(&address) {
                    self.compose_and_deliver(address);
                }
                self.power_node(address, false);
            }
        }
    }

    fn network_awake(&self) {
        if self.state.get() == State::AwaitWake {
            match self.next_installed(0) {
                Some(address) => self.power_node(address, true),
                None => self.state.set(State::AwaitSleep),
            }
        }
    }

    fn network_asleep(&self) {
        match self.state.get() {
            State::AwaitSleep => self.state.set(State::AwaitWake),
            State::PowerOn { .. }
            | State::Warmup { .. }
            | State::Sampling { .. }
            | State::PowerOff { .. } => {
                debug!("wsn: network slept mid-pass");
                let _ = self.alarm.disarm();
                self.state.set(State::AwaitWake);
            }
            _ => {}
        }
    }

    fn link_error(&self, node: NodeId, error: LinkError) {
        self.registry.record_link_error(node, error);
    }
}

impl<'a, A: Alarm<'a>> Sdi12Client for SessionController<'a, A> {
    fn measurement_requested(&self, address: u8) {
        self.pending.set(address);
        if self.registry.has_samples(address) {
            self.compose_and_deliver(address);
        }
    }

    fn data_complete(&self, buffer: &'static mut [u8]) {
        self.message.put(Some(buffer));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::SamplePolicy;
    use core::cell::RefCell;
    use kernel::hil::time::{Freq1MHz, Ticks32, Time};
    use std::boxed::Box;
    use std::vec::Vec;

    #[derive(Copy, Clone, PartialEq, Eq, Debug)]
    enum Op {
        Discover,
        ConfigureIo(NodeId),
        ReadSwitches(NodeId),
        Sleep(NodeId),
        Power(NodeId, bool),
        Sample(NodeId, usize),
    }

    struct FakePort {
        ops: RefCell<Vec<Op>>,
    }

    impl FakePort {
        fn new() -> FakePort {
            FakePort {
                ops: RefCell::new(Vec::new()),
            }
        }

        fn take_ops(&self) -> Vec<Op> {
            core::mem::take(&mut *self.ops.borrow_mut())
        }

        fn last_op(&self) -> Option<Op> {
            self.ops.borrow().last().copied()
        }
    }

    impl<'a> NodePort<'a> for FakePort {
        fn set_client(&self, _client: &'a dyn NodePortClient) {}
        fn start_discovery(&self) -> Result<(), ErrorCode> {
            self.ops.borrow_mut().push(Op::Discover);
            Ok(())
        }
        fn configure_io(&self, node: NodeId) -> Result<(), ErrorCode> {
            self.ops.borrow_mut().push(Op::ConfigureIo(node));
            Ok(())
        }
        fn read_switches(&self, node: NodeId) -> Result<(), ErrorCode> {
            self.ops.borrow_mut().push(Op::ReadSwitches(node));
            Ok(())
        }
        fn enter_cyclic_sleep(&self, node: NodeId) -> Result<(), ErrorCode> {
            self.ops.borrow_mut().push(Op::Sleep(node));
            Ok(())
        }
        fn set_probe_power(&self, node: NodeId, on: bool) -> Result<(), ErrorCode> {
            self.ops.borrow_mut().push(Op::Power(node, on));
            Ok(())
        }
        fn sample(&self, node: NodeId, probe: usize) -> Result<(), ErrorCode> {
            self.ops.borrow_mut().push(Op::Sample(node, probe));
            Ok(())
        }
    }

    struct FakeAlarm<'a> {
        now: Cell<Ticks32>,
        dt: Cell<Ticks32>,
        armed: Cell<bool>,
        client: OptionalCell<&'a dyn AlarmClient>,
    }

    impl FakeAlarm<'_> {
        fn new() -> Self {
            Self {
                now: Cell::new(0u32.into()),
                dt: Cell::new(0u32.into()),
                armed: Cell::new(false),
                client: OptionalCell::empty(),
            }
        }

        fn fire(&self) {
            assert!(self.armed.get());
            self.armed.set(false);
            self.client.map(|c| c.alarm());
        }
    }

    impl Time for FakeAlarm<'_> {
        type Frequency = Freq1MHz;
        type Ticks = Ticks32;

        fn now(&self) -> Ticks32 {
            self.now.get()
        }
    }

    impl<'a> Alarm<'a> for FakeAlarm<'a> {
        fn set_alarm_client(&self, client: &'a dyn AlarmClient) {
            self.client.set(client);
        }
        fn set_alarm(&self, _reference: Self::Ticks, dt: Self::Ticks) {
            self.dt.set(dt);
            self.armed.set(true);
        }
        fn get_alarm(&self) -> Self::Ticks {
            self.dt.get()
        }
        fn disarm(&self) -> Result<(), ErrorCode> {
            self.armed.set(false);
            Ok(())
        }
        fn is_armed(&self) -> bool {
            self.armed.get()
        }
        fn minimum_dt(&self) -> Self::Ticks {
            0u32.into()
        }
    }

    struct FakeMailbox {
        accept: Cell<bool>,
        delivered: TakeCell<'static, [u8]>,
    }

    impl FakeMailbox {
        fn new() -> FakeMailbox {
            FakeMailbox {
                accept: Cell::new(true),
                delivered: TakeCell::empty(),
            }
        }
    }

    impl DataMailbox for FakeMailbox {
        fn deliver_data(
            &self,
            buffer: &'static mut [u8],
        ) -> Result<(), (ErrorCode, &'static mut [u8])> {
            if self.accept.get() {
                self.delivered.put(Some(buffer));
                Ok(())
            } else {
                Err((ErrorCode::INVAL, buffer))
            }
        }
    }

    struct Fixture {
        port: &'static FakePort,
        alarm: &'static FakeAlarm<'static>,
        registry: &'static NodeRegistry,
        mailbox: &'static FakeMailbox,
        controller: &'static SessionController<'static, FakeAlarm<'static>>,
    }

    fn fixture() -> Fixture {
        let port: &'static FakePort = Box::leak(Box::new(FakePort::new()));
        let alarm: &'static FakeAlarm<'static> = Box::leak(Box::new(FakeAlarm::new()));
        let registry: &'static NodeRegistry =
            Box::leak(Box::new(NodeRegistry::new(SamplePolicy::new(1023, 0))));
        let mailbox: &'static FakeMailbox = Box::leak(Box::new(FakeMailbox::new()));
        let message = Box::leak(Box::new([0u8; MESSAGE_BUFFER_LENGTH]));
        let controller: &'static SessionController<'static, FakeAlarm<'static>> =
            Box::leak(Box::new(SessionController::new(
                port,
                alarm,
                registry,
                mailbox,
                20,
                &mut message[..],
            )));
        alarm.set_alarm_client(controller);
        Fixture {
            port,
            alarm,
            registry,
            mailbox,
            controller,
        }
    }

    const NODE_A: NodeId = NodeId(0x0013a200_4001_0001);
    const NODE_B: NodeId = NodeId(0x0013a200_4001_0002);

    /// Discovery plus per-node setup: A lands at address 3, B at 0.
    fn bring_up(f: &Fixture) {
        f.controller.start().unwrap();
        f.controller.node_discovered(NODE_A);
        f.controller.node_discovered(NODE_B);
        // Duplicate responses collapse.
        f.controller.node_discovered(NODE_A);
        f.alarm.fire();

        f.controller.io_configured(NODE_A, Ok(()));
        f.controller.io_configured(NODE_B, Ok(()));
        f.controller.switches_read(NODE_A, 3, Ok(()));
        f.controller.switches_read(NODE_B, 0, Ok(()));
        f.controller.sleep_entered(NODE_A, Ok(()));
        f.controller.sleep_entered(NODE_B, Ok(()));
    }

    /// One full wake pass with fixed probe readings.
    fn run_pass(f: &Fixture, values: [u16; 2]) {
        f.controller.network_awake();
        // Slot order: B at 0, then A at 3.
        for node in [NODE_B, NODE_A] {
            f.controller.probe_power_set(node, Ok(()));
            f.alarm.fire(); // warmup
            f.controller.sample_ready(node, 0, values[0], Ok(()));
            f.controller.sample_ready(node, 1, values[1], Ok(()));
            f.controller.probe_power_set(node, Ok(()));
        }
        f.controller.network_asleep();
    }

    #[test]
    fn discovery_and_setup() {
        let f = fixture();
        bring_up(&f);

        assert_eq!(
            f.port.take_ops(),
            [
                Op::Discover,
                Op::ConfigureIo(NODE_A),
                Op::ConfigureIo(NODE_B),
                Op::ReadSwitches(NODE_A),
                Op::ReadSwitches(NODE_B),
                Op::Sleep(NODE_A),
                Op::Sleep(NODE_B),
            ]
        );
        assert_eq!(f.registry.node_id(3), Some(NODE_A));
        assert_eq!(f.registry.node_id(0), Some(NODE_B));
        assert_eq!(f.controller.state.get(), State::AwaitWake);
    }

    #[test]
    fn empty_discovery_halts() {
        let f = fixture();
        f.controller.start().unwrap();
        f.alarm.fire();
        assert_eq!(f.controller.state.get(), State::Halted);
        assert_eq!(f.port.take_ops(), [Op::Discover]);
    }

    #[test]
    fn sampling_pass_fills_registry() {
        let f = fixture();
        bring_up(&f);
        f.port.take_ops();

        f.controller.network_awake();
        assert_eq!(f.port.last_op(), Some(Op::Power(NODE_B, true)));
        f.controller.probe_power_set(NODE_B, Ok(()));
        assert_eq!(f.controller.state.get(), State::Warmup { address: 0 });
        f.alarm.fire();
        assert_eq!(f.port.last_op(), Some(Op::Sample(NODE_B, 0)));
        f.controller.sample_ready(NODE_B, 0, 512, Ok(()));
        assert_eq!(f.port.last_op(), Some(Op::Sample(NODE_B, 1)));
        f.controller.sample_ready(NODE_B, 1, 498, Ok(()));
        assert_eq!(f.port.last_op(), Some(Op::Power(NODE_B, false)));
        f.controller.probe_power_set(NODE_B, Ok(()));

        // The pass moves on to the node at address 3.
        assert_eq!(f.port.last_op(), Some(Op::Power(NODE_A, true)));
        f.controller.probe_power_set(NODE_A, Ok(()));
        f.alarm.fire();
        f.controller.sample_ready(NODE_A, 0, 700, Ok(()));
        f.controller.sample_ready(NODE_A, 1, 701, Ok(()));
        f.controller.probe_power_set(NODE_A, Ok(()));
        assert_eq!(f.controller.state.get(), State::AwaitSleep);
        f.controller.network_asleep();
        assert_eq!(f.controller.state.get(), State::AwaitWake);

        assert_eq!(f.registry.average(0, 0), 512);
        assert_eq!(f.registry.average(0, 1), 498);
        assert_eq!(f.registry.average(3, 0), 700);
    }

    #[test]
    fn request_after_pass_delivers_immediately() {
        let f = fixture();
        bring_up(&f);
        run_pass(&f, [512, 498]);

        f.controller.measurement_requested(0);
        let delivered = f.mailbox.delivered.take().expect("no message delivered");
        assert_eq!(delivered[0], 0xff);
        assert_eq!(&delivered[1..9], b"+512+498");
        // The slack the protocol side needs is zeroed.
        assert!(delivered[9..].iter().all(|&b| b == 0));
        assert!(f.controller.pending.is_none());
    }

    #[test]
    fn request_before_pass_delivers_at_pass_end() {
        let f = fixture();
        bring_up(&f);

        f.controller.measurement_requested(0);
        assert!(f.mailbox.delivered.is_none());

        run_pass(&f, [300, 400]);
        let delivered = f.mailbox.delivered.take().expect("no message delivered");
        assert_eq!(&delivered[1..9], b"+300+400");
    }

    #[test]
    fn refused_delivery_reclaims_buffer() {
        let f = fixture();
        bring_up(&f);
        run_pass(&f, [512, 498]);

        // The protocol side gave up waiting.
        f.mailbox.accept.set(false);
        f.controller.measurement_requested(0);

        assert!(f.mailbox.delivered.is_none());
        assert!(f.controller.message.is_some());
        assert!(f.controller.pending.is_none());
    }

    #[test]
    fn returned_buffer_is_reused() {
        let f = fixture();
        bring_up(&f);
        run_pass(&f, [512, 498]);

        f.controller.measurement_requested(0);
        let buffer = f.mailbox.delivered.take().unwrap();
        f.controller.data_complete(buffer);

        f.controller.measurement_requested(3);
        let delivered = f.mailbox.delivered.take().expect("buffer not reused");
        assert_eq!(&delivered[1..9], b"+512+498");
    }

    #[test]
    fn value_formatting() {
        let mut buffer = [0u8; 16];
        let at = write_value(&mut buffer, 0, 0);
        assert_eq!(&buffer[..at], b"+0");
        let at = write_value(&mut buffer, 0, 7);
        assert_eq!(&buffer[..at], b"+7");
        let at = write_value(&mut buffer, 0, 65535);
        assert_eq!(&buffer[..at], b"+65535");
    }
}
