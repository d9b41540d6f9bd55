// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2024.

//! SDI-12 line-protocol state machine.
//!
//! Presents the bridge on the SDI-12 bus as one sensor per wireless node.
//! The machine is driven entirely from three interrupt sources exposed by
//! [`kernel::hil::sdi12::Line`] (edge change, character received,
//! character transmitted) plus one alarm, composed into the protocol
//! schedule: break detection, break and mark validation, address
//! filtering, command reception, the held mark before a response, the
//! service-request window after a measurement, and the post-service-request
//! data command with or without a second break.
//!
//! Wireless data moves through a one-slot mailbox. When an `M` command
//! acknowledgement finishes transmitting, the device raises
//! [`Sdi12Client::measurement_requested`]; the session layer answers with
//! [`Sdi12Device::deliver_data`], moving in a buffer of value characters.
//! The buffer comes back through [`Sdi12Client::data_complete`] once the
//! host has collected the data or the transaction died.
//!
//! Usage
//! -----
//!
//! ```rust,ignore
//! let device = static_init!(
//!     capsules_sdi12::device::Sdi12Device<'static, Timer1Alarm>,
//!     capsules_sdi12::device::Sdi12Device::new(
//!         usart,
//!         timer1,
//!         registry,
//!         IDENTITY,
//!         MEASURE_WAIT_S,
//!         wsn::registry::PROBES_PER_NODE as u8,
//!         &mut RX_BUFFER,
//!         &mut TX_BUFFER,
//!     )
//! );
//! usart.set_client(device);
//! timer1.set_alarm_client(device);
//! device.set_client(controller);
//! device.initialize();
//! ```

use core::cell::Cell;

use kernel::hil::sdi12;
use kernel::hil::sdi12::{CharacterError, Level};
use kernel::hil::time::{Alarm, AlarmClient, ConvertTicks, Ticks};
use kernel::utilities::cells::{NumericCellExt, OptionalCell, TakeCell};
use kernel::ErrorCode;

use crate::command;
use crate::command::{Command, Identity};

/// Receive buffer size. The longest implemented command frame is five
/// characters; the standard caps the rest.
pub const RX_BUFFER_LENGTH: usize = 10;

/// Transmit buffer size for locally composed responses. The identity
/// response is the longest at 22 characters.
pub const TX_BUFFER_LENGTH: usize = 40;

// Protocol schedule. Durations are from the SDI-12 v1.3 timing tables;
// the odd-looking mark minimum is one 8.33 ms character time quantized to
// the original compare-timer grid.
const BREAK_MINIMUM_US: u32 = 12_000;
const MARK_MINIMUM_US: u32 = 8_190;
const RESPONSE_MARK_US: u32 = 8_450;
const LINE_FAULT_MS: u32 = 100;
const FIRST_CHARACTER_MS: u32 = 100;
const INTER_CHARACTER_MS: u32 = 12;
const SRQ_TICK_MS: u32 = 100;
const SRQ_TICKS_PER_SECOND: u8 = 10;
const DIRECT_DATA_WINDOW_MS: u32 = 85;
const LATE_BREAK_MS: u32 = 200;
const DATA_CHARACTER_MS: u32 = 10;
const CHARACTER_LOW_MAXIMUM_US: u32 = 8_190;

/// Protocol states.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
enum State {
    /// Awaiting a falling edge opening a possible break.
    Idle,
    /// Line is low; awaiting the rising edge that ends the break.
    TestBreak,
    /// Valid break seen; awaiting the end of the post-break mark.
    TestMark,
    /// Mark satisfied; awaiting the first command character.
    WaitActive,
    /// Address accepted; collecting characters up to the terminator.
    WaitChar,
    /// Command received; holding mark before the response starts.
    SendMark,
    /// Transmitting the response character by character.
    SendResponse,
    /// `M` acknowledged; awaiting wireless data, timeout, or abort break.
    WaitSrq,
    /// Transmitting the unsolicited service request.
    SendSrq,
    /// Service request sent; the host may answer directly or with a break.
    WaitDataBreak,
    /// Transition inside the direct window; classifying it.
    DataTest,
    /// Direct window expired; a full break is now required.
    WaitDataBreakLate,
    /// Leading edge of the post-window break; testing its length.
    DataBreak,
    /// First character of a no-break data command is assembling.
    DataChar,
    /// Falling edge during the service-request wait; abort candidate.
    AbortBreak,
}

/// Which measurement-family command is outstanding. At most one is, by
/// construction.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
enum MeasurementKind {
    Measure,
    Concurrent,
    Verify,
}

/// The outstanding measurement transaction, alive from the accepted
/// `M`/`C`/`V` command until the matching data command completes, the
/// host aborts, or a terminal timeout clears the bus.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
struct Measurement {
    kind: MeasurementKind,
    /// Append a CRC to the data response (`MC`/`CC` spellings).
    crc: bool,
    /// The digit the matching data command must carry.
    index: u8,
    /// ASCII address the conversation is locked to.
    address: u8,
    /// Numeric form of `address`, handed to the session layer.
    numeric: u8,
}

/// Where the response characters come from.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
enum TxSource {
    /// The local composition buffer.
    Local,
    /// The wireless data mailbox, composed in place.
    Data,
}

/// What happens when the response finishes transmitting.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
enum Continuation {
    /// Return the bus to idle.
    Complete,
    /// Enter the service-request wait and signal the session layer.
    StartSrqWait,
    /// The data conversation is over; clear it and return to idle.
    DataComplete,
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
enum Update {
    /// Leave the outstanding measurement alone.
    Keep,
    /// Install a new outstanding measurement.
    Set(Measurement),
}

/// Parse outcome, stashed at `SendMark` entry and applied in one step when
/// the mark-hold alarm fires. `None` means silence, the standard's answer
/// to anything malformed.
#[derive(Copy, Clone)]
struct PendingResponse {
    source: TxSource,
    len: usize,
    continuation: Continuation,
    update: Update,
}

/// Events the device raises toward the session layer.
pub trait Sdi12Client {
    /// The host asked address `address` (numeric form) for a measurement.
    /// Data should be produced with [`Sdi12Device::deliver_data`] before
    /// the service-request window closes.
    fn measurement_requested(&self, address: u8);

    /// A previously delivered data buffer is no longer needed; ownership
    /// returns to the producer.
    fn data_complete(&self, buffer: &'static mut [u8]);
}

/// The set of bus addresses this bridge answers for.
pub trait AddressBook {
    /// Does the bridge speak for numeric address `address`?
    fn is_configured(&self, address: u8) -> bool;

    /// Number of configured addresses.
    fn count(&self) -> usize;

    /// Numeric address at ring position `index`, `index < count()`.
    fn get(&self, index: usize) -> Option<u8>;
}

/// Accepts wireless data buffers for transmission. Implemented by
/// [`Sdi12Device`]; referenced by the session layer so it does not need
/// the device's alarm type parameter.
pub trait DataMailbox {
    /// Move a prepared data buffer into the device. Accepted only while a
    /// measurement transaction is alive; otherwise the buffer comes
    /// straight back.
    fn deliver_data(
        &self,
        buffer: &'static mut [u8],
    ) -> Result<(), (ErrorCode, &'static mut [u8])>;
}

/// SDI-12 sensor-side protocol engine.
pub struct Sdi12Device<'a, A: Alarm<'a>> {
    line: &'a dyn sdi12::Line<'a>,
    alarm: &'a A,
    addresses: &'a dyn AddressBook,
    client: OptionalCell<&'a dyn Sdi12Client>,
    identity: Identity,
    measure_wait: u8,
    num_values: u8,

    state: Cell<State>,
    edge_reference: Cell<A::Ticks>,
    rx_buffer: TakeCell<'static, [u8]>,
    rx_index: Cell<usize>,
    rx_address: Cell<u8>,
    tx_buffer: TakeCell<'static, [u8]>,
    tx_index: Cell<usize>,
    tx_len: Cell<usize>,
    tx_source: Cell<TxSource>,
    continuation: Cell<Continuation>,
    pending: Cell<Option<PendingResponse>>,
    measurement: Cell<Option<Measurement>>,
    data: TakeCell<'static, [u8]>,
    srq_ticks: Cell<u8>,
    query_index: Cell<usize>,
    aborted: Cell<bool>,
}

impl<'a, A: Alarm<'a>> Sdi12Device<'a, A> {
    /// Create the protocol engine.
    ///
    /// line - half-duplex SDI-12 line driver
    /// alarm - alarm with at least millisecond resolution
    /// addresses - the addresses the bridge answers for
    /// measure_wait - seconds reported in `M` acknowledgements, in [1,4]
    /// num_values - value count reported in `M` acknowledgements
    /// rx_buffer / tx_buffer - at least `RX_BUFFER_LENGTH` /
    ///     `TX_BUFFER_LENGTH` bytes
    pub fn new(
        line: &'a dyn sdi12::Line<'a>,
        alarm: &'a A,
        addresses: &'a dyn AddressBook,
        identity: Identity,
        measure_wait: u8,
        num_values: u8,
        rx_buffer: &'static mut [u8],
        tx_buffer: &'static mut [u8],
    ) -> Sdi12Device<'a, A> {
        for byte in rx_buffer.iter_mut() {
            *byte = 0;
        }
        for byte in tx_buffer.iter_mut() {
            *byte = 0;
        }

        Sdi12Device {
            line,
            alarm,
            addresses,
            client: OptionalCell::empty(),
            identity,
            measure_wait,
            num_values,
            state: Cell::new(State::Idle),
            edge_reference: Cell::new(A::Ticks::from(0)),
            rx_buffer: TakeCell::new(rx_buffer),
            rx_index: Cell::new(0),
            rx_address: Cell::new(0),
            tx_buffer: TakeCell::new(tx_buffer),
            tx_index: Cell::new(0),
            tx_len: Cell::new(0),
            tx_source: Cell::new(TxSource::Local),
            continuation: Cell::new(Continuation::Complete),
            pending: Cell::new(None),
            measurement: Cell::new(None),
            data: TakeCell::empty(),
            srq_ticks: Cell::new(0),
            query_index: Cell::new(0),
            aborted: Cell::new(false),
        }
    }

    pub fn set_client(&self, client: &'a dyn Sdi12Client) {
        self.client.set(client);
    }

    /// Put the line into the listening state. Call once at boot, after the
    /// line driver is configured.
    pub fn initialize(&self) {
        let _ = self.line.configure();
        self.line.disable_receive();
        self.line.disable_receive_interrupt();
        self.line.disable_transmit();
        self.line.release_mark();
        self.line.enable_edge_interrupt();
        self.state.set(State::Idle);
    }

    fn arm_ms(&self, ms: u32) {
        let now = self.alarm.now();
        self.alarm.set_alarm(now, self.alarm.ticks_from_ms(ms));
    }

    fn arm_us_from_edge(&self, us: u32) {
        let now = self.alarm.now();
        self.edge_reference.set(now);
        self.alarm.set_alarm(now, self.alarm.ticks_from_us(us));
    }

    fn arm_ms_from_edge(&self, ms: u32) {
        let now = self.alarm.now();
        self.edge_reference.set(now);
        self.alarm.set_alarm(now, self.alarm.ticks_from_ms(ms));
    }

    /// Microseconds since the transition that opened the current window.
    fn elapsed_us(&self) -> u32 {
        let delta = self.alarm.now().wrapping_sub(self.edge_reference.get());
        self.alarm.ticks_to_us(delta)
    }

    /// Return the bus to idle. Terminal timeouts additionally clear the
    /// outstanding measurement; clean completions leave it for the
    /// follow-on data command.
    fn reset_to_idle(&self, clear_measurement: bool) {
        let _ = self.alarm.disarm();
        self.line.disable_receive_interrupt();
        self.line.disable_receive();
        self.line.disable_transmit();
        self.line.release_mark();
        self.line.enable_edge_interrupt();
        self.rx_index.set(0);
        self.rx_buffer.map(|buf| buf.fill(0));
        self.pending.set(None);
        if clear_measurement || self.aborted.get() {
            self.measurement.set(None);
        }
        self.aborted.set(false);
        if let Some(buffer) = self.data.take() {
            self.client.map(move |client| client.data_complete(buffer));
        }
        self.state.set(State::Idle);
    }

    /// Accept or discard the first character after a validated break+mark
    /// (or arriving directly after a service request).
    fn first_character(&self, byte: u8) {
        let accepted = match self.measurement.get() {
            // An outstanding conversation locks the bus to its address;
            // `?` is not acceptable as a follow-on.
            Some(m) => byte == m.address,
            None => {
                byte == b'?'
                    || command::numeric_address(byte)
                        .is_some_and(|numeric| self.addresses.is_configured(numeric))
            }
        };
        if !accepted {
            self.reset_to_idle(false);
            return;
        }

        self.rx_buffer.map(|buf| {
            buf.fill(0);
            buf[0] = byte;
        });
        self.rx_index.set(1);
        self.rx_address.set(byte);
        self.aborted.set(false);
        self.state.set(State::WaitChar);
        self.arm_ms_from_edge(INTER_CHARACTER_MS);
    }

    fn next_character(&self, byte: u8) {
        let index = self.rx_index.get();
        let stored = self.rx_buffer.map_or(false, |buf| {
            if index < buf.len() {
                buf[index] = byte;
                true
            } else {
                false
            }
        });
        if !stored {
            self.reset_to_idle(false);
            return;
        }
        self.rx_index.set(index + 1);

        if byte == command::TERMINATOR {
            self.finish_command();
        } else {
            self.arm_ms_from_edge(INTER_CHARACTER_MS);
        }
    }

    /// Terminator received: hold mark, classify, and stash the outcome for
    /// the mark-hold alarm to apply.
    fn finish_command(&self) {
        self.line.disable_receive_interrupt();
        self.line.disable_receive();
        self.line.hold_mark();
        self.arm_us_from_edge(RESPONSE_MARK_US);
        let outcome = self.parse();
        self.pending.set(outcome);
        self.state.set(State::SendMark);
    }

    /// Classify the received frame and compose its response. Returns
    /// `None` for anything answered by silence.
    fn parse(&self) -> Option<PendingResponse> {
        let address = self.rx_address.get();
        let len = self.rx_index.get();
        let cmd = self
            .rx_buffer
            .map_or(Command::Unsupported, |buf| command::classify(&buf[..len]));

        match cmd {
            Command::Acknowledge => self.local_response(
                |buf| command::build_acknowledge(address, buf),
                Continuation::Complete,
                Update::Keep,
            ),
            Command::Identify => self.local_response(
                |buf| command::build_identify(address, &self.identity, buf),
                Continuation::Complete,
                Update::Keep,
            ),
            Command::Query => {
                let count = self.addresses.count();
                if count == 0 {
                    return None;
                }
                let index = self.query_index.get() % count;
                self.query_index.set((index + 1) % count);
                let numeric = self.addresses.get(index)?;
                let ascii = command::ascii_address(numeric)?;
                self.local_response(
                    |buf| command::build_acknowledge(ascii, buf),
                    Continuation::Complete,
                    Update::Keep,
                )
            }
            Command::Measure { crc, index } => {
                let numeric = command::numeric_address(address)?;
                let measurement = Measurement {
                    kind: MeasurementKind::Measure,
                    crc,
                    index,
                    address,
                    numeric,
                };
                self.local_response(
                    |buf| command::build_measure_ack(address, self.measure_wait, self.num_values, buf),
                    Continuation::StartSrqWait,
                    Update::Set(measurement),
                )
            }
            Command::Concurrent { crc, index } => {
                let numeric = command::numeric_address(address)?;
                let measurement = Measurement {
                    kind: MeasurementKind::Concurrent,
                    crc,
                    index,
                    address,
                    numeric,
                };
                self.local_response(
                    |buf| command::build_measure_ack(address, self.measure_wait, self.num_values, buf),
                    Continuation::Complete,
                    Update::Set(measurement),
                )
            }
            Command::Verify => {
                let numeric = command::numeric_address(address)?;
                let measurement = Measurement {
                    kind: MeasurementKind::Verify,
                    crc: false,
                    index: 0,
                    address,
                    numeric,
                };
                self.local_response(
                    |buf| command::build_measure_ack(address, self.measure_wait, self.num_values, buf),
                    Continuation::Complete,
                    Update::Set(measurement),
                )
            }
            Command::Data { index } => match self.measurement.get() {
                Some(measurement) => {
                    if index != measurement.index {
                        return None;
                    }
                    if self.data.is_some() {
                        let len = self
                            .data
                            .map(|buf| command::compose_data(address, buf, measurement.crc))??;
                        Some(PendingResponse {
                            source: TxSource::Data,
                            len,
                            continuation: Continuation::DataComplete,
                            update: Update::Keep,
                        })
                    } else {
                        self.local_response(
                            |buf| command::build_no_data(address, buf),
                            Continuation::DataComplete,
                            Update::Keep,
                        )
                    }
                }
                // No measurement outstanding: `aD0!` reports no data, a
                // nonzero index is a protocol error.
                None => {
                    if index != 0 {
                        return None;
                    }
                    self.local_response(
                        |buf| command::build_no_data(address, buf),
                        Continuation::Complete,
                        Update::Keep,
                    )
                }
            },
            Command::Unsupported => None,
        }
    }

    fn local_response<F>(
        &self,
        compose: F,
        continuation: Continuation,
        update: Update,
    ) -> Option<PendingResponse>
    where
        F: FnOnce(&mut [u8]) -> usize,
    {
        let len = self.tx_buffer.map(compose)?;
        Some(PendingResponse {
            source: TxSource::Local,
            len,
            continuation,
            update,
        })
    }

    /// Mark hold elapsed: apply the stashed outcome in one step and start
    /// transmitting, or fall silent.
    fn begin_response(&self) {
        match self.pending.take() {
            None => self.reset_to_idle(false),
            Some(response) => {
                if let Update::Set(measurement) = response.update {
                    self.measurement.set(Some(measurement));
                }
                self.line.release_mark();
                self.line.enable_transmit();
                self.tx_source.set(response.source);
                self.tx_len.set(response.len);
                self.tx_index.set(0);
                self.continuation.set(response.continuation);
                self.state.set(State::SendResponse);
                self.transmit_current();
            }
        }
    }

    fn transmit_current(&self) {
        let index = self.tx_index.get();
        let byte = match self.tx_source.get() {
            TxSource::Local => self.tx_buffer.map_or(0, |buf| buf[index]),
            TxSource::Data => self.data.map_or(0, |buf| buf[index]),
        };
        self.line.transmit_character(byte);
    }

    /// The last response character left the wire.
    fn response_complete(&self) {
        match self.continuation.get() {
            Continuation::Complete => self.reset_to_idle(false),
            Continuation::DataComplete => {
                self.measurement.set(None);
                self.reset_to_idle(false);
            }
            Continuation::StartSrqWait => {
                self.line.disable_transmit();
                self.line.enable_edge_interrupt();
                self.srq_ticks.set(0);
                self.arm_ms(SRQ_TICK_MS);
                self.state.set(State::WaitSrq);
                if let Some(measurement) = self.measurement.get() {
                    self.client
                        .map(|client| client.measurement_requested(measurement.numeric));
                }
            }
        }
    }

    /// A 100 ms service-request tick. Data present sends the service
    /// request; an exhausted window abandons the measurement.
    fn srq_tick(&self) {
        self.srq_ticks.increment();
        if self.data.is_some() {
            self.begin_service_request();
        } else if self.srq_ticks.get() >= SRQ_TICKS_PER_SECOND * self.measure_wait {
            self.reset_to_idle(true);
        } else {
            self.arm_ms(SRQ_TICK_MS);
        }
    }

    fn begin_service_request(&self) {
        let address = self
            .measurement
            .get()
            .map_or(self.rx_address.get(), |m| m.address);
        match self.tx_buffer.map(|buf| command::build_acknowledge(address, buf)) {
            None => self.reset_to_idle(true),
            Some(len) => {
                let _ = self.alarm.disarm();
                self.line.disable_edge_interrupt();
                self.line.enable_transmit();
                self.tx_source.set(TxSource::Local);
                self.tx_len.set(len);
                self.tx_index.set(0);
                self.state.set(State::SendSrq);
                self.transmit_current();
            }
        }
    }

    /// Service request fully sent: open the window in which the host may
    /// answer directly or open a new break.
    fn service_request_complete(&self) {
        self.line.disable_transmit();
        self.line.enable_receive();
        self.line.enable_edge_interrupt();
        self.arm_ms_from_edge(DIRECT_DATA_WINDOW_MS);
        self.state.set(State::WaitDataBreak);
    }

    /// Abort break validated: the measurement dies with the reset after
    /// the bare acknowledgement goes out on the standard schedule.
    fn begin_abort_response(&self) {
        let address = self
            .measurement
            .get()
            .map_or(self.rx_address.get(), |m| m.address);
        if let Some(buffer) = self.data.take() {
            self.client.map(move |client| client.data_complete(buffer));
        }
        self.aborted.set(true);
        self.line.disable_edge_interrupt();
        self.line.hold_mark();
        let outcome = self.local_response(
            |buf| command::build_acknowledge(address, buf),
            Continuation::Complete,
            Update::Keep,
        );
        self.pending.set(outcome);
        self.arm_us_from_edge(RESPONSE_MARK_US);
        self.state.set(State::SendMark);
    }

    /// A character error looks like the line being yanked around by a
    /// break: a framing error means the line is still low, anything else
    /// that the break may already be over.
    fn character_error(&self, error: CharacterError) {
        self.line.disable_receive_interrupt();
        self.line.disable_receive();
        self.line.enable_edge_interrupt();
        match error {
            CharacterError::Framing => {
                self.arm_ms_from_edge(LINE_FAULT_MS);
                self.state.set(State::TestBreak);
            }
            CharacterError::Overrun | CharacterError::Parity => {
                self.arm_us_from_edge(MARK_MINIMUM_US);
                self.state.set(State::TestMark);
            }
        }
    }
}

impl<'a, A: Alarm<'a>> DataMailbox for Sdi12Device<'a, A> {
    fn deliver_data(
        &self,
        buffer: &'static mut [u8],
    ) -> Result<(), (ErrorCode, &'static mut [u8])> {
        let in_transaction = matches!(
            self.state.get(),
            State::SendMark | State::SendResponse | State::WaitSrq
        );
        // Only an `M`-family transaction ever has wireless data to wait
        // for; `C` and `V` conversations poll into the no-data response.
        let wants_data = self
            .measurement
            .get()
            .is_some_and(|m| m.kind == MeasurementKind::Measure);
        if !in_transaction || !wants_data {
            return Err((ErrorCode::INVAL, buffer));
        }
        if self.data.is_some() {
            return Err((ErrorCode::BUSY, buffer));
        }
        self.data.replace(buffer);
        Ok(())
    }
}

impl<'a, A: Alarm<'a>> sdi12::Client for Sdi12Device<'a, A> {
    fn line_edge(&self, level: Level) {
        match (self.state.get(), level) {
            (State::Idle, Level::Low) => {
                self.arm_ms_from_edge(LINE_FAULT_MS);
                self.state.set(State::TestBreak);
            }

            (State::TestBreak, Level::High) => {
                if self.elapsed_us() >= BREAK_MINIMUM_US {
                    self.arm_us_from_edge(MARK_MINIMUM_US);
                    self.state.set(State::TestMark);
                } else {
                    // Too short to be a break.
                    self.reset_to_idle(false);
                }
            }

            // A falling edge before the mark is satisfied is the start of
            // a fresh break.
            (State::TestMark, Level::Low) => {
                self.arm_ms_from_edge(LINE_FAULT_MS);
                self.state.set(State::TestBreak);
            }

            (State::WaitSrq, Level::Low) => {
                self.arm_ms_from_edge(LINE_FAULT_MS);
                self.state.set(State::AbortBreak);
            }

            (State::AbortBreak, Level::High) => {
                if self.elapsed_us() >= BREAK_MINIMUM_US {
                    self.begin_abort_response();
                } else {
                    // Noise; the service-request wait continues.
                    self.arm_ms(SRQ_TICK_MS);
                    self.state.set(State::WaitSrq);
                }
            }

            (State::WaitDataBreak, Level::Low) => {
                self.arm_ms_from_edge(LINE_FAULT_MS);
                self.state.set(State::DataTest);
            }

            (State::DataTest, Level::High) => {
                let elapsed = self.elapsed_us();
                if elapsed < CHARACTER_LOW_MAXIMUM_US {
                    // A character is assembling; pick it up.
                    self.line.disable_edge_interrupt();
                    self.line.enable_receive_interrupt();
                    self.arm_ms_from_edge(DATA_CHARACTER_MS);
                    self.state.set(State::DataChar);
                } else if elapsed < BREAK_MINIMUM_US {
                    // Too long for a character, too short for a break.
                    self.reset_to_idle(true);
                } else {
                    self.arm_us_from_edge(MARK_MINIMUM_US);
                    self.state.set(State::TestMark);
                }
            }

            (State::WaitDataBreakLate, Level::Low) => {
                self.arm_ms_from_edge(LINE_FAULT_MS);
                self.state.set(State::DataBreak);
            }

            (State::DataBreak, Level::High) => {
                if self.elapsed_us() >= BREAK_MINIMUM_US {
                    self.arm_us_from_edge(MARK_MINIMUM_US);
                    self.state.set(State::TestMark);
                } else {
                    // Noise; keep waiting for the real break.
                    self.arm_ms_from_edge(LATE_BREAK_MS);
                    self.state.set(State::WaitDataBreakLate);
                }
            }

            _ => {}
        }
    }

    fn character_received(&self, character: u8, result: Result<(), CharacterError>) {
        match result {
            Err(error) => match self.state.get() {
                State::WaitActive | State::WaitChar | State::DataChar => {
                    self.character_error(error)
                }
                _ => {}
            },
            Ok(()) => match self.state.get() {
                State::WaitActive | State::DataChar => self.first_character(character),
                State::WaitChar => self.next_character(character),
                _ => {}
            },
        }
    }

    fn character_transmitted(&self) {
        match self.state.get() {
            State::SendResponse => {
                let next = self.tx_index.get() + 1;
                if next < self.tx_len.get() {
                    self.tx_index.set(next);
                    self.transmit_current();
                } else {
                    self.response_complete();
                }
            }
            State::SendSrq => {
                let next = self.tx_index.get() + 1;
                if next < self.tx_len.get() {
                    self.tx_index.set(next);
                    self.transmit_current();
                } else {
                    self.service_request_complete();
                }
            }
            _ => {}
        }
    }
}

impl<'a, A: Alarm<'a>> AlarmClient for Sdi12Device<'a, A> {
    fn alarm(&self) {
        match self.state.get() {
            // Line stuck low.
            State::TestBreak => self.reset_to_idle(true),

            // Mark satisfied: listen for the first command character.
            State::TestMark => {
                self.line.disable_edge_interrupt();
                self.line.enable_receive();
                self.line.enable_receive_interrupt();
                self.arm_ms_from_edge(FIRST_CHARACTER_MS);
                self.state.set(State::WaitActive);
            }

            // No, or no more, command characters.
            State::WaitActive | State::WaitChar => self.reset_to_idle(true),

            State::SendMark => self.begin_response(),

            State::WaitSrq => self.srq_tick(),

            // Direct-answer window expired; a full break is now required.
            State::WaitDataBreak => {
                self.arm_ms_from_edge(LATE_BREAK_MS);
                self.state.set(State::WaitDataBreakLate);
            }

            State::DataTest
            | State::WaitDataBreakLate
            | State::DataBreak
            | State::DataChar
            | State::AbortBreak => self.reset_to_idle(true),

            State::Idle | State::SendResponse | State::SendSrq => {}
        }
    }
}
