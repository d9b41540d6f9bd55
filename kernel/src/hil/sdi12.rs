// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2024.

//! Interface to the half-duplex SDI-12 line.
//!
//! SDI-12 runs a single shared data line at 1200 baud, 7 data bits, even
//! parity, one stop bit. One device drives the line at a time; everything
//! else listens. Protocol timing is carried in the line level itself (a
//! break is a long low, a mark is the idle high), so the interface exposes
//! raw level transitions alongside completed characters, and lets the
//! client hold the line at mark without an active transmitter.
//!
//! The three callbacks on [`Client`] are the three interrupt sources the
//! protocol state machine is driven from. Implementations call them from
//! interrupt context and never re-enter them.

use crate::ErrorCode;

/// Level of the data line, sampled atomically with an edge interrupt.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Level {
    /// Spacing level (active low).
    Low,
    /// Marking level (idle high).
    High,
}

/// Receive errors attached to a single character.
///
/// The implementation must read the error flags atomically with the
/// received character: reading the character may not clear the flags that
/// describe it before they are captured.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum CharacterError {
    /// Stop bit sampled low; the line may be in a break.
    Framing,
    /// A previous character was lost before it was read.
    Overrun,
    /// Even-parity check failed.
    Parity,
}

/// Half-duplex control of the SDI-12 line.
pub trait Line<'a> {
    /// Set the client receiving edge and character events.
    fn set_client(&self, client: &'a dyn Client);

    /// Configure the line for SDI-12 framing (1200 baud, 7E1).
    fn configure(&self) -> Result<(), ErrorCode>;

    /// Enable the receive path. Characters begin assembling but are not
    /// delivered until the receive interrupt is enabled.
    fn enable_receive(&self);
    fn disable_receive(&self);

    /// Enable delivery of [`Client::character_received`]. Kept separate
    /// from the receive path so a character already assembling can be
    /// picked up after the fact.
    fn enable_receive_interrupt(&self);
    fn disable_receive_interrupt(&self);

    /// Enable the transmitter and the external line-driver IC, and enable
    /// delivery of [`Client::character_transmitted`].
    fn enable_transmit(&self);
    fn disable_transmit(&self);

    /// Queue exactly one character. Only valid while transmit is enabled;
    /// [`Client::character_transmitted`] fires when it has left the wire.
    fn transmit_character(&self, character: u8);

    /// Drive the line to the marking level without an active transmitter.
    /// Used to hold mark during the gap between a received command and the
    /// response.
    fn hold_mark(&self);

    /// Stop driving the line; it returns to the bus-defined level.
    fn release_mark(&self);

    /// Enable delivery of [`Client::line_edge`] on every level change.
    fn enable_edge_interrupt(&self);
    fn disable_edge_interrupt(&self);
}

/// Callback client for line events. All methods run in interrupt context.
pub trait Client {
    /// The line changed level; `level` is the new level.
    fn line_edge(&self, level: Level);

    /// A character finished assembling. `result` carries the per-character
    /// error flags read atomically with the character itself.
    fn character_received(&self, character: u8, result: Result<(), CharacterError>);

    /// The previously queued character has completely left the wire.
    fn character_transmitted(&self);
}
