// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2024.

//! Peripheral implementations for the ATmega1284P bridge MCU.
//!
//! Only the peripherals the bridge firmware uses are implemented: USART0
//! together with the INT0 edge sense and the line-driver direction pin as
//! the SDI-12 line (`usart`), and Timer1 in free-running compare mode as
//! the protocol alarm (`timer`). The board's interrupt vectors call the
//! corresponding `handle_*` methods.

#![no_std]

pub mod timer;
pub mod usart;

/// System clock. The bridge runs from the internal 8 MHz oscillator.
pub const CPU_FREQUENCY_HZ: u32 = 8_000_000;
