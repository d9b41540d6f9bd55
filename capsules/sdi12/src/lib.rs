// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2024.

//! SDI-12 sensor-side protocol engine.
//!
//! The bridge presents itself on the SDI-12 bus as one sensor per wireless
//! node. [`device`] holds the line-protocol state machine, [`command`] the
//! command classification and response composition, and [`crc`] the
//! CRC-16 used by `MC`-family commands.

#![forbid(unsafe_code)]
#![no_std]

#[cfg(test)]
extern crate std;

pub mod command;
pub mod crc;
pub mod device;
