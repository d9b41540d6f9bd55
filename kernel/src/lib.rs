// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2024.

//! Platform core for the SDI-12 wireless-sensor-network bridge.
//!
//! This crate holds the pieces every other crate in the tree builds on:
//! the error code type, the hardware interface layer traits that the
//! protocol and session capsules are written against, the cell utilities,
//! and a small `debug!` facility for diagnostic output.

#![no_std]

pub mod debug;
pub mod errorcode;
pub mod hil;
pub mod utilities;

pub use crate::errorcode::ErrorCode;
