// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2024.

//! Wireless sensor network session layer.
//!
//! [`registry`] tracks the nodes the bridge speaks for and their sample
//! history; [`controller`] walks each node through discovery, setup, and
//! the periodic sampling pass, and produces the data buffers the SDI-12
//! side transmits.

#![forbid(unsafe_code)]
#![no_std]

#[cfg(test)]
extern crate std;

pub mod controller;
pub mod registry;
