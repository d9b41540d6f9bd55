// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2024.

//! Cell types for safe interior mutability without locking.

#![no_std]

pub mod numeric_cell_ext;
pub mod optional_cell;
pub mod take_cell;
