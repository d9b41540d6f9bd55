// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2024.

//! Re-export the cell types from the `tock-cells` crate.

pub use tock_cells::numeric_cell_ext::NumericCellExt;
pub use tock_cells::optional_cell::OptionalCell;
pub use tock_cells::take_cell::TakeCell;
