// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2024.

//! Arithmetic helpers for `Cell`s of numeric types.

use core::cell::Cell;
use core::ops::{Add, Sub};

/// Add `increment`/`decrement` and friends to `Cell<T>` for numeric `T`.
pub trait NumericCellExt<T> {
    /// Adds one to the stored value.
    fn increment(&self);

    /// Subtracts one from the stored value.
    fn decrement(&self);

    /// Adds `val` to the stored value.
    fn add(&self, val: T);

    /// Subtracts `val` from the stored value.
    fn subtract(&self, val: T);
}

impl<T> NumericCellExt<T> for Cell<T>
where
    T: Copy + Add<Output = T> + Sub<Output = T> + From<u8>,
{
    fn increment(&self) {
        self.set(self.get() + T::from(1));
    }

    fn decrement(&self) {
        self.set(self.get() - T::from(1));
    }

    fn add(&self, val: T) {
        self.set(self.get() + val);
    }

    fn subtract(&self, val: T) {
        self.set(self.get() - val);
    }
}

#[cfg(test)]
mod tests {
    use super::NumericCellExt;
    use core::cell::Cell;

    #[test]
    fn increment_and_add() {
        let cell: Cell<usize> = Cell::new(0);
        cell.increment();
        cell.add(4);
        assert_eq!(cell.get(), 5);
        cell.decrement();
        cell.subtract(2);
        assert_eq!(cell.get(), 2);
    }
}
