// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2024.

//! Timer1 compare channel A as the protocol alarm.
//!
//! The counter free-runs at `CPU_FREQUENCY_HZ / 64` and the compare
//! channel produces the single deadline the protocol engine re-arms from
//! state to state. Sixteen bits at this rate wrap every 524 ms; the
//! compile-time check below pins the longest protocol deadline safely
//! inside that.

use kernel::hil::time::{Alarm, AlarmClient, Frequency, Ticks, Ticks16, Time};
use kernel::utilities::cells::OptionalCell;
use kernel::utilities::StaticRef;
use kernel::ErrorCode;
use tock_registers::interfaces::{ReadWriteable, Readable, Writeable};
use tock_registers::registers::ReadWrite;
use tock_registers::{register_bitfields, register_structs};

/// Counter rate behind the /64 prescaler.
pub const TIMER_FREQUENCY_HZ: u32 = crate::CPU_FREQUENCY_HZ / 64;

/// Longest deadline the protocol engine ever arms, in milliseconds: the
/// failsafe on the post-service-request break wait.
const MAX_DEADLINE_MS: u64 = 200;

// Every protocol deadline must fit the 16-bit counter range.
const _: () = assert!(MAX_DEADLINE_MS * TIMER_FREQUENCY_HZ as u64 / 1000 <= u16::MAX as u64);

/// 125KHz `Frequency`
#[derive(Debug)]
pub enum Freq125KHz {}
impl Frequency for Freq125KHz {
    fn frequency() -> u32 {
        TIMER_FREQUENCY_HZ
    }
}

register_structs! {
    pub Timer1Registers {
        (0x000 => tccr1a: ReadWrite<u8, TCCR1A::Register>),
        (0x001 => tccr1b: ReadWrite<u8, TCCR1B::Register>),
        (0x002 => tccr1c: ReadWrite<u8>),
        (0x003 => _reserved0),
        (0x004 => tcnt1l: ReadWrite<u8>),
        (0x005 => tcnt1h: ReadWrite<u8>),
        (0x006 => icr1l: ReadWrite<u8>),
        (0x007 => icr1h: ReadWrite<u8>),
        (0x008 => ocr1al: ReadWrite<u8>),
        (0x009 => ocr1ah: ReadWrite<u8>),
        (0x00a => ocr1bl: ReadWrite<u8>),
        (0x00b => ocr1bh: ReadWrite<u8>),
        (0x00c => @END),
    },

    pub TimerMaskRegisters {
        (0x000 => timsk1: ReadWrite<u8, TIMSK1::Register>),
        (0x001 => @END),
    },

    pub TimerFlagRegisters {
        (0x000 => tifr1: ReadWrite<u8, TIFR1::Register>),
        (0x001 => @END),
    }
}

register_bitfields![u8,
    TCCR1A [
        COM1A OFFSET(6) NUMBITS(2) [],
        COM1B OFFSET(4) NUMBITS(2) [],
        WGM1LO OFFSET(0) NUMBITS(2) []
    ],
    TCCR1B [
        ICNC1 OFFSET(7) NUMBITS(1) [],
        ICES1 OFFSET(6) NUMBITS(1) [],
        WGM1HI OFFSET(3) NUMBITS(2) [],
        CS1 OFFSET(0) NUMBITS(3) [
            Off = 0,
            Div1 = 1,
            Div8 = 2,
            Div64 = 3,
            Div256 = 4,
            Div1024 = 5
        ]
    ],
    TIMSK1 [
        ICIE1 OFFSET(5) NUMBITS(1) [],
        OCIE1B OFFSET(2) NUMBITS(1) [],
        OCIE1A OFFSET(1) NUMBITS(1) [],
        TOIE1 OFFSET(0) NUMBITS(1) []
    ],
    TIFR1 [
        ICF1 OFFSET(5) NUMBITS(1) [],
        OCF1B OFFSET(2) NUMBITS(1) [],
        OCF1A OFFSET(1) NUMBITS(1) [],
        TOV1 OFFSET(0) NUMBITS(1) []
    ]
];

const TIMER1_BASE: StaticRef<Timer1Registers> =
    unsafe { StaticRef::new(0x0080 as *const Timer1Registers) };
const TIMER1_MASK_BASE: StaticRef<TimerMaskRegisters> =
    unsafe { StaticRef::new(0x006f as *const TimerMaskRegisters) };
const TIMER1_FLAG_BASE: StaticRef<TimerFlagRegisters> =
    unsafe { StaticRef::new(0x0036 as *const TimerFlagRegisters) };

/// Timer1 as a free-running counter with one compare deadline.
pub struct Timer1Alarm<'a> {
    registers: StaticRef<Timer1Registers>,
    mask: StaticRef<TimerMaskRegisters>,
    flags: StaticRef<TimerFlagRegisters>,
    client: OptionalCell<&'a dyn AlarmClient>,
}

impl<'a> Timer1Alarm<'a> {
    pub const fn new() -> Timer1Alarm<'a> {
        Timer1Alarm {
            registers: TIMER1_BASE,
            mask: TIMER1_MASK_BASE,
            flags: TIMER1_FLAG_BASE,
            client: OptionalCell::empty(),
        }
    }

    /// Start the counter free-running. Call once at boot.
    pub fn start(&self) {
        self.registers.tccr1a.set(0);
        self.registers
            .tccr1b
            .write(TCCR1B::WGM1HI.val(0) + TCCR1B::CS1::Div64);
    }

    /// TIMER1_COMPA vector.
    pub fn handle_interrupt(&self) {
        // One-shot: the alarm is disabled before the client runs.
        self.mask.timsk1.modify(TIMSK1::OCIE1A::CLEAR);
        self.client.map(|client| client.alarm());
    }

    // The 16-bit register pairs go through the shared temp register:
    // counter reads must read the low byte first, compare writes must
    // write the high byte first.

    fn read_counter(&self) -> u16 {
        let low = self.registers.tcnt1l.get();
        let high = self.registers.tcnt1h.get();
        ((high as u16) << 8) | low as u16
    }

    fn write_compare(&self, value: u16) {
        self.registers.ocr1ah.set((value >> 8) as u8);
        self.registers.ocr1al.set(value as u8);
    }

    fn read_compare(&self) -> u16 {
        let low = self.registers.ocr1al.get();
        let high = self.registers.ocr1ah.get();
        ((high as u16) << 8) | low as u16
    }
}

impl Time for Timer1Alarm<'_> {
    type Frequency = Freq125KHz;
    type Ticks = Ticks16;

    fn now(&self) -> Ticks16 {
        Ticks16::from(self.read_counter())
    }
}

impl<'a> Alarm<'a> for Timer1Alarm<'a> {
    fn set_alarm_client(&self, client: &'a dyn AlarmClient) {
        self.client.set(client);
    }

    fn set_alarm(&self, reference: Self::Ticks, dt: Self::Ticks) {
        let now = self.now();
        let mut expire = reference.wrapping_add(dt);
        if !now.within_range(reference, expire) {
            // The deadline already passed; fire as soon as possible.
            expire = now.wrapping_add(self.minimum_dt());
        }
        self.write_compare(expire.into_u16());
        // A stale match flag would fire the old deadline immediately.
        self.flags.tifr1.write(TIFR1::OCF1A::SET);
        self.mask.timsk1.modify(TIMSK1::OCIE1A::SET);
    }

    fn get_alarm(&self) -> Self::Ticks {
        Ticks16::from(self.read_compare())
    }

    fn disarm(&self) -> Result<(), ErrorCode> {
        self.mask.timsk1.modify(TIMSK1::OCIE1A::CLEAR);
        Ok(())
    }

    fn is_armed(&self) -> bool {
        self.mask.timsk1.is_set(TIMSK1::OCIE1A)
    }

    fn minimum_dt(&self) -> Self::Ticks {
        Ticks16::from(1u16)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kernel::hil::time::ConvertTicks;

    struct Scale;
    impl Time for Scale {
        type Frequency = Freq125KHz;
        type Ticks = Ticks16;
        fn now(&self) -> Ticks16 {
            Ticks16::from(0u16)
        }
    }

    #[test]
    fn protocol_deadlines_fit_the_counter() {
        // The break threshold and response gap land on distinct tick
        // counts at this rate, and the longest failsafe stays well under
        // the 16-bit wrap.
        assert_eq!(Scale.ticks_from_us(12_000).into_u32(), 1_500);
        assert_eq!(Scale.ticks_from_us(8_450).into_u32(), 1_056);
        assert_eq!(Scale.ticks_from_us(8_190).into_u32(), 1_023);
        assert_eq!(Scale.ticks_from_ms(200).into_u32(), 25_000);
    }
}
