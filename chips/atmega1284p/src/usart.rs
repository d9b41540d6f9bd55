// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2024.

//! USART0 as the SDI-12 line.
//!
//! The data line is wired to three pins: RXD0/TXD0 carry the characters,
//! PD2/INT0 is tied to the receive signal so level changes raise an
//! interrupt, and PD4 enables the external half-duplex driver IC.
//!
//! Holding mark exploits the AVR pin mux: with the transmitter disabled,
//! TXD0 reverts to a GPIO, so driving it high (with the driver IC
//! enabled) holds the bus at mark without clocking out characters.
//! `hold_mark` turns the driver IC on; it stays on through
//! `enable_transmit` and drops with `disable_transmit`.

use kernel::hil::sdi12;
use kernel::hil::sdi12::{CharacterError, Level};
use kernel::utilities::cells::OptionalCell;
use kernel::utilities::StaticRef;
use kernel::ErrorCode;
use tock_registers::interfaces::{ReadWriteable, Readable, Writeable};
use tock_registers::registers::ReadWrite;
use tock_registers::{register_bitfields, register_structs};

/// SDI-12 line rate.
pub const SDI12_BAUD: u32 = 1200;

// Port D pin assignments.
const RXD_PIN: u8 = 0;
const TXD_PIN: u8 = 1;
const DRIVER_ENABLE_PIN: u8 = 4;

register_structs! {
    pub UsartRegisters {
        (0x000 => ucsra: ReadWrite<u8, UCSRA::Register>),
        (0x001 => ucsrb: ReadWrite<u8, UCSRB::Register>),
        (0x002 => ucsrc: ReadWrite<u8, UCSRC::Register>),
        (0x003 => _reserved0),
        (0x004 => ubrrl: ReadWrite<u8>),
        (0x005 => ubrrh: ReadWrite<u8>),
        (0x006 => udr: ReadWrite<u8>),
        (0x007 => @END),
    },

    pub PortRegisters {
        (0x000 => pin: ReadWrite<u8>),
        (0x001 => ddr: ReadWrite<u8>),
        (0x002 => port: ReadWrite<u8>),
        (0x003 => @END),
    },

    pub ExtIntFlagRegisters {
        (0x000 => eifr: ReadWrite<u8, EIFR::Register>),
        (0x001 => eimsk: ReadWrite<u8, EIMSK::Register>),
        (0x002 => @END),
    },

    pub ExtIntSenseRegisters {
        (0x000 => eicra: ReadWrite<u8, EICRA::Register>),
        (0x001 => @END),
    }
}

register_bitfields![u8,
    UCSRA [
        RXC OFFSET(7) NUMBITS(1) [],
        TXC OFFSET(6) NUMBITS(1) [],
        UDRE OFFSET(5) NUMBITS(1) [],
        FE OFFSET(4) NUMBITS(1) [],
        DOR OFFSET(3) NUMBITS(1) [],
        UPE OFFSET(2) NUMBITS(1) [],
        U2X OFFSET(1) NUMBITS(1) [],
        MPCM OFFSET(0) NUMBITS(1) []
    ],
    UCSRB [
        RXCIE OFFSET(7) NUMBITS(1) [],
        TXCIE OFFSET(6) NUMBITS(1) [],
        UDRIE OFFSET(5) NUMBITS(1) [],
        RXEN OFFSET(4) NUMBITS(1) [],
        TXEN OFFSET(3) NUMBITS(1) [],
        UCSZ2 OFFSET(2) NUMBITS(1) [],
        RXB8 OFFSET(1) NUMBITS(1) [],
        TXB8 OFFSET(0) NUMBITS(1) []
    ],
    UCSRC [
        UMSEL OFFSET(6) NUMBITS(2) [
            Asynchronous = 0
        ],
        UPM OFFSET(4) NUMBITS(2) [
            Disabled = 0,
            Even = 2,
            Odd = 3
        ],
        USBS OFFSET(3) NUMBITS(1) [
            One = 0,
            Two = 1
        ],
        UCSZ OFFSET(1) NUMBITS(2) [
            Five = 0,
            Six = 1,
            Seven = 2,
            Eight = 3
        ],
        UCPOL OFFSET(0) NUMBITS(1) []
    ],
    EIFR [
        INTF2 OFFSET(2) NUMBITS(1) [],
        INTF1 OFFSET(1) NUMBITS(1) [],
        INTF0 OFFSET(0) NUMBITS(1) []
    ],
    EIMSK [
        INT2 OFFSET(2) NUMBITS(1) [],
        INT1 OFFSET(1) NUMBITS(1) [],
        INT0 OFFSET(0) NUMBITS(1) []
    ],
    EICRA [
        ISC2 OFFSET(4) NUMBITS(2) [],
        ISC1 OFFSET(2) NUMBITS(2) [],
        ISC0 OFFSET(0) NUMBITS(2) [
            Low = 0,
            Change = 1,
            Falling = 2,
            Rising = 3
        ]
    ]
];

const USART0_BASE: StaticRef<UsartRegisters> =
    unsafe { StaticRef::new(0x00c0 as *const UsartRegisters) };
const PORTD_BASE: StaticRef<PortRegisters> =
    unsafe { StaticRef::new(0x0029 as *const PortRegisters) };
const EXTINT_FLAG_BASE: StaticRef<ExtIntFlagRegisters> =
    unsafe { StaticRef::new(0x003c as *const ExtIntFlagRegisters) };
const EXTINT_SENSE_BASE: StaticRef<ExtIntSenseRegisters> =
    unsafe { StaticRef::new(0x0069 as *const ExtIntSenseRegisters) };

/// Divisor for the UBRR register pair, rounded to the nearest setting.
const fn baud_divisor(f_cpu: u32, baud: u32) -> u16 {
    ((f_cpu + 8 * baud) / (16 * baud) - 1) as u16
}

/// USART0 plus the line-interrupt and driver-enable pins.
pub struct Usart<'a> {
    registers: StaticRef<UsartRegisters>,
    port: StaticRef<PortRegisters>,
    flags: StaticRef<ExtIntFlagRegisters>,
    sense: StaticRef<ExtIntSenseRegisters>,
    client: OptionalCell<&'a dyn sdi12::Client>,
}

impl<'a> Usart<'a> {
    pub const fn new() -> Usart<'a> {
        Usart {
            registers: USART0_BASE,
            port: PORTD_BASE,
            flags: EXTINT_FLAG_BASE,
            sense: EXTINT_SENSE_BASE,
            client: OptionalCell::empty(),
        }
    }

    /// USART0 receive-complete vector.
    pub fn handle_receive_interrupt(&self) {
        // The error flags describe the character at the head of the
        // receive FIFO and are valid only until UDR is read, so they are
        // captured in one status read first.
        let status = self.registers.ucsra.extract();
        if !status.is_set(UCSRA::RXC) {
            return;
        }
        let result = if status.is_set(UCSRA::FE) {
            Err(CharacterError::Framing)
        } else if status.is_set(UCSRA::DOR) {
            Err(CharacterError::Overrun)
        } else if status.is_set(UCSRA::UPE) {
            Err(CharacterError::Parity)
        } else {
            Ok(())
        };
        let character = self.registers.udr.get() & 0x7f;
        self.client
            .map(|client| client.character_received(character, result));
    }

    /// USART0 transmit-complete vector.
    pub fn handle_transmit_interrupt(&self) {
        self.client.map(|client| client.character_transmitted());
    }

    /// INT0 vector: the receive signal changed level.
    pub fn handle_edge_interrupt(&self) {
        let level = if self.port.pin.get() & (1 << RXD_PIN) != 0 {
            Level::High
        } else {
            Level::Low
        };
        self.client.map(|client| client.line_edge(level));
    }
}

impl<'a> sdi12::Line<'a> for Usart<'a> {
    fn set_client(&self, client: &'a dyn sdi12::Client) {
        self.client.set(client);
    }

    fn configure(&self) -> Result<(), ErrorCode> {
        let divisor = baud_divisor(crate::CPU_FREQUENCY_HZ, SDI12_BAUD);
        self.registers.ucsra.write(UCSRA::U2X::CLEAR);
        self.registers.ubrrh.set((divisor >> 8) as u8);
        self.registers.ubrrl.set(divisor as u8);
        // 7 data bits, even parity, one stop bit.
        self.registers.ucsrb.modify(UCSRB::UCSZ2::CLEAR);
        self.registers.ucsrc.write(
            UCSRC::UMSEL::Asynchronous
                + UCSRC::UPM::Even
                + UCSRC::USBS::One
                + UCSRC::UCSZ::Seven
                + UCSRC::UCPOL::CLEAR,
        );
        // The line interrupt fires on every level change.
        self.sense.eicra.modify(EICRA::ISC0::Change);
        Ok(())
    }

    fn enable_receive(&self) {
        self.registers.ucsrb.modify(UCSRB::RXEN::SET);
    }

    fn disable_receive(&self) {
        self.registers.ucsrb.modify(UCSRB::RXEN::CLEAR);
    }

    fn enable_receive_interrupt(&self) {
        self.registers.ucsrb.modify(UCSRB::RXCIE::SET);
    }

    fn disable_receive_interrupt(&self) {
        self.registers.ucsrb.modify(UCSRB::RXCIE::CLEAR);
    }

    fn enable_transmit(&self) {
        // Driver IC on, stale transmit-complete flag cleared by writing
        // it, then the transmitter owns TXD0.
        self.port.port.set(self.port.port.get() | (1 << DRIVER_ENABLE_PIN));
        self.port.ddr.set(self.port.ddr.get() | (1 << DRIVER_ENABLE_PIN));
        self.registers.ucsra.modify(UCSRA::TXC::SET);
        self.registers
            .ucsrb
            .modify(UCSRB::TXEN::SET + UCSRB::TXCIE::SET);
    }

    fn disable_transmit(&self) {
        self.registers
            .ucsrb
            .modify(UCSRB::TXEN::CLEAR + UCSRB::TXCIE::CLEAR);
        self.port
            .port
            .set(self.port.port.get() & !(1 << DRIVER_ENABLE_PIN));
    }

    fn transmit_character(&self, character: u8) {
        self.registers.udr.set(character);
    }

    fn hold_mark(&self) {
        // With TXEN clear, TXD0 is a GPIO: drive it high behind the
        // enabled driver IC.
        self.port.port.set(self.port.port.get() | (1 << DRIVER_ENABLE_PIN) | (1 << TXD_PIN));
        self.port.ddr.set(self.port.ddr.get() | (1 << DRIVER_ENABLE_PIN) | (1 << TXD_PIN));
    }

    fn release_mark(&self) {
        self.port.ddr.set(self.port.ddr.get() & !(1 << TXD_PIN));
        self.port.port.set(self.port.port.get() & !(1 << TXD_PIN));
    }

    fn enable_edge_interrupt(&self) {
        self.flags.eifr.write(EIFR::INTF0::SET);
        self.flags.eimsk.modify(EIMSK::INT0::SET);
    }

    fn disable_edge_interrupt(&self) {
        self.flags.eimsk.modify(EIMSK::INT0::CLEAR);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn divisor_for_sdi12() {
        // 8 MHz / (16 * (416 + 1)) = 1199.04 baud, 0.08% slow.
        assert_eq!(baud_divisor(8_000_000, 1200), 416);
    }

    #[test]
    fn divisor_rounds_to_nearest() {
        // 16 MHz at 115200: 7.68 rounds to 8, not truncating to 7.
        assert_eq!(baud_divisor(16_000_000, 115_200), 8);
    }
}
