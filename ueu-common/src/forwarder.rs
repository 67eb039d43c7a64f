// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Serial forwarder: a byte pipe between the host and FPGA logic.
//!
//! Each tick is one SPI conversation of three bytes:
//!
//! ```text
//!   MOSI: 0x07  local status   payload or 0
//!   MISO:  --   remote status  payload or 0
//! ```
//!
//! Status bit 0 means "I have room for a byte", bit 1 means "I have a byte
//! to send". A payload byte only moves when the sender announced data and
//! the receiver announced room, so at most one byte flows each way per tick
//! and neither side ever has to drop one.

use embedded_hal::digital::OutputPin;
use embedded_hal::spi::SpiBus;

use crate::bridge::Board;
use crate::error::Result;
use crate::hal::{Timebase, UsbLink};
use crate::protocol::{FpgaCommand, READY_DATA, READY_SPACE};
use crate::serial::HostSerial;
use crate::spi_link::SpiLink;

/// Which directions carry a payload byte on this tick.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Flow {
    pub to_fpga: bool,
    pub to_host: bool,
}

impl Flow {
    /// Decide the payload directions from the two status words.
    pub fn negotiate(local: u8, remote: u8) -> Self {
        Self {
            to_fpga: local & READY_DATA != 0 && remote & READY_SPACE != 0,
            to_host: remote & READY_DATA != 0 && local & READY_SPACE != 0,
        }
    }
}

/// Bytes moved by one tick.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Transfer {
    pub to_fpga: Option<u8>,
    pub to_host: Option<u8>,
}

/// Run one handshake conversation.
pub fn forward_once<L, S, CS>(serial: &mut HostSerial<L>, link: &mut SpiLink<S, CS>) -> Result<Transfer>
where
    L: UsbLink,
    S: SpiBus,
    CS: OutputPin,
{
    link.begin(FpgaCommand::SerialForward)?;

    let mut local = 0;
    if serial.writable() {
        local |= READY_SPACE;
    }
    if serial.readable() {
        local |= READY_DATA;
    }

    let remote = link.exchange(local)?;
    let flow = Flow::negotiate(local, remote);

    let mut transfer = Transfer::default();
    let payload = if flow.to_fpga {
        let byte = serial.read_byte()?;
        transfer.to_fpga = Some(byte);
        byte
    } else {
        0
    };

    let reply = link.exchange(payload)?;
    if flow.to_host {
        // Space was reported above and nothing else writes in between.
        serial.write_byte(reply);
        serial.flush();
        transfer.to_host = Some(reply);
    }

    link.end()?;
    Ok(transfer)
}

#[derive(Debug, Default)]
pub struct Forwarder {
    online: bool,
}

impl Forwarder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_online(&self) -> bool {
        self.online
    }

    pub fn reset(&mut self) {
        self.online = false;
    }

    pub fn tick<L, S, CS, T>(&mut self, board: &mut Board<L, S, CS, T>) -> Result<Transfer>
    where
        L: UsbLink,
        S: SpiBus,
        CS: OutputPin,
        T: Timebase,
    {
        if !self.online {
            self.online = true;
            info!("serial forwarder active");
        }
        forward_once(&mut board.serial, &mut board.link)
    }
}
