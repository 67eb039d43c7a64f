// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! SPI conversation framing towards the FPGA.
//!
//! A conversation is one chip-select assertion. Its first byte is an
//! [`FpgaCommand`] that tells the FPGA how to interpret the rest. Opening a
//! second conversation, or closing one that is not open, is a logic error
//! and reported as such.

use embedded_hal::digital::OutputPin;
use embedded_hal::spi::SpiBus;

use crate::error::{Error, Result};
use crate::protocol::{FlashCommand, FpgaCommand};

pub struct SpiLink<S, CS> {
    spi: S,
    cs: CS,
    open: bool,
}

impl<S, CS> SpiLink<S, CS>
where
    S: SpiBus,
    CS: OutputPin,
{
    /// Wrap the bus and the FPGA select line, leaving the FPGA deselected.
    pub fn new(spi: S, mut cs: CS) -> Self {
        cs.set_high().ok();
        Self {
            spi,
            cs,
            open: false,
        }
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Assert select and send the FPGA command byte.
    pub fn begin(&mut self, command: FpgaCommand) -> Result<()> {
        if self.open {
            return Err(Error::ConversationOpen);
        }
        self.cs.set_low().map_err(|_| Error::Pin)?;
        self.open = true;
        self.exchange(command as u8)?;
        Ok(())
    }

    /// Open a conversation relayed to the flash chip, whose first byte is
    /// `command`.
    pub fn begin_passthrough(&mut self, command: FlashCommand) -> Result<()> {
        self.begin(FpgaCommand::FlashRelay)?;
        self.exchange(command as u8)?;
        Ok(())
    }

    /// Clock one byte out and return the byte clocked in.
    pub fn exchange(&mut self, byte: u8) -> Result<u8> {
        if !self.open {
            return Err(Error::NoConversation);
        }
        let mut buf = [byte];
        self.spi.transfer_in_place(&mut buf).map_err(|_| Error::Spi)?;
        Ok(buf[0])
    }

    /// Wait for the bus to go idle and deassert select.
    pub fn end(&mut self) -> Result<()> {
        if !self.open {
            return Err(Error::NoConversation);
        }
        self.open = false;
        self.spi.flush().map_err(|_| Error::Spi)?;
        self.cs.set_high().map_err(|_| Error::Pin)?;
        Ok(())
    }

    /// Force select high regardless of state. Used on the fatal-error path.
    pub fn release(&mut self) {
        self.open = false;
        self.spi.flush().ok();
        self.cs.set_high().ok();
    }
}
