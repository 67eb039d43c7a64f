// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! NOR flash operations relayed through the FPGA passthrough.
//!
//! Every operation opens and closes its own SPI conversation. Erase, program
//! and status writes poll status register 1 until the busy bit clears, with
//! [`FLASH_BUSY_TIMEOUT_MS`] as the upper bound.
//!
//! The FPGA only relays flash traffic while passthrough is enabled; wrap
//! flash work in [`Flash::with_passthrough`] or pair
//! [`Flash::enter_passthrough`] with [`Flash::exit_passthrough`].

use core::ops::ControlFlow;

use embedded_hal::digital::OutputPin;
use embedded_hal::spi::SpiBus;

use crate::error::{Error, Result};
use crate::hal::{elapsed_ms, Timebase};
use crate::protocol::{
    FlashCommand, FpgaCommand, EXPECTED_DEVICE_ID, EXPECTED_MANUFACTURER_ID,
    FLASH_BUSY_TIMEOUT_MS, PAGE_LEN, PASSTHROUGH_OFF, PASSTHROUGH_ON, PASSTHROUGH_SETTLE_MS,
    STATUS1_BUSY, STATUS2_QE,
};
use crate::spi_link::SpiLink;

/// Manufacturer and device ID as returned by instruction 0x90.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FlashId {
    pub manufacturer: u8,
    pub device: u8,
}

impl FlashId {
    /// The bridge only writes to the chip it was built for.
    pub fn is_expected(&self) -> bool {
        self.manufacturer == EXPECTED_MANUFACTURER_ID && self.device == EXPECTED_DEVICE_ID
    }
}

/// Flash command engine borrowing the SPI link and the timebase.
pub struct Flash<'a, S, CS, T> {
    link: &'a mut SpiLink<S, CS>,
    timer: &'a mut T,
}

impl<'a, S, CS, T> Flash<'a, S, CS, T>
where
    S: SpiBus,
    CS: OutputPin,
    T: Timebase,
{
    pub fn new(link: &'a mut SpiLink<S, CS>, timer: &'a mut T) -> Self {
        Self { link, timer }
    }

    pub fn enter_passthrough(&mut self) -> Result<()> {
        self.set_passthrough(PASSTHROUGH_ON)
    }

    pub fn exit_passthrough(&mut self) -> Result<()> {
        self.set_passthrough(PASSTHROUGH_OFF)
    }

    /// Run `f` with passthrough enabled and disable it again afterwards.
    ///
    /// If `f` fails with no conversation open, passthrough is still disabled
    /// before the error is returned. A failure mid-conversation leaves it as
    /// is for the fatal path to release.
    pub fn with_passthrough<R>(&mut self, f: impl FnOnce(&mut Self) -> Result<R>) -> Result<R> {
        self.enter_passthrough()?;
        match f(self) {
            Ok(value) => {
                self.exit_passthrough()?;
                Ok(value)
            }
            Err(err) => {
                if !self.link.is_open() {
                    self.exit_passthrough().ok();
                }
                Err(err)
            }
        }
    }

    pub fn identify(&mut self) -> Result<FlashId> {
        self.link.begin_passthrough(FlashCommand::ReadDeviceId)?;
        self.send_address(0)?;
        let manufacturer = self.link.exchange(0)?;
        let device = self.link.exchange(0)?;
        self.link.end()?;
        Ok(FlashId {
            manufacturer,
            device,
        })
    }

    pub fn read_status1(&mut self) -> Result<u8> {
        self.read_register(FlashCommand::ReadStatus1)
    }

    pub fn read_status2(&mut self) -> Result<u8> {
        self.read_register(FlashCommand::ReadStatus2)
    }

    pub fn read_status3(&mut self) -> Result<u8> {
        self.read_register(FlashCommand::ReadStatus3)
    }

    pub fn write_enable(&mut self) -> Result<()> {
        self.instruction(FlashCommand::WriteEnable)
    }

    pub fn write_disable(&mut self) -> Result<()> {
        self.instruction(FlashCommand::WriteDisable)
    }

    pub fn is_busy(&mut self) -> Result<bool> {
        Ok(self.read_status1()? & STATUS1_BUSY != 0)
    }

    /// Erase the 4 KiB sector containing `addr`.
    pub fn erase_sector(&mut self, addr: u32) -> Result<()> {
        self.write_enable()?;
        self.link.begin_passthrough(FlashCommand::SectorErase)?;
        self.send_address(addr)?;
        self.end_after_write()
    }

    /// Program one page. `addr` should be page aligned; the chip wraps
    /// within the page otherwise.
    pub fn program_page(&mut self, addr: u32, data: &[u8; PAGE_LEN]) -> Result<()> {
        self.write_enable()?;
        self.link.begin_passthrough(FlashCommand::PageProgram)?;
        self.send_address(addr)?;
        for &byte in data.iter() {
            self.link.exchange(byte)?;
        }
        self.end_after_write()
    }

    /// Fill `buf` from consecutive addresses starting at `addr`.
    pub fn read_range(&mut self, addr: u32, buf: &mut [u8]) -> Result<()> {
        self.link.begin_passthrough(FlashCommand::ReadData)?;
        self.send_address(addr)?;
        for slot in buf.iter_mut() {
            *slot = self.link.exchange(0)?;
        }
        self.link.end()
    }

    /// Read up to `len` bytes starting at `addr` in one conversation, handing
    /// each `(address, byte)` to `f`. Stops early when `f` breaks; the byte
    /// that caused the break is not counted. Returns the number of bytes
    /// accepted.
    pub fn read_stream<F>(&mut self, addr: u32, len: u32, mut f: F) -> Result<u32>
    where
        F: FnMut(u32, u8) -> ControlFlow<()>,
    {
        self.link.begin_passthrough(FlashCommand::ReadData)?;
        self.send_address(addr)?;
        let mut count = 0;
        while count < len {
            let byte = self.link.exchange(0)?;
            if f(addr.wrapping_add(count), byte).is_break() {
                break;
            }
            count += 1;
        }
        self.link.end()?;
        Ok(count)
    }

    pub fn quad_enabled(&mut self) -> Result<bool> {
        Ok(self.read_status2()? & STATUS2_QE != 0)
    }

    /// Set the non-volatile quad enable bit in status register 2.
    pub fn enable_quad(&mut self) -> Result<()> {
        self.write_enable()?;
        self.link.begin_passthrough(FlashCommand::WriteStatus2)?;
        self.link.exchange(STATUS2_QE)?;
        self.end_after_write()
    }

    /// Set the quad enable bit unless it is already set. Returns whether
    /// the status register was written.
    pub fn ensure_quad_enable(&mut self) -> Result<bool> {
        if self.quad_enabled()? {
            return Ok(false);
        }
        self.enable_quad()?;
        Ok(true)
    }

    // --- Internal helpers ---

    fn set_passthrough(&mut self, state: u8) -> Result<()> {
        self.link.begin(FpgaCommand::PassthroughConfig)?;
        self.link.exchange(state)?;
        self.link.end()?;
        self.timer.delay_ms(PASSTHROUGH_SETTLE_MS);
        Ok(())
    }

    fn instruction(&mut self, command: FlashCommand) -> Result<()> {
        self.link.begin_passthrough(command)?;
        self.link.end()
    }

    fn read_register(&mut self, command: FlashCommand) -> Result<u8> {
        self.link.begin_passthrough(command)?;
        let value = self.link.exchange(0)?;
        self.link.end()?;
        Ok(value)
    }

    /// 24-bit big-endian address.
    fn send_address(&mut self, addr: u32) -> Result<()> {
        let [_, high, mid, low] = addr.to_be_bytes();
        self.link.exchange(high)?;
        self.link.exchange(mid)?;
        self.link.exchange(low)?;
        Ok(())
    }

    /// Close a write-type conversation and wait for the chip to finish.
    /// The chip clears its write enable latch by itself.
    fn end_after_write(&mut self) -> Result<()> {
        self.link.end()?;
        self.wait_ready()
    }

    fn wait_ready(&mut self) -> Result<()> {
        let start = self.timer.now_ms();
        while self.is_busy()? {
            if elapsed_ms(self.timer.now_ms(), start) > FLASH_BUSY_TIMEOUT_MS {
                warn!("flash still busy after {} ms", FLASH_BUSY_TIMEOUT_MS);
                return Err(Error::FlashBusyTimeout);
            }
        }
        Ok(())
    }
}
