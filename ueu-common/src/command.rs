// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Single-character command interface for identifying, dumping and
//! programming the flash.
//!
//! On the first tick of a session the interpreter prints a banner: the
//! negotiated baud, the FPGA identification block, the flash ID and status
//! registers. After that each tick handles at most one command byte. See
//! [`Command`] for the command set.
//!
//! Long operations check DTR before every blocking wait and always leave the
//! SPI link closed and passthrough disabled when they return normally.

use core::fmt::Write;
use core::ops::ControlFlow;

use embedded_hal::digital::OutputPin;
use embedded_hal::spi::SpiBus;

use crate::bridge::Board;
use crate::error::Result;
use crate::flash::Flash;
use crate::hal::{Timebase, UsbLink};
use crate::protocol::{
    checksum, Command, FpgaCommand, DATA_MARKER, FLASH_SECTOR_SIZE, FPGA_ID_LEN, HEX_DUMP_LEN,
    IMAGE_SIZE, OK_LINE, PAGE_LEN, SEND_MARKER,
};
use crate::serial::HostSerial;

/// How a `P` programming run ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ProgramOutcome {
    Success,
    /// Readback differed; first mismatching address.
    VerifyFailed(u32),
    /// The host dropped DTR.
    Disconnected,
}

#[derive(Debug, Default)]
pub struct CommandInterpreter {
    online: bool,
    flash_detected: bool,
}

impl CommandInterpreter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_online(&self) -> bool {
        self.online
    }

    pub fn flash_detected(&self) -> bool {
        self.flash_detected
    }

    /// Forget the session; the banner runs again on the next tick.
    pub fn reset(&mut self) {
        self.online = false;
        self.flash_detected = false;
    }

    pub fn tick<L, S, CS, T>(&mut self, board: &mut Board<L, S, CS, T>) -> Result<()>
    where
        L: UsbLink,
        S: SpiBus,
        CS: OutputPin,
        T: Timebase,
    {
        if !self.online {
            self.online = true;
            self.announce(board)?;
        }

        if board.serial.readable() {
            let byte = board.serial.read_byte()?;
            if let Some(command) = Command::from_byte(byte) {
                self.execute(command, board)?;
            }
        }

        Ok(())
    }

    pub fn execute<L, S, CS, T>(&mut self, command: Command, board: &mut Board<L, S, CS, T>) -> Result<()>
    where
        L: UsbLink,
        S: SpiBus,
        CS: OutputPin,
        T: Timebase,
    {
        debug!("command {}", command);
        match command {
            Command::Ping => {
                board.serial.println(OK_LINE);
                Ok(())
            }
            Command::Reset => {
                self.online = false;
                Ok(())
            }
            Command::ResetFlash => reset_flash(board),
            Command::Dump if self.flash_detected => dump(board),
            Command::ReadImage if self.flash_detected => read_image(board),
            Command::Program if self.flash_detected => program(board),
            Command::Dump | Command::ReadImage | Command::Program => {
                board.serial.println("Flash not detected");
                Ok(())
            }
            // Too easy to clobber sector/page zero by accident.
            Command::EraseSector | Command::ProgramPage => Ok(()),
        }
    }

    /// Connection banner; also decides whether flash commands are allowed.
    fn announce<L, S, CS, T>(&mut self, board: &mut Board<L, S, CS, T>) -> Result<()>
    where
        L: UsbLink,
        S: SpiBus,
        CS: OutputPin,
        T: Timebase,
    {
        let Board {
            serial,
            link,
            timer,
        } = board;

        let baud = serial.line_state().baud;
        let _ = write!(serial, "{}\r\n", baud);

        link.begin(FpgaCommand::Identify)?;
        serial.print("FPGA:");
        for _ in 0..FPGA_ID_LEN {
            let byte = link.exchange(0)?;
            let _ = write!(serial, " {:x}", byte);
        }
        serial.println("");
        link.end()?;

        let mut flash = Flash::new(link, timer);

        serial.println("Lock passthrough");
        self.flash_detected = flash.with_passthrough(|flash| {
            serial.print("Flash: ");
            let id = flash.identify()?;
            let _ = write!(
                serial,
                " Winbond: {:x} W25Q128JV: {:x}\r\n",
                id.manufacturer, id.device
            );

            let detected = id.is_expected();
            if !detected {
                info!("unexpected flash {:x}/{:x}", id.manufacturer, id.device);
                serial.println("Flash not detected; aborting");
            } else {
                let status1 = flash.read_status1()?;
                let _ = write!(serial, "Read status 1: {:x}\r\n", status1);
                let status2 = flash.read_status2()?;
                let _ = write!(serial, "Read status 2: {:x}\r\n", status2);
                let status3 = flash.read_status3()?;
                let _ = write!(serial, "Read status 3: {:x}\r\n", status3);

                if flash.ensure_quad_enable()? {
                    serial.println("Write NV quad enable bit: done");
                }
            }

            serial.println("Unlock passthrough");
            Ok(detected)
        })?;
        serial.println("");

        Ok(())
    }
}

fn reset_flash<L, S, CS, T>(board: &mut Board<L, S, CS, T>) -> Result<()>
where
    L: UsbLink,
    S: SpiBus,
    CS: OutputPin,
    T: Timebase,
{
    board.link.begin(FpgaCommand::ResetFlash)?;
    board.link.exchange(0)?;
    board.link.end()?;
    board
        .serial
        .println("06 00 sent -- FPGA should reset flash now");
    Ok(())
}

/// `r`: stream the image in one conversation, hex-printing the start.
fn dump<L, S, CS, T>(board: &mut Board<L, S, CS, T>) -> Result<()>
where
    L: UsbLink,
    S: SpiBus,
    CS: OutputPin,
    T: Timebase,
{
    let Board {
        serial,
        link,
        timer,
    } = board;
    let mut flash = Flash::new(link, timer);

    flash.with_passthrough(|flash| {
        serial.println("Reading data:");

        let mut sum = 0u32;
        let count = flash.read_stream(0, IMAGE_SIZE, |addr, byte| {
            if !serial.dtr() {
                return ControlFlow::Break(());
            }
            if addr < HEX_DUMP_LEN {
                let _ = write!(serial, " {:x}", byte);
            }
            sum = sum.wrapping_add(byte as u32);
            ControlFlow::Continue(())
        })?;
        serial.println("");

        let _ = write!(serial, "{:x} bytes read; checksum {:x}\r\n", count, sum);
        Ok(())
    })
}

/// `R`: raw binary image, one page-sized conversation at a time.
fn read_image<L, S, CS, T>(board: &mut Board<L, S, CS, T>) -> Result<()>
where
    L: UsbLink,
    S: SpiBus,
    CS: OutputPin,
    T: Timebase,
{
    let Board {
        serial,
        link,
        timer,
    } = board;
    let mut flash = Flash::new(link, timer);

    flash.with_passthrough(|flash| {
        serial.print(DATA_MARKER);

        let mut page = [0u8; PAGE_LEN];
        let mut sum = 0u32;
        let mut count = 0u32;
        for addr in (0..IMAGE_SIZE).step_by(PAGE_LEN) {
            flash.read_range(addr, &mut page)?;
            if !serial.dtr() {
                break;
            }
            sum = sum.wrapping_add(checksum(&page));
            serial.write_all(&page);
            count += PAGE_LEN as u32;
        }
        serial.println("");

        let _ = write!(serial, "{:x} bytes read; checksum {:x}\r\n", count, sum);
        Ok(())
    })
}

/// `P`: program the image, then report and clean up whatever the outcome.
fn program<L, S, CS, T>(board: &mut Board<L, S, CS, T>) -> Result<()>
where
    L: UsbLink,
    S: SpiBus,
    CS: OutputPin,
    T: Timebase,
{
    let Board {
        serial,
        link,
        timer,
    } = board;
    let mut flash = Flash::new(link, timer);

    serial.println("Program 64kB from serial port");
    flash.with_passthrough(|flash| {
        let outcome = program_image(serial, flash)?;
        info!("programming finished: {}", outcome);

        match outcome {
            ProgramOutcome::Success => {}
            ProgramOutcome::VerifyFailed(_) => serial.println("ERROR - mismatch"),
            ProgramOutcome::Disconnected => {
                serial.println("ERROR - lost serial comms during programming")
            }
        }
        serial.println("Finished programming");
        serial.println(OK_LINE);
        Ok(())
    })
}

/// Erase the image area, then receive, program and verify it page by page.
///
/// Passthrough must already be enabled. Returns with no SPI conversation
/// open unless an error is returned.
pub fn program_image<L, S, CS, T>(
    serial: &mut HostSerial<L>,
    flash: &mut Flash<'_, S, CS, T>,
) -> Result<ProgramOutcome>
where
    L: UsbLink,
    S: SpiBus,
    CS: OutputPin,
    T: Timebase,
{
    for sector in (0..IMAGE_SIZE).step_by(FLASH_SECTOR_SIZE as usize) {
        if !serial.dtr() {
            return Ok(ProgramOutcome::Disconnected);
        }
        let _ = write!(serial, "Erase at {:x}\r\n", sector);
        flash.erase_sector(sector)?;
    }

    let mut page = [0u8; PAGE_LEN];
    let mut readback = [0u8; PAGE_LEN];
    for addr in (0..IMAGE_SIZE).step_by(PAGE_LEN) {
        if !serial.dtr() {
            return Ok(ProgramOutcome::Disconnected);
        }

        serial.println(SEND_MARKER);
        let _ = write!(serial, "{:x}+{:x}\r\n", addr, PAGE_LEN);
        if !receive_page(serial, &mut page)? {
            return Ok(ProgramOutcome::Disconnected);
        }
        let _ = write!(serial, "Checksum {:x}\r\n", checksum(&page));

        let _ = write!(serial, "Program page at {:x}\r\n", addr);
        flash.program_page(addr, &page)?;
        let _ = write!(serial, "Programmed {} bytes at {:x}\r\n", PAGE_LEN, addr);

        flash.read_range(addr, &mut readback)?;
        let mut first_mismatch = None;
        for (offset, (wanted, got)) in page.iter().zip(readback.iter()).enumerate() {
            if wanted != got {
                let bad = addr + offset as u32;
                let _ = write!(serial, "Mismatch at {:x}\r\n", bad);
                first_mismatch.get_or_insert(bad);
            }
        }
        if let Some(bad) = first_mismatch {
            return Ok(ProgramOutcome::VerifyFailed(bad));
        }
    }

    Ok(ProgramOutcome::Success)
}

/// Fill `page` from the host. Returns false if DTR drops while waiting.
fn receive_page<L: UsbLink>(serial: &mut HostSerial<L>, page: &mut [u8]) -> Result<bool> {
    for slot in page.iter_mut() {
        while !serial.readable() {
            if !serial.dtr() {
                return Ok(false);
            }
        }
        *slot = serial.read_byte()?;
    }
    Ok(true)
}
