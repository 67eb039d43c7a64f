// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Wire-level constants shared by the firmware and the host tool.
//!
//! Three layers meet here: the USB serial link (baud selector, text
//! markers), the FPGA's SPI command set, and the NOR flash command set the
//! FPGA relays in passthrough mode.

// --- USB serial link ---

/// Bulk endpoint max packet size; both transport buffers have this capacity.
pub const BUFFER_SIZE: usize = 64;

/// Negotiated baud rate that selects the serial forwarder. Any other value
/// selects the command interpreter.
pub const FORWARDER_BAUD: u32 = 115_200;

/// Grace period after DTR rises before any protocol traffic.
pub const SETTLE_MS: u32 = 100;

// --- Timing ---

/// Delay after toggling passthrough so the FPGA can switch its SPI mux.
pub const PASSTHROUGH_SETTLE_MS: u32 = 1;

/// Upper bound for a flash erase/program to clear the busy bit.
/// The W25Q128JV datasheet gives 400 ms worst case for a sector erase.
pub const FLASH_BUSY_TIMEOUT_MS: u32 = 1000;

// --- Flash layout ---

pub const FLASH_SECTOR_SIZE: u32 = 4096;
pub const FLASH_PAGE_SIZE: u32 = 256;

/// Size of the image handled by the `r`, `R` and `P` commands.
pub const IMAGE_SIZE: u32 = 64 * 1024;

/// Number of leading bytes the `r` command prints as hex.
pub const HEX_DUMP_LEN: u32 = 512;

pub const PAGE_LEN: usize = FLASH_PAGE_SIZE as usize;

// --- Identification ---

/// Length of the FPGA identification block (bridge firmware version/identity).
pub const FPGA_ID_LEN: usize = 9;

/// Winbond
pub const EXPECTED_MANUFACTURER_ID: u8 = 0xEF;
/// W25Q128JV
pub const EXPECTED_DEVICE_ID: u8 = 0x17;

// --- Flash status bits ---

/// Status register 1: erase or program in progress.
pub const STATUS1_BUSY: u8 = 0x01;
/// Status register 2: quad IO enable (non-volatile).
pub const STATUS2_QE: u8 = 0x02;

// --- Forwarder status word ---

/// Sender has room for one byte.
pub const READY_SPACE: u8 = 0x01;
/// Sender has one byte to deliver.
pub const READY_DATA: u8 = 0x02;

// --- Text protocol markers ---

pub const OK_LINE: &str = "OK";
pub const DATA_MARKER: &str = "DATA:";
pub const SEND_MARKER: &str = "SEND:";
pub const ERROR_PREFIX: &str = "ERROR";

/// Argument bytes for [`FpgaCommand::PassthroughConfig`].
pub const PASSTHROUGH_ON: u8 = 0x01;
pub const PASSTHROUGH_OFF: u8 = 0x00;

/// First byte of every SPI conversation with the FPGA.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum FpgaCommand {
    /// Followed by [`PASSTHROUGH_ON`] or [`PASSTHROUGH_OFF`].
    PassthroughConfig = 0x01,
    /// Remaining bytes are relayed to the flash chip.
    FlashRelay = 0x02,
    /// Returns [`FPGA_ID_LEN`] identification bytes.
    Identify = 0x05,
    /// Followed by one zero byte; the FPGA resets the flash.
    ResetFlash = 0x06,
    /// Status word then one payload byte in each direction.
    SerialForward = 0x07,
}

/// NOR flash instructions (Winbond W25Q family).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum FlashCommand {
    PageProgram = 0x02,
    ReadData = 0x03,
    WriteDisable = 0x04,
    ReadStatus1 = 0x05,
    WriteEnable = 0x06,
    ReadStatus3 = 0x15,
    SectorErase = 0x20,
    WriteStatus2 = 0x31,
    ReadStatus2 = 0x35,
    ReadDeviceId = 0x90,
}

/// Commands understood by the command interpreter, one ASCII byte each.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Command {
    /// `\n`: liveness check, answered with `OK`.
    Ping,
    /// `x`: repeat the connection banner on the next tick.
    Reset,
    /// `z`: ask the FPGA to reset the flash chip.
    ResetFlash,
    /// `r`: hex dump of the first bytes plus checksum of the image.
    Dump,
    /// `R`: binary readout of the whole image after a `DATA:` marker.
    ReadImage,
    /// `P`: erase, then program and verify the image page by page.
    Program,
    /// `e`: single sector erase. Disabled.
    EraseSector,
    /// `p`: single page program. Disabled.
    ProgramPage,
}

impl Command {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            b'\n' => Some(Command::Ping),
            b'x' => Some(Command::Reset),
            b'z' => Some(Command::ResetFlash),
            b'r' => Some(Command::Dump),
            b'R' => Some(Command::ReadImage),
            b'P' => Some(Command::Program),
            b'e' => Some(Command::EraseSector),
            b'p' => Some(Command::ProgramPage),
            _ => None,
        }
    }

    pub fn as_byte(self) -> u8 {
        match self {
            Command::Ping => b'\n',
            Command::Reset => b'x',
            Command::ResetFlash => b'z',
            Command::Dump => b'r',
            Command::ReadImage => b'R',
            Command::Program => b'P',
            Command::EraseSector => b'e',
            Command::ProgramPage => b'p',
        }
    }
}

/// Additive checksum reported by the `r`, `R` and `P` commands.
pub fn checksum(data: &[u8]) -> u32 {
    data.iter()
        .fold(0u32, |sum, &byte| sum.wrapping_add(byte as u32))
}
