// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Core of the ueu USB to FPGA bridge.
//!
//! Everything here is hardware independent and runs on top of the traits in
//! [`hal`], so the same code drives the RP2040 firmware and the host-side
//! test rigs:
//! - [`serial`]: inbound/outbound USB bulk buffers and their flow control
//! - [`spi_link`]: SPI conversation framing towards the FPGA
//! - [`flash`]: NOR flash command set through the FPGA passthrough
//! - [`forwarder`]: flow-controlled byte relay to FPGA logic
//! - [`command`]: single-character flash programming interface
//! - [`bridge`]: connection phase and mode state machine
//!
//! Features:
//! - `defmt`: log through `defmt` and derive `defmt::Format` on public types
//! - `std`: implement `std::error::Error` for host tools

#![cfg_attr(not(feature = "std"), no_std)]

// Must come first so the logging macros are visible to the other modules.
mod fmt;

pub mod bridge;
pub mod command;
pub mod error;
pub mod flash;
pub mod forwarder;
pub mod hal;
pub mod protocol;
pub mod serial;
pub mod spi_link;

// Re-export commonly used types
pub use bridge::{Board, Bridge, Mode, Phase};
pub use error::{Error, Result};
pub use hal::{LineState, LinkEvents, Timebase, UsbLink};
pub use protocol::{Command, FlashCommand, FpgaCommand};
pub use protocol::{BUFFER_SIZE, FLASH_PAGE_SIZE, FLASH_SECTOR_SIZE, FORWARDER_BAUD, IMAGE_SIZE};

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::OutputPin;

/// Blink an LED a specified number of times.
pub fn blink(led: &mut impl OutputPin, timer: &mut impl DelayNs, count: u32, period_ms: u32) {
    for _ in 0..count {
        led.set_high().ok();
        timer.delay_ms(period_ms);
        led.set_low().ok();
        timer.delay_ms(period_ms);
    }
}
