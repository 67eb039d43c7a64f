// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! ueu USB to FPGA bridge firmware for RP2040.
//!
//! Presents a CDC-ACM port to the host. At 115200 baud the port is a byte
//! pipe into FPGA logic; at any other baud it is a single-character console
//! for identifying, dumping and programming the FPGA's configuration flash.

#![no_std]
#![no_main]

mod peripherals;
mod usb_link;

use defmt_rtt as _;
use embedded_hal::digital::OutputPin;
use panic_probe as _;
use rp2040_hal as hal;
use ueu_common::{Board, Bridge};
use usb_device::class_prelude::UsbBusAllocator;

defmt::timestamp!("{=u64:us}", { 0 });

use cortex_m_rt::entry;

#[unsafe(link_section = ".boot2")]
#[used]
pub static BOOT2: [u8; 256] = rp2040_boot2::BOOT_LOADER_GENERIC_03H;

#[entry]
fn main() -> ! {
    defmt::println!("Bridge init");

    let mut p = peripherals::init();

    ueu_common::blink(&mut p.led_pin, &mut p.timer, 3, 200);

    let mut usb = p.usb;
    let usb_bus = UsbBusAllocator::new(hal::usb::UsbBus::new(
        usb.regs,
        usb.dpram,
        usb.clock,
        true,
        &mut usb.resets,
    ));
    peripherals::store_usb_bus(usb_bus);
    let link = usb_link::UsbCdcLink::new(peripherals::usb_bus_ref());

    defmt::println!("USB CDC initialized, entering main loop");
    p.led_pin.set_high().ok();

    let board = Board::new(link, p.spi, p.cs_pin, p.timer);
    let mut bridge = Bridge::new(board);

    loop {
        if let Err(err) = bridge.tick() {
            defmt::error!("fatal: {}", err);
            bridge.report_fatal(err);
            p.led_pin.set_low().ok();
            // Keep enumerated so the host can read the report.
            loop {
                bridge.service();
            }
        }
    }
}
