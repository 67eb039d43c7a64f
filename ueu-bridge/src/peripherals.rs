// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Peripheral initialization for the bridge.
//!
//! Pinout: SPI0 on GP16 (MISO), GP18 (SCK), GP19 (MOSI), FPGA select on
//! GP17, status LED on GP25.

use embedded_hal::delay::DelayNs;
use rp2040_hal as hal;
use rp2040_hal::fugit::RateExtU32;
use rp2040_hal::usb::UsbBus;
use rp2040_hal::Clock;
use ueu_common::Timebase;
use usb_device::class_prelude::UsbBusAllocator;

pub type LedPin =
    hal::gpio::Pin<hal::gpio::bank0::Gpio25, hal::gpio::FunctionSioOutput, hal::gpio::PullDown>;
pub type CsPin =
    hal::gpio::Pin<hal::gpio::bank0::Gpio17, hal::gpio::FunctionSioOutput, hal::gpio::PullDown>;

type MosiPin = hal::gpio::Pin<hal::gpio::bank0::Gpio19, hal::gpio::FunctionSpi, hal::gpio::PullDown>;
type MisoPin = hal::gpio::Pin<hal::gpio::bank0::Gpio16, hal::gpio::FunctionSpi, hal::gpio::PullDown>;
type SckPin = hal::gpio::Pin<hal::gpio::bank0::Gpio18, hal::gpio::FunctionSpi, hal::gpio::PullDown>;

pub type FpgaSpi = hal::spi::Spi<hal::spi::Enabled, hal::pac::SPI0, (MosiPin, MisoPin, SckPin), 8>;

/// SPI clock towards the FPGA.
const SPI_FREQ_HZ: u32 = 8_000_000;

/// Static storage for UsbBusAllocator (required by usb-device for 'static lifetime).
static mut USB_BUS: Option<UsbBusAllocator<UsbBus>> = None;

pub fn usb_bus_ref() -> &'static UsbBusAllocator<UsbBus> {
    unsafe { (*core::ptr::addr_of!(USB_BUS)).as_ref().unwrap() }
}

pub fn store_usb_bus(bus: UsbBusAllocator<UsbBus>) {
    unsafe {
        USB_BUS = Some(bus);
    }
}

/// Microsecond hardware timer exposed as the bridge timebase.
pub struct BridgeTimer(hal::Timer);

impl DelayNs for BridgeTimer {
    fn delay_ns(&mut self, ns: u32) {
        self.0.delay_ns(ns);
    }

    fn delay_us(&mut self, us: u32) {
        self.0.delay_us(us);
    }

    fn delay_ms(&mut self, ms: u32) {
        self.0.delay_ms(ms);
    }
}

impl Timebase for BridgeTimer {
    fn now_ms(&mut self) -> u32 {
        // Wraps after ~49 days; callers compare with wrapping_sub.
        (self.0.get_counter().ticks() / 1000) as u32
    }
}

pub struct Peripherals {
    pub led_pin: LedPin,
    pub cs_pin: CsPin,
    pub spi: FpgaSpi,
    pub timer: BridgeTimer,
    pub usb: UsbPeripherals,
}

pub struct UsbPeripherals {
    pub regs: hal::pac::USBCTRL_REGS,
    pub dpram: hal::pac::USBCTRL_DPRAM,
    pub clock: hal::clocks::UsbClock,
    pub resets: hal::pac::RESETS,
}

pub fn init() -> Peripherals {
    let mut pac = unsafe { hal::pac::Peripherals::steal() };

    let mut watchdog = hal::Watchdog::new(pac.WATCHDOG);
    let clocks = hal::clocks::init_clocks_and_plls(
        12_000_000u32,
        pac.XOSC,
        pac.CLOCKS,
        pac.PLL_SYS,
        pac.PLL_USB,
        &mut pac.RESETS,
        &mut watchdog,
    )
    .unwrap();

    let timer = hal::Timer::new(pac.TIMER, &mut pac.RESETS, &clocks);
    let sio = hal::Sio::new(pac.SIO);
    let pins = hal::gpio::Pins::new(
        pac.IO_BANK0,
        pac.PADS_BANK0,
        sio.gpio_bank0,
        &mut pac.RESETS,
    );

    // Select idles high so the FPGA never sees a half-configured bus.
    let cs_pin = pins
        .gpio17
        .into_push_pull_output_in_state(hal::gpio::PinState::High);

    let mosi: MosiPin = pins.gpio19.into_function();
    let miso: MisoPin = pins.gpio16.into_function();
    let sck: SckPin = pins.gpio18.into_function();
    let spi = hal::spi::Spi::<_, _, _, 8>::new(pac.SPI0, (mosi, miso, sck)).init(
        &mut pac.RESETS,
        clocks.peripheral_clock.freq(),
        SPI_FREQ_HZ.Hz(),
        embedded_hal::spi::MODE_0,
    );

    defmt::debug!("SPI0 at {} Hz, mode 0", SPI_FREQ_HZ);

    Peripherals {
        led_pin: pins.gpio25.into_push_pull_output(),
        cs_pin,
        spi,
        timer: BridgeTimer(timer),
        usb: UsbPeripherals {
            regs: pac.USBCTRL_REGS,
            dpram: pac.USBCTRL_DPRAM,
            clock: clocks.usb_clock,
            resets: pac.RESETS,
        },
    }
}
