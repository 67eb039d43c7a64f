// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! USB CDC-ACM device exposed to the bridge core as a [`UsbLink`].
//!
//! usbd-serial keeps its own endpoint buffers, so "armed" here means the
//! bridge is willing to take the next packet out of them. While unarmed the
//! class buffer fills up and the host gets NAKed.

use heapless::Vec;
use rp2040_hal::usb::UsbBus;
use ueu_common::hal::{LineState, LinkEvents, UsbLink};
use ueu_common::BUFFER_SIZE;
use usb_device::class_prelude::UsbBusAllocator;
use usb_device::prelude::*;
use usbd_serial::SerialPort;

pub struct UsbCdcLink {
    serial: SerialPort<'static, UsbBus>,
    usb_dev: UsbDevice<'static, UsbBus>,
    rx_armed: bool,
    tx_buf: Vec<u8, BUFFER_SIZE>,
    tx_pos: usize,
    tx_active: bool,
}

impl UsbCdcLink {
    pub fn new(usb_bus: &'static UsbBusAllocator<UsbBus>) -> Self {
        let serial = SerialPort::new(usb_bus);
        let usb_dev = UsbDeviceBuilder::new(usb_bus, UsbVidPid(0x2E8A, 0x000A))
            .strings(&[StringDescriptors::default()
                .manufacturer("ADNT")
                .product("ueu FPGA bridge")
                .serial_number("0001")])
            .unwrap()
            .device_class(usbd_serial::USB_CLASS_CDC)
            .build();

        Self {
            serial,
            usb_dev,
            rx_armed: false,
            tx_buf: Vec::new(),
            tx_pos: 0,
            tx_active: false,
        }
    }

    /// Push as much of the pending transfer as the class accepts. Returns
    /// true once all of it has left the device.
    fn push_tx(&mut self) -> bool {
        while self.tx_pos < self.tx_buf.len() {
            match self.serial.write(&self.tx_buf[self.tx_pos..]) {
                Ok(n) => self.tx_pos += n,
                Err(UsbError::WouldBlock) => return false,
                Err(_) => {
                    defmt::warn!("usb write failed, dropping {} bytes", self.tx_buf.len() - self.tx_pos);
                    self.tx_pos = self.tx_buf.len();
                }
            }
        }

        match self.serial.flush() {
            Ok(()) => true,
            Err(UsbError::WouldBlock) => false,
            Err(_) => true,
        }
    }

    fn finish_tx(&mut self) {
        self.tx_buf.clear();
        self.tx_pos = 0;
        self.tx_active = false;
    }
}

impl UsbLink for UsbCdcLink {
    fn arm_receive(&mut self) {
        self.rx_armed = true;
    }

    fn begin_transmit(&mut self, data: &[u8]) {
        self.tx_buf.clear();
        let len = data.len().min(BUFFER_SIZE);
        // len is clamped to capacity.
        self.tx_buf.extend_from_slice(&data[..len]).ok();
        self.tx_pos = 0;
        self.tx_active = true;
        // Completion is reported from poll() only.
        if self.serial.dtr() {
            self.push_tx();
        }
    }

    fn poll(&mut self, rx: &mut [u8]) -> LinkEvents {
        self.usb_dev.poll(&mut [&mut self.serial]);

        let mut events = LinkEvents::default();

        if self.rx_armed {
            if let Ok(count) = self.serial.read(rx) {
                if count > 0 {
                    self.rx_armed = false;
                    events.received = Some(count);
                }
            }
        }

        if self.tx_active {
            if !self.serial.dtr() {
                // Nobody is listening; the transfer would never drain.
                self.finish_tx();
                events.transmitted = true;
            } else if self.push_tx() {
                self.finish_tx();
                events.transmitted = true;
            }
        }

        events
    }

    fn discard_rx(&mut self) {
        let mut scratch = [0u8; BUFFER_SIZE];
        let mut dropped = 0;
        loop {
            self.usb_dev.poll(&mut [&mut self.serial]);
            match self.serial.read(&mut scratch) {
                Ok(n) if n > 0 => dropped += n,
                _ => break,
            }
        }
        if dropped > 0 {
            defmt::debug!("discarded {} stale bytes", dropped);
        }
    }

    fn line_state(&self) -> LineState {
        LineState {
            dtr: self.serial.dtr(),
            baud: self.serial.line_coding().data_rate(),
        }
    }
}
