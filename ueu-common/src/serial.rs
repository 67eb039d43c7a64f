// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Host-facing serial buffers over a USB bulk link.
//!
//! The inbound buffer holds exactly one bulk-OUT payload at a time. It is
//! refilled only after the reader has drained it, which keeps the host
//! NAKed (and therefore flow-controlled) while the bridge is busy.
//!
//! The outbound buffer collects bytes for the next bulk-IN transfer. Only
//! one transfer is in flight at a time, and writers wait while it is.
//!
//! `on_received` and `on_transmitted` are the only writers of the buffer
//! cursors on the notification side; [`HostSerial::poll`] delivers them from
//! the link, and every wait loop in this module pumps it.

use core::fmt;

use heapless::Vec;

use crate::error::{Error, Result};
use crate::hal::{LineState, UsbLink};
use crate::protocol::BUFFER_SIZE;

pub struct HostSerial<L> {
    link: L,
    rx_buf: [u8; BUFFER_SIZE],
    rx_pos: usize,
    rx_len: usize,
    rx_armed: bool,
    tx_buf: Vec<u8, BUFFER_SIZE>,
    tx_flushing: bool,
}

impl<L: UsbLink> HostSerial<L> {
    pub fn new(link: L) -> Self {
        Self {
            link,
            rx_buf: [0u8; BUFFER_SIZE],
            rx_pos: 0,
            rx_len: 0,
            rx_armed: false,
            tx_buf: Vec::new(),
            tx_flushing: false,
        }
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    pub fn line_state(&self) -> LineState {
        self.link.line_state()
    }

    /// Host has the port open.
    pub fn dtr(&self) -> bool {
        self.link.line_state().dtr
    }

    /// Start a new host session: drop unread input left over from the
    /// previous one, both in our buffer and queued in the link, and make
    /// sure a receive is armed.
    pub fn connect(&mut self) {
        if self.rx_len > 0 {
            debug!("discarding {} stale inbound bytes", self.rx_len);
        }
        self.rx_pos = 0;
        self.rx_len = 0;
        self.link.discard_rx();
        self.arm_receive();
    }

    /// Service the link and apply any completed transfers.
    pub fn poll(&mut self) {
        let events = self.link.poll(&mut self.rx_buf);
        if let Some(count) = events.received {
            self.on_received(count);
        }
        if events.transmitted {
            self.on_transmitted();
        }
    }

    /// A bulk-OUT transfer of `count` bytes landed in the receive buffer.
    pub fn on_received(&mut self, count: usize) {
        debug_assert!(self.rx_len == 0, "inbound buffer refilled while not empty");
        self.rx_armed = false;
        self.rx_pos = 0;
        self.rx_len = count.min(BUFFER_SIZE);
        if self.rx_len == 0 {
            // Zero-length packet; nothing to drain, so ask for the next one now.
            self.arm_receive();
        }
    }

    /// The in-flight bulk-IN transfer has been picked up by the host.
    pub fn on_transmitted(&mut self) {
        self.tx_buf.clear();
        self.tx_flushing = false;
    }

    /// Bytes left in the current inbound payload.
    pub fn available(&self) -> usize {
        self.rx_len
    }

    /// Outbound bytes queued or in flight.
    pub fn queued(&self) -> usize {
        self.tx_buf.len()
    }

    pub fn is_flushing(&self) -> bool {
        self.tx_flushing
    }

    pub fn readable(&mut self) -> bool {
        if self.rx_len == 0 {
            self.poll();
        }
        self.rx_len > 0
    }

    /// Take one inbound byte. Callers must check [`readable`](Self::readable)
    /// first.
    pub fn read_byte(&mut self) -> Result<u8> {
        if self.rx_len == 0 {
            return Err(Error::InboundEmpty);
        }

        let byte = self.rx_buf[self.rx_pos];
        self.rx_pos += 1;
        self.rx_len -= 1;

        if self.rx_len == 0 {
            self.arm_receive();
        }

        Ok(byte)
    }

    pub fn writable(&mut self) -> bool {
        self.poll();
        self.has_space()
    }

    /// Queue one byte, waiting for buffer space if needed.
    ///
    /// If the host closes the port while we wait, the byte is dropped:
    /// nobody is left to receive it and the transfer may never complete.
    pub fn write_byte(&mut self, byte: u8) {
        while !self.writable() {
            if !self.dtr() {
                debug!("host gone, dropping output");
                return;
            }
        }

        // has_space() guarantees room.
        self.tx_buf.push(byte).ok();

        if self.tx_buf.len() >= BUFFER_SIZE - 1 {
            self.flush();
        }
    }

    /// Queue a slice and flush it.
    pub fn write_all(&mut self, data: &[u8]) {
        for &byte in data {
            self.write_byte(byte);
        }
        self.flush();
    }

    /// Start a transfer of the queued bytes, unless one is already in flight
    /// or there is nothing to send.
    pub fn flush(&mut self) {
        if self.tx_flushing || self.tx_buf.is_empty() {
            return;
        }
        self.tx_flushing = true;
        self.link.begin_transmit(&self.tx_buf);
    }

    pub fn print(&mut self, s: &str) {
        self.write_all(s.as_bytes());
    }

    pub fn println(&mut self, s: &str) {
        self.print(s);
        self.print("\r\n");
    }

    fn has_space(&self) -> bool {
        !self.tx_flushing && self.tx_buf.len() < BUFFER_SIZE - 1
    }

    fn arm_receive(&mut self) {
        if !self.rx_armed {
            self.rx_armed = true;
            self.link.arm_receive();
        }
    }
}

impl<L: UsbLink> fmt::Write for HostSerial<L> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.print(s);
        Ok(())
    }
}
