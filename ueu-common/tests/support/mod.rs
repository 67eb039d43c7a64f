// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Test doubles: a USB host, an FPGA with a W25Q128JV behind its passthrough,
//! a chip-select line and a manually advanced clock. They share one `World`
//! so a test can script host behaviour around SPI activity.

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::VecDeque;
use std::convert::Infallible;
use std::rc::Rc;

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{self, OutputPin};
use embedded_hal::spi::{self, SpiBus};

use ueu_common::hal::{LineState, LinkEvents, Timebase, UsbLink};
use ueu_common::{Board, Bridge, BUFFER_SIZE};

pub const FLASH_SIZE: usize = 128 * 1024;

/// Clock advance per `now_ms` call, so busy loops always make progress.
const NS_PER_CLOCK_READ: u64 = 100_000;

// =============================================================================
// Host side of the USB link
// =============================================================================

#[derive(Default)]
pub struct Host {
    pub dtr: bool,
    pub baud: u32,
    /// Packets waiting to be sent to the device.
    pub outgoing: VecDeque<Vec<u8>>,
    /// Everything the device sent.
    pub received: Vec<u8>,
    /// Size of each bulk-IN transfer.
    pub transfers: Vec<usize>,
    pub armed: bool,
    pub arm_calls: usize,
    /// `arm_receive` while a receive was already armed.
    pub double_arms: usize,
    pub in_flight: Option<Vec<u8>>,
    /// The in-flight data already reached `received`; only the completion
    /// notification is outstanding.
    pub delivered: bool,
    /// `begin_transmit` while a transfer was in flight.
    pub overlapping_transmits: usize,
    /// Leave transfers pending instead of completing them on poll.
    pub hold_transmit: bool,
    /// Queued bytes thrown away by `discard_rx`.
    pub discarded: usize,
}

impl Host {
    fn poll(&mut self, rx: &mut [u8]) -> LinkEvents {
        let mut events = LinkEvents::default();

        if self.armed {
            if let Some(packet) = self.outgoing.pop_front() {
                rx[..packet.len()].copy_from_slice(&packet);
                self.armed = false;
                events.received = Some(packet.len());
            }
        }

        if !self.hold_transmit {
            if let Some(data) = self.in_flight.take() {
                if !self.delivered {
                    self.deliver(&data);
                }
                self.delivered = false;
                events.transmitted = true;
            }
        }

        events
    }

    fn transmit(&mut self, data: &[u8]) {
        if self.in_flight.is_some() {
            self.overlapping_transmits += 1;
        }
        // Data shows up on the host right away unless held; the device still
        // only learns about completion on its next poll.
        self.delivered = !self.hold_transmit;
        if self.delivered {
            self.deliver(data);
        }
        self.in_flight = Some(data.to_vec());
    }

    fn deliver(&mut self, data: &[u8]) {
        self.transfers.push(data.len());
        self.received.extend_from_slice(data);
    }
}

// =============================================================================
// Flash chip model
// =============================================================================

pub struct FlashChip {
    pub memory: Vec<u8>,
    pub manufacturer: u8,
    pub device: u8,
    pub status2: u8,
    pub status3: u8,
    pub wel: bool,
    /// Status reads left before the busy bit clears.
    pub busy_reads: u32,
    /// Never clear the busy bit.
    pub stuck_busy: bool,
    /// Bits that read back as zero regardless of programming, per address.
    pub stuck_low: Vec<(u32, u8)>,
    /// Non-status commands issued while busy.
    pub busy_violations: usize,
    pub erases: Vec<u32>,
    pub programs: Vec<u32>,
    pub status2_writes: usize,
    cmd: Option<u8>,
    index: usize,
    addr: u32,
    data: Vec<u8>,
}

impl Default for FlashChip {
    fn default() -> Self {
        Self {
            memory: vec![0xFF; FLASH_SIZE],
            manufacturer: 0xEF,
            device: 0x17,
            status2: 0x00,
            status3: 0x60,
            wel: false,
            busy_reads: 0,
            stuck_busy: false,
            stuck_low: Vec::new(),
            busy_violations: 0,
            erases: Vec::new(),
            programs: Vec::new(),
            status2_writes: 0,
            cmd: None,
            index: 0,
            addr: 0,
            data: Vec::new(),
        }
    }
}

impl FlashChip {
    pub fn fill_with(&mut self, pattern: impl Fn(usize) -> u8) {
        for (i, byte) in self.memory.iter_mut().enumerate() {
            *byte = pattern(i);
        }
    }

    fn busy(&self) -> bool {
        self.stuck_busy || self.busy_reads > 0
    }

    fn status1(&mut self) -> u8 {
        let busy = self.busy();
        if self.busy_reads > 0 {
            self.busy_reads -= 1;
        }
        (busy as u8) | if self.wel { 0x02 } else { 0 }
    }

    fn read_at(&self, addr: u32) -> u8 {
        let addr = addr as usize % FLASH_SIZE;
        let mut value = self.memory[addr];
        for &(a, mask) in &self.stuck_low {
            if a as usize == addr {
                value &= !mask;
            }
        }
        value
    }

    fn select(&mut self) {
        self.cmd = None;
        self.index = 0;
        self.addr = 0;
        self.data.clear();
    }

    fn exchange(&mut self, mosi: u8) -> u8 {
        let Some(cmd) = self.cmd else {
            self.cmd = Some(mosi);
            if mosi != 0x05 && self.busy() {
                self.busy_violations += 1;
            }
            match mosi {
                0x06 => self.wel = true,
                0x04 => self.wel = false,
                _ => {}
            }
            return 0xFF;
        };

        let i = self.index;
        self.index += 1;
        let in_addr = i < 3;
        if in_addr && matches!(cmd, 0x02 | 0x03 | 0x20 | 0x90) {
            self.addr = (self.addr << 8) | mosi as u32;
            return 0xFF;
        }

        match cmd {
            0x05 => self.status1(),
            0x35 => self.status2,
            0x15 => self.status3,
            0x90 => {
                if (i - 3) % 2 == 0 {
                    self.manufacturer
                } else {
                    self.device
                }
            }
            0x03 => self.read_at(self.addr + (i - 3) as u32),
            0x02 => {
                self.data.push(mosi);
                0xFF
            }
            0x31 => {
                self.data.push(mosi);
                0xFF
            }
            _ => 0xFF,
        }
    }

    fn deselect(&mut self) {
        match self.cmd {
            Some(0x20) if self.wel && self.index >= 3 => {
                let base = (self.addr as usize % FLASH_SIZE) & !0xFFF;
                self.memory[base..base + 4096].fill(0xFF);
                self.erases.push(self.addr);
                self.wel = false;
                self.busy_reads = 3;
            }
            Some(0x02) if self.wel && self.index >= 3 => {
                let page = (self.addr as usize % FLASH_SIZE) & !0xFF;
                let start = self.addr as usize & 0xFF;
                for (n, &byte) in self.data.iter().enumerate() {
                    let at = page + ((start + n) & 0xFF);
                    self.memory[at] &= byte;
                }
                self.programs.push(self.addr);
                self.wel = false;
                self.busy_reads = 2;
            }
            Some(0x31) if self.wel && !self.data.is_empty() => {
                self.status2 = self.data[0];
                self.status2_writes += 1;
                self.wel = false;
                self.busy_reads = 1;
            }
            _ => {}
        }
        self.cmd = None;
    }
}

// =============================================================================
// FPGA model
// =============================================================================

pub struct Fpga {
    pub selected: bool,
    pub passthrough: bool,
    pub id: [u8; 9],
    pub flash_resets: usize,
    pub conversations: usize,
    /// First byte of every conversation, in order.
    pub commands: Vec<u8>,
    /// Bytes clocked while the chip was not selected.
    pub unframed_bytes: usize,
    /// Flash relay traffic while passthrough was off.
    pub relay_without_passthrough: usize,
    pub flash: FlashChip,
    // Forwarder side
    pub has_space: bool,
    pub to_host: VecDeque<u8>,
    pub from_host: Vec<u8>,
    /// Loop bytes from the host straight back.
    pub echo: bool,
    /// (device status, fpga status) for each forwarder conversation.
    pub handshakes: Vec<(u8, u8)>,
    cmd: Option<u8>,
    index: usize,
    local_status: u8,
    remote_status: u8,
}

impl Default for Fpga {
    fn default() -> Self {
        Self {
            selected: false,
            passthrough: false,
            id: [0x55, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0xAA],
            flash_resets: 0,
            conversations: 0,
            commands: Vec::new(),
            unframed_bytes: 0,
            relay_without_passthrough: 0,
            flash: FlashChip::default(),
            has_space: true,
            to_host: VecDeque::new(),
            from_host: Vec::new(),
            echo: false,
            handshakes: Vec::new(),
            cmd: None,
            index: 0,
            local_status: 0,
            remote_status: 0,
        }
    }
}

impl Fpga {
    fn select(&mut self) {
        self.selected = true;
        self.cmd = None;
        self.index = 0;
        self.conversations += 1;
    }

    fn deselect(&mut self) {
        if self.cmd == Some(0x02) && self.passthrough {
            self.flash.deselect();
        }
        self.selected = false;
        self.cmd = None;
    }

    fn exchange(&mut self, mosi: u8) -> u8 {
        if !self.selected {
            self.unframed_bytes += 1;
            return 0xFF;
        }

        let Some(cmd) = self.cmd else {
            self.cmd = Some(mosi);
            self.commands.push(mosi);
            if mosi == 0x02 && self.passthrough {
                self.flash.select();
            }
            return 0x00;
        };

        let i = self.index;
        self.index += 1;

        match cmd {
            0x01 => {
                if i == 0 {
                    self.passthrough = mosi == 0x01;
                }
                0x00
            }
            0x02 => {
                if self.passthrough {
                    self.flash.exchange(mosi)
                } else {
                    self.relay_without_passthrough += 1;
                    0xFF
                }
            }
            0x05 => self.id.get(i).copied().unwrap_or(0),
            0x06 => {
                if i == 0 {
                    self.flash_resets += 1;
                }
                0x00
            }
            0x07 => self.forward(i, mosi),
            _ => 0xFF,
        }
    }

    fn forward(&mut self, i: usize, mosi: u8) -> u8 {
        match i {
            0 => {
                self.local_status = mosi;
                self.remote_status = (self.has_space as u8) | ((!self.to_host.is_empty() as u8) << 1);
                self.handshakes.push((self.local_status, self.remote_status));
                self.remote_status
            }
            1 => {
                let reply = if self.remote_status & 0x02 != 0 && self.local_status & 0x01 != 0 {
                    self.to_host.pop_front().unwrap_or(0)
                } else {
                    0
                };
                if self.local_status & 0x02 != 0 && self.remote_status & 0x01 != 0 {
                    self.from_host.push(mosi);
                    if self.echo {
                        self.to_host.push_back(mosi);
                    }
                }
                reply
            }
            _ => 0,
        }
    }
}

// =============================================================================
// Shared world and HAL implementations
// =============================================================================

#[derive(Default)]
pub struct World {
    pub host: Host,
    pub fpga: Fpga,
    pub now_ns: u64,
    /// Drop DTR once this many sector erases have completed.
    pub drop_dtr_after_erases: Option<usize>,
    /// Drop DTR once the device asks for a packet and none is queued.
    pub drop_dtr_when_starved: bool,
    /// Drop DTR after this many more link polls.
    pub drop_dtr_after_polls: Option<usize>,
}

pub type Shared = Rc<RefCell<World>>;

pub struct MockLink(pub Shared);
pub struct MockSpi(pub Shared);
pub struct MockCs(pub Shared);
pub struct MockTimer(pub Shared);

impl UsbLink for MockLink {
    fn arm_receive(&mut self) {
        let mut world = self.0.borrow_mut();
        if world.host.armed {
            world.host.double_arms += 1;
        }
        world.host.armed = true;
        world.host.arm_calls += 1;
    }

    fn begin_transmit(&mut self, data: &[u8]) {
        self.0.borrow_mut().host.transmit(data);
    }

    fn poll(&mut self, rx: &mut [u8]) -> LinkEvents {
        let mut world = self.0.borrow_mut();
        let events = world.host.poll(rx);
        if world.drop_dtr_when_starved && world.host.armed && world.host.outgoing.is_empty() {
            world.host.dtr = false;
        }
        match world.drop_dtr_after_polls {
            Some(0) => world.host.dtr = false,
            Some(n) => world.drop_dtr_after_polls = Some(n - 1),
            None => {}
        }
        events
    }

    fn discard_rx(&mut self) {
        let mut world = self.0.borrow_mut();
        let stale: usize = world.host.outgoing.drain(..).map(|p| p.len()).sum();
        world.host.discarded += stale;
    }

    fn line_state(&self) -> LineState {
        let world = self.0.borrow();
        LineState {
            dtr: world.host.dtr,
            baud: world.host.baud,
        }
    }
}

impl spi::ErrorType for MockSpi {
    type Error = Infallible;
}

impl SpiBus<u8> for MockSpi {
    fn read(&mut self, words: &mut [u8]) -> Result<(), Self::Error> {
        let mut world = self.0.borrow_mut();
        for word in words.iter_mut() {
            *word = world.fpga.exchange(0);
        }
        Ok(())
    }

    fn write(&mut self, words: &[u8]) -> Result<(), Self::Error> {
        let mut world = self.0.borrow_mut();
        for &word in words {
            world.fpga.exchange(word);
        }
        Ok(())
    }

    fn transfer(&mut self, read: &mut [u8], write: &[u8]) -> Result<(), Self::Error> {
        let mut world = self.0.borrow_mut();
        let len = read.len().max(write.len());
        for i in 0..len {
            let out = world.fpga.exchange(write.get(i).copied().unwrap_or(0));
            if let Some(slot) = read.get_mut(i) {
                *slot = out;
            }
        }
        Ok(())
    }

    fn transfer_in_place(&mut self, words: &mut [u8]) -> Result<(), Self::Error> {
        let mut world = self.0.borrow_mut();
        for word in words.iter_mut() {
            *word = world.fpga.exchange(*word);
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

impl digital::ErrorType for MockCs {
    type Error = Infallible;
}

impl OutputPin for MockCs {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.0.borrow_mut().fpga.select();
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        let mut world = self.0.borrow_mut();
        if world.fpga.selected {
            world.fpga.deselect();
        }
        if let Some(limit) = world.drop_dtr_after_erases {
            if world.fpga.flash.erases.len() >= limit {
                world.host.dtr = false;
            }
        }
        Ok(())
    }
}

impl DelayNs for MockTimer {
    fn delay_ns(&mut self, ns: u32) {
        self.0.borrow_mut().now_ns += ns as u64;
    }
}

impl Timebase for MockTimer {
    fn now_ms(&mut self) -> u32 {
        let mut world = self.0.borrow_mut();
        world.now_ns += NS_PER_CLOCK_READ;
        (world.now_ns / 1_000_000) as u32
    }
}

// =============================================================================
// Rig
// =============================================================================

pub type TestBoard = Board<MockLink, MockSpi, MockCs, MockTimer>;
pub type TestBridge = Bridge<MockLink, MockSpi, MockCs, MockTimer>;

pub struct Rig {
    pub world: Shared,
}

impl Rig {
    pub fn new() -> Self {
        Self {
            world: Rc::new(RefCell::new(World::default())),
        }
    }

    pub fn board(&self) -> TestBoard {
        Board::new(
            MockLink(self.world.clone()),
            MockSpi(self.world.clone()),
            MockCs(self.world.clone()),
            MockTimer(self.world.clone()),
        )
    }

    pub fn bridge(&self) -> TestBridge {
        Bridge::new(self.board())
    }

    /// A bridge that has gone through settling at `baud` and run its first
    /// Active tick. Output produced so far is discarded.
    pub fn active_bridge(&self, baud: u32) -> TestBridge {
        let mut bridge = self.bridge();
        self.set_baud(baud);
        self.set_dtr(true);
        bridge.tick().unwrap();
        self.advance_ms(101);
        bridge.tick().unwrap();
        self.take_output();
        bridge
    }

    pub fn set_dtr(&self, dtr: bool) {
        self.world.borrow_mut().host.dtr = dtr;
    }

    pub fn set_baud(&self, baud: u32) {
        self.world.borrow_mut().host.baud = baud;
    }

    pub fn advance_ms(&self, ms: u32) {
        self.world.borrow_mut().now_ns += ms as u64 * 1_000_000;
    }

    /// Queue bytes from the host, split into full-size packets.
    pub fn host_send(&self, data: &[u8]) {
        let mut world = self.world.borrow_mut();
        for chunk in data.chunks(BUFFER_SIZE) {
            world.host.outgoing.push_back(chunk.to_vec());
        }
    }

    pub fn host_send_packet(&self, packet: &[u8]) {
        self.world.borrow_mut().host.outgoing.push_back(packet.to_vec());
    }

    pub fn output(&self) -> Vec<u8> {
        self.world.borrow().host.received.clone()
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.output()).into_owned()
    }

    pub fn take_output(&self) -> Vec<u8> {
        std::mem::take(&mut self.world.borrow_mut().host.received)
    }

    pub fn take_text(&self) -> String {
        String::from_utf8_lossy(&self.take_output()).into_owned()
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut World) -> R) -> R {
        f(&mut self.world.borrow_mut())
    }
}

/// Deterministic, non-trivial image content.
pub fn pattern(i: usize) -> u8 {
    (i.wrapping_mul(7) ^ (i >> 8)) as u8
}
