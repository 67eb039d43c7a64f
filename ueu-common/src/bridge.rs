// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Top-level connection and mode state machine.
//!
//! ```text
//!            DTR rises               > SETTLE_MS
//!  Offline ------------> Settling ---------------> Active
//!     ^                     |                        |
//!     +------ DTR drops ----+------------------------+
//! ```
//!
//! While Active, every tick goes to the serial forwarder if the negotiated
//! baud is [`FORWARDER_BAUD`] and to the command interpreter otherwise. The
//! baud is re-read on each tick, so the host can switch modes by changing it
//! without closing the port.

use core::fmt::Write;

use embedded_hal::digital::OutputPin;
use embedded_hal::spi::SpiBus;

use crate::command::CommandInterpreter;
use crate::error::{Error, Result};
use crate::forwarder::Forwarder;
use crate::hal::{elapsed_ms, Timebase, UsbLink};
use crate::protocol::{FORWARDER_BAUD, SETTLE_MS};
use crate::serial::HostSerial;
use crate::spi_link::SpiLink;

/// Connection phase.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Phase {
    /// DTR low. Initial state.
    Offline,
    /// DTR rose at `since`; waiting for the host to finish configuring.
    Settling { since: u32 },
    Active,
}

/// Handler selected by the negotiated baud.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Mode {
    Forwarder,
    Command,
}

impl Mode {
    pub fn for_baud(baud: u32) -> Self {
        if baud == FORWARDER_BAUD {
            Mode::Forwarder
        } else {
            Mode::Command
        }
    }
}

/// Hardware resources shared by the mode handlers.
pub struct Board<L, S, CS, T> {
    pub serial: HostSerial<L>,
    pub link: SpiLink<S, CS>,
    pub timer: T,
}

impl<L, S, CS, T> Board<L, S, CS, T>
where
    L: UsbLink,
    S: SpiBus,
    CS: OutputPin,
    T: Timebase,
{
    pub fn new(usb: L, spi: S, cs: CS, timer: T) -> Self {
        Self {
            serial: HostSerial::new(usb),
            link: SpiLink::new(spi, cs),
            timer,
        }
    }
}

pub struct Bridge<L, S, CS, T> {
    board: Board<L, S, CS, T>,
    phase: Phase,
    mode: Option<Mode>,
    forwarder: Forwarder,
    interpreter: CommandInterpreter,
}

impl<L, S, CS, T> Bridge<L, S, CS, T>
where
    L: UsbLink,
    S: SpiBus,
    CS: OutputPin,
    T: Timebase,
{
    pub fn new(board: Board<L, S, CS, T>) -> Self {
        Self {
            board,
            phase: Phase::Offline,
            mode: None,
            forwarder: Forwarder::new(),
            interpreter: CommandInterpreter::new(),
        }
    }

    pub fn board(&self) -> &Board<L, S, CS, T> {
        &self.board
    }

    pub fn board_mut(&mut self) -> &mut Board<L, S, CS, T> {
        &mut self.board
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Handler that ran on the most recent Active tick.
    pub fn mode(&self) -> Option<Mode> {
        self.mode
    }

    pub fn forwarder(&self) -> &Forwarder {
        &self.forwarder
    }

    pub fn interpreter(&self) -> &CommandInterpreter {
        &self.interpreter
    }

    /// One scheduler step. An error is a protocol-invariant violation and
    /// should end in [`report_fatal`](Self::report_fatal).
    pub fn tick(&mut self) -> Result<()> {
        self.board.serial.poll();

        let line = self.board.serial.line_state();
        if !line.dtr {
            if self.phase != Phase::Offline {
                info!("host closed port");
                self.go_offline();
            }
            return Ok(());
        }

        let now = self.board.timer.now_ms();
        if self.phase == Phase::Offline {
            info!("host opened port");
            self.board.serial.connect();
            self.phase = Phase::Settling { since: now };
        }

        if let Phase::Settling { since } = self.phase {
            if elapsed_ms(now, since) <= SETTLE_MS {
                return Ok(());
            }
            self.phase = Phase::Active;
        }

        let mode = Mode::for_baud(line.baud);
        if self.mode != Some(mode) {
            info!("baud {} selects {}", line.baud, mode);
            self.mode = Some(mode);
        }

        match mode {
            Mode::Forwarder => self.forwarder.tick(&mut self.board).map(|_| ()),
            Mode::Command => self.interpreter.tick(&mut self.board),
        }
    }

    /// Release the FPGA and tell the host what went wrong.
    pub fn report_fatal(&mut self, err: Error) {
        self.board.link.release();
        let _ = write!(self.board.serial, "FATAL: {}\r\n", err);
    }

    /// Keep USB serviced without running any protocol, e.g. after a fatal
    /// error.
    pub fn service(&mut self) {
        self.board.serial.poll();
    }

    fn go_offline(&mut self) {
        self.phase = Phase::Offline;
        self.mode = None;
        self.forwarder.reset();
        self.interpreter.reset();
    }
}
