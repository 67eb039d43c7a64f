// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Hardware seams consumed by the bridge.
//!
//! SPI and chip-select come straight from `embedded-hal`. The USB bulk pipe
//! and the millisecond clock have no `embedded-hal` equivalent, so they are
//! defined here and implemented by the board crate.

use embedded_hal::delay::DelayNs;

/// Host-controlled serial line parameters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct LineState {
    /// Host has the port open.
    pub dtr: bool,
    /// Negotiated baud rate, used as a mode selector.
    pub baud: u32,
}

/// Transfer completions reported by one [`UsbLink::poll`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LinkEvents {
    /// A bulk-OUT transfer landed in the receive buffer with this many bytes.
    pub received: Option<usize>,
    /// The bulk-IN transfer started by `begin_transmit` has been sent.
    pub transmitted: bool,
}

/// USB bulk-transfer facility of a CDC-ACM device.
///
/// Receives are explicitly armed: after `arm_receive` the link delivers
/// exactly one payload (possibly empty) into the buffer passed to `poll`, and
/// then stays idle until armed again. At most one transmit is in flight.
pub trait UsbLink {
    /// Arm the next host-to-device transfer.
    fn arm_receive(&mut self);

    /// Start a device-to-host transfer of `data`.
    fn begin_transmit(&mut self, data: &[u8]);

    /// Service the controller and report completed transfers. `rx` is only
    /// written while a receive is armed.
    fn poll(&mut self, rx: &mut [u8]) -> LinkEvents;

    /// Drop any host-to-device data the link holds that has not been
    /// delivered through `poll` yet.
    fn discard_rx(&mut self);

    /// Latest line state set by the host.
    fn line_state(&self) -> LineState;
}

/// Blocking delays plus a free-running millisecond counter.
pub trait Timebase: DelayNs {
    /// Milliseconds since an arbitrary epoch; wraps.
    fn now_ms(&mut self) -> u32;
}

/// Milliseconds elapsed between two [`Timebase::now_ms`] readings.
pub fn elapsed_ms(now: u32, since: u32) -> u32 {
    now.wrapping_sub(since)
}
