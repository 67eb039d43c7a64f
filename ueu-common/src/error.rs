// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Protocol-invariant violations.
//!
//! Every variant indicates a logic or hardware fault rather than a runtime
//! condition the bridge can recover from: callers propagate it up to the
//! main loop, which reports it to the host and halts. Recoverable outcomes
//! (host disconnects, verification mismatches, unknown flash chips) are
//! reported as values, not errors.

use core::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// An SPI conversation was started while another one was open.
    ConversationOpen,
    /// An SPI conversation was used or ended while none was open.
    NoConversation,
    /// The inbound buffer was read while empty.
    InboundEmpty,
    /// The SPI peripheral reported an error.
    Spi,
    /// The chip-select pin could not be driven.
    Pin,
    /// The flash busy bit did not clear in time.
    FlashBusyTimeout,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Error::ConversationOpen => "Attempt to start SPI when already started!",
            Error::NoConversation => "Attempt to end SPI when not started!",
            Error::InboundEmpty => "Read from empty serial buffer!",
            Error::Spi => "SPI transfer failed",
            Error::Pin => "SPI select pin failed",
            Error::FlashBusyTimeout => "Flash busy timeout",
        };
        f.write_str(msg)
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}

pub type Result<T> = core::result::Result<T, Error>;
