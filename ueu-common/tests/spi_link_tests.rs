// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! SPI conversation framing tests.

mod support;

use support::{MockCs, MockSpi, Rig};
use ueu_common::spi_link::SpiLink;
use ueu_common::{Error, FlashCommand, FpgaCommand};

fn link(rig: &Rig) -> SpiLink<MockSpi, MockCs> {
    SpiLink::new(MockSpi(rig.world.clone()), MockCs(rig.world.clone()))
}

#[test]
fn test_new_link_is_deselected() {
    let rig = Rig::new();
    let link = link(&rig);

    assert!(!link.is_open());
    rig.with(|w| assert!(!w.fpga.selected));
}

#[test]
fn test_conversation_frames_command_byte() {
    let rig = Rig::new();
    let mut link = link(&rig);

    link.begin(FpgaCommand::Identify).unwrap();
    assert!(link.is_open());
    let first = link.exchange(0).unwrap();
    link.end().unwrap();

    assert_eq!(first, 0x55);
    assert!(!link.is_open());
    rig.with(|w| {
        assert_eq!(w.fpga.commands, vec![0x05]);
        assert_eq!(w.fpga.conversations, 1);
        assert!(!w.fpga.selected);
    });
}

#[test]
fn test_begin_twice_is_an_error() {
    let rig = Rig::new();
    let mut link = link(&rig);

    link.begin(FpgaCommand::Identify).unwrap();
    assert_eq!(link.begin(FpgaCommand::Identify), Err(Error::ConversationOpen));
    rig.with(|w| assert_eq!(w.fpga.conversations, 1));
}

#[test]
fn test_end_without_begin_is_an_error() {
    let rig = Rig::new();
    let mut link = link(&rig);

    assert_eq!(link.end(), Err(Error::NoConversation));
}

#[test]
fn test_exchange_outside_conversation_is_an_error() {
    let rig = Rig::new();
    let mut link = link(&rig);

    assert_eq!(link.exchange(0), Err(Error::NoConversation));
    rig.with(|w| assert_eq!(w.fpga.unframed_bytes, 0));
}

#[test]
fn test_passthrough_conversation_prefixes_relay_command() {
    let rig = Rig::new();
    let mut link = link(&rig);

    link.begin_passthrough(FlashCommand::ReadStatus2).unwrap();
    link.end().unwrap();

    rig.with(|w| assert_eq!(w.fpga.commands, vec![0x02]));
}

#[test]
fn test_release_closes_open_conversation() {
    let rig = Rig::new();
    let mut link = link(&rig);
    link.begin(FpgaCommand::SerialForward).unwrap();

    link.release();

    assert!(!link.is_open());
    rig.with(|w| assert!(!w.fpga.selected));
    link.begin(FpgaCommand::SerialForward).unwrap();
}
