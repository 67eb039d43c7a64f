// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Host tool for the ueu USB to FPGA bridge.
//!
//! Usage:
//!   ueu-flash --port /dev/ttyACM0 info
//!   ueu-flash --port /dev/ttyACM0 read dump.bin
//!   ueu-flash --port /dev/ttyACM0 program rom.bin --offset p1
//!   ueu-flash pad rom.bin
//!   ueu-flash --port /dev/ttyACM0 echo-test

mod cli;
mod commands;
mod transport;

use anyhow::Result;
use clap::Parser;

fn main() -> Result<()> {
    let args = cli::Cli::parse();
    cli::run(args)
}
