// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Command-line interface definitions.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use ueu_common::{FORWARDER_BAUD, IMAGE_SIZE};

use crate::commands;
use crate::transport::{Transport, DEFAULT_TIMEOUT_MS};

/// Command-line arguments.
#[derive(Parser)]
#[command(name = "ueu-flash")]
#[command(about = "Read and program FPGA configuration flash through the ueu bridge")]
pub struct Cli {
    /// Serial port (e.g., /dev/ttyACM0)
    #[arg(short, long)]
    pub port: Option<String>,

    /// Baud for command mode; any rate except 115200 selects it
    #[arg(short, long, default_value = "9600")]
    pub baud: u32,

    /// Serial read timeout in milliseconds
    #[arg(short, long, default_value_t = DEFAULT_TIMEOUT_MS)]
    pub timeout: u64,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands.
#[derive(Subcommand)]
pub enum Commands {
    /// Show FPGA and flash identification
    Info,

    /// Read the flash image into a file
    Read {
        /// Output file
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Bytes to keep (decimal, 0x hex, NNk or pNN)
        #[arg(short, long, default_value = "64k")]
        length: String,
    },

    /// Program a file into the flash image
    Program {
        /// Image file
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Where the file goes within the image (decimal, 0x hex, NNk or pNN)
        #[arg(short, long, default_value = "0")]
        offset: String,

        /// Skip reading the image back afterwards
        #[arg(long)]
        no_verify: bool,
    },

    /// Pad a ROM file with 0xFF bytes (no device needed)
    Pad {
        /// Input file
        #[arg(value_name = "INPUT")]
        input: PathBuf,

        /// Output file; defaults to INPUT.padded
        #[arg(value_name = "OUTPUT")]
        output: Option<PathBuf>,

        /// Padded size (decimal, 0x hex, NNk or pNN)
        #[arg(short, long, default_value = "16k")]
        size: String,
    },

    /// Exercise the serial forwarder against FPGA loopback logic
    EchoTest {
        /// Largest block to send
        #[arg(short, long, default_value = "1024")]
        max_len: usize,

        /// Stop after this many seconds
        #[arg(short, long, default_value = "60")]
        seconds: u64,
    },
}

fn port_name(cli: &Cli) -> Result<&str> {
    cli.port
        .as_deref()
        .context("This command needs --port")
}

/// Execute the parsed CLI command.
pub fn run(cli: Cli) -> Result<()> {
    if cli.baud == FORWARDER_BAUD && !matches!(cli.command, Commands::EchoTest { .. } | Commands::Pad { .. }) {
        bail!("{} baud selects the serial forwarder; pick another rate", FORWARDER_BAUD);
    }

    match &cli.command {
        Commands::Info => {
            let mut transport = Transport::open(port_name(&cli)?, cli.baud, cli.timeout)?;
            commands::info(&mut transport)
        }
        Commands::Read { file, length } => {
            let len = commands::parse_address(length)? as usize;
            let mut transport = Transport::open(port_name(&cli)?, cli.baud, cli.timeout)?;
            commands::read(&mut transport, file, len)
        }
        Commands::Program {
            file,
            offset,
            no_verify,
        } => {
            let offset = commands::parse_address(offset)? as usize;
            let mut transport = Transport::open(port_name(&cli)?, cli.baud, cli.timeout)?;
            commands::program(&mut transport, file, offset, !no_verify)
        }
        Commands::Pad {
            input,
            output,
            size,
        } => {
            let size = commands::parse_address(size)? as usize;
            if size > IMAGE_SIZE as usize {
                bail!("Pad size {} exceeds the {} byte image", size, IMAGE_SIZE);
            }
            let output = output.clone().unwrap_or_else(|| {
                let mut name = input.clone().into_os_string();
                name.push(".padded");
                PathBuf::from(name)
            });
            commands::pad(input, &output, size)
        }
        Commands::EchoTest { max_len, seconds } => {
            let mut transport = Transport::open(port_name(&cli)?, FORWARDER_BAUD, cli.timeout)?;
            transport.drain();
            println!("Echo test on {}", transport.port_name());
            commands::echo_test(&mut transport, *max_len, Duration::from_secs(*seconds))
        }
    }
}
