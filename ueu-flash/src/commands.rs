// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Command implementations for bridge operations.

use std::fs;
use std::io::{Read, Write};
use std::path::Path;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use indicatif::{ProgressBar, ProgressStyle};

use ueu_common::protocol::{checksum, DATA_MARKER, ERROR_PREFIX, OK_LINE, SEND_MARKER};
use ueu_common::IMAGE_SIZE;

use crate::transport::Transport;

/// ROM slot size used by `pNN` addresses.
pub const ROM_PAGE_SIZE: u32 = 16 * 1024;

const IMAGE_LEN: usize = IMAGE_SIZE as usize;

/// Reply to flash commands when the chip was not recognized.
const FLASH_NOT_DETECTED: &str = "Flash not detected";

/// Parse an address or length: decimal, `0x` hex, `NNk` kilobytes or `pNN`
/// 16 KiB ROM pages.
pub fn parse_address(s: &str) -> Result<u32> {
    let s = s.trim();
    let value = if let Some(page) = s.strip_prefix('p') {
        page.parse::<u32>()
            .ok()
            .and_then(|p| p.checked_mul(ROM_PAGE_SIZE))
    } else if let Some(kb) = s.strip_suffix('k') {
        kb.parse::<u32>().ok().and_then(|k| k.checked_mul(1024))
    } else if let Some(hex) = s.strip_prefix("0x") {
        u32::from_str_radix(hex, 16).ok()
    } else {
        s.parse::<u32>().ok()
    };

    value.with_context(|| format!("Invalid address or length: {:?}", s))
}

/// Pad `data` with 0xFF up to `size` bytes.
pub fn pad_image(data: &[u8], size: usize) -> Result<Vec<u8>> {
    place_image(data, 0, size)
}

/// Build a `size`-byte erased image with `data` at `offset`.
pub fn place_image(data: &[u8], offset: usize, size: usize) -> Result<Vec<u8>> {
    let end = offset + data.len();
    if end > size {
        bail!(
            "Image too large: {} bytes at offset {:#x} exceeds {} bytes",
            data.len(),
            offset,
            size
        );
    }
    let mut image = vec![0xFF; size];
    image[offset..end].copy_from_slice(data);
    Ok(image)
}

/// Parse the `addr+len` line that follows `SEND:` (both hex).
pub fn parse_send_request(line: &str) -> Option<(usize, usize)> {
    let (addr, len) = line.trim().split_once('+')?;
    let addr = usize::from_str_radix(addr, 16).ok()?;
    let len = usize::from_str_radix(len, 16).ok()?;
    Some((addr, len))
}

/// Parse `"{count:x} bytes read; checksum {sum:x}"`.
pub fn parse_read_summary(line: &str) -> Option<(u32, u32)> {
    let (count, rest) = line.trim().split_once(" bytes read; checksum ")?;
    let count = u32::from_str_radix(count, 16).ok()?;
    let sum = u32::from_str_radix(rest, 16).ok()?;
    Some((count, sum))
}

fn progress_bar(len: u64) -> Result<ProgressBar> {
    let pb = ProgressBar::new(len);
    pb.set_style(
        ProgressStyle::default_bar()
            .template(
                "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta}) {msg}",
            )?
            .progress_chars("#>-"),
    );
    Ok(pb)
}

/// Poke the interpreter and wait for its `OK`, skipping the banner.
fn kick<P: Read + Write>(transport: &mut Transport<P>) -> Result<()> {
    transport.send(b"\n")?;
    transport.read_lines_until(OK_LINE, |line| {
        if line.starts_with(FLASH_NOT_DETECTED) {
            eprintln!("warning: {}", line);
        }
    })
}

/// Print the connection banner.
pub fn info<P: Read + Write>(transport: &mut Transport<P>) -> Result<()> {
    transport.send(b"\n")?;
    transport.read_lines_until(OK_LINE, |line| {
        if line != OK_LINE {
            println!("{}", line);
        }
    })
}

/// Read the flash image. Returns the first `len` bytes.
pub fn read_image<P: Read + Write>(transport: &mut Transport<P>, len: usize) -> Result<Vec<u8>> {
    if len > IMAGE_LEN {
        bail!("Length {} exceeds the {} byte image", len, IMAGE_LEN);
    }

    kick(transport)?;
    transport.send(b"R")?;

    transport.skip_past(DATA_MARKER.as_bytes(), Some(FLASH_NOT_DETECTED))?;

    let pb = progress_bar(IMAGE_LEN as u64)?;
    let data = transport.read_exact(IMAGE_LEN, |n| pb.set_position(n as u64))?;
    pb.finish_and_clear();

    // Raw data is followed by an empty line, then the summary.
    let mut summary = transport.read_line()?;
    if summary.is_empty() {
        summary = transport.read_line()?;
    }
    let (count, device_sum) = parse_read_summary(&summary)
        .with_context(|| format!("Unexpected read summary: {:?}", summary))?;
    if count as usize != IMAGE_LEN {
        bail!("Device sent {:#x} bytes, expected {:#x}", count, IMAGE_LEN);
    }
    let local_sum = checksum(&data);
    if local_sum != device_sum {
        bail!(
            "Checksum mismatch: device {:#x}, received {:#x}",
            device_sum,
            local_sum
        );
    }

    Ok(data[..len].to_vec())
}

/// `read` subcommand.
pub fn read<P: Read + Write>(transport: &mut Transport<P>, file: &Path, len: usize) -> Result<()> {
    println!("Reading {} bytes of flash...", len);
    let data = read_image(transport, len)?;
    fs::write(file, &data).with_context(|| format!("Failed to write {}", file.display()))?;
    println!("Saved {} bytes to {}", data.len(), file.display());
    Ok(())
}

/// Program a full image, answering the device's page requests.
pub fn program_image<P: Read + Write>(transport: &mut Transport<P>, image: &[u8]) -> Result<()> {
    if image.len() != IMAGE_LEN {
        bail!("Image must be exactly {} bytes", IMAGE_LEN);
    }

    kick(transport)?;
    transport.send(b"P")?;

    let pb = progress_bar(IMAGE_LEN as u64)?;
    let mut errors = Vec::new();
    let mut last_page_sum = None;

    loop {
        let line = transport.read_line()?;

        if line == OK_LINE {
            break;
        } else if line == FLASH_NOT_DETECTED {
            pb.abandon();
            bail!("Bridge reports no supported flash chip");
        } else if line == SEND_MARKER {
            let request = transport.read_line()?;
            let (addr, len) = parse_send_request(&request)
                .with_context(|| format!("Malformed page request: {:?}", request))?;
            let Some(page) = image.get(addr..addr + len) else {
                pb.abandon();
                bail!("Device asked for {:#x}+{:#x}, outside the image", addr, len);
            };
            transport.send(page)?;
            last_page_sum = Some(checksum(page));
            pb.set_position((addr + len) as u64);
        } else if let Some(sum) = line.strip_prefix("Checksum ") {
            let device_sum = u32::from_str_radix(sum.trim(), 16).ok();
            if device_sum.is_some() && device_sum != last_page_sum {
                errors.push(format!("page checksum mismatch ({})", line));
            }
        } else if line.starts_with(ERROR_PREFIX) || line.starts_with("Mismatch at") {
            pb.println(&line);
            errors.push(line);
        } else if line.starts_with("Erase at") {
            pb.set_message(line);
        }
    }

    if !errors.is_empty() {
        pb.abandon();
        bail!("Programming failed: {}", errors.join("; "));
    }
    pb.finish_with_message("Programming complete");
    Ok(())
}

/// `program` subcommand.
pub fn program<P: Read + Write>(
    transport: &mut Transport<P>,
    file: &Path,
    offset: usize,
    verify: bool,
) -> Result<()> {
    let data = fs::read(file).with_context(|| format!("Failed to read {}", file.display()))?;
    let image = place_image(&data, offset, IMAGE_LEN)?;

    println!(
        "Image: {} ({} bytes at {:#x}, checksum {:#x})",
        file.display(),
        data.len(),
        offset,
        checksum(&image)
    );

    // Erasing the image takes a while before the first page request.
    let started = Instant::now();
    program_image(transport, &image)?;
    println!("Programmed in {:.1}s", started.elapsed().as_secs_f32());

    if verify {
        print!("Verifying... ");
        std::io::stdout().flush()?;
        let readback = read_image(transport, IMAGE_LEN)?;
        if let Some(pos) = readback.iter().zip(&image).position(|(a, b)| a != b) {
            bail!("Verify failed at {:#x}", pos);
        }
        println!("OK");
    }

    Ok(())
}

/// `pad` subcommand.
pub fn pad(input: &Path, output: &Path, size: usize) -> Result<()> {
    let data = fs::read(input).with_context(|| format!("Failed to read {}", input.display()))?;
    let padded = pad_image(&data, size)?;
    println!(
        "padding {} ({} B) to {} ({} B)",
        input.display(),
        data.len(),
        output.display(),
        size
    );
    fs::write(output, padded).with_context(|| format!("Failed to write {}", output.display()))?;
    Ok(())
}

/// Send blocks of increasing size through the forwarder and expect each to
/// come back unchanged.
pub fn echo_test<P: Read + Write>(
    transport: &mut Transport<P>,
    max_len: usize,
    timeout: Duration,
) -> Result<()> {
    let pb = ProgressBar::new(max_len as u64);
    let started = Instant::now();
    let mut total = 0usize;

    for len in 1..=max_len {
        let block: Vec<u8> = (0..len).map(|i| i as u8).collect();
        transport.send(&block)?;
        let echoed = transport
            .read_exact(len, |_| {})
            .with_context(|| format!("No echo for {} byte block", len))?;
        if echoed != block {
            pb.abandon();
            let pos = echoed.iter().zip(&block).position(|(a, b)| a != b).unwrap_or(0);
            bail!("Echo mismatch in {} byte block at offset {}", len, pos);
        }
        total += 2 * len;
        pb.inc(1);

        if started.elapsed() > timeout {
            break;
        }
    }

    pb.finish_and_clear();
    let secs = started.elapsed().as_secs_f64().max(1e-3);
    println!(
        "Echo OK: {} bytes round trip in {:.1}s ({:.0} B/s)",
        total,
        secs,
        total as f64 / secs
    );
    Ok(())
}
