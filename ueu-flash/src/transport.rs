// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Serial transport for the bridge's text protocol.
//!
//! The device answers with CRLF-terminated lines, interleaved with raw binary
//! after `DATA:` on reads. Everything received goes through one buffer so
//! line and binary reads can be mixed freely.

use std::io::{ErrorKind, Read, Write};
use std::thread;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serialport::SerialPort;

/// Default timeout for serial operations in milliseconds.
pub const DEFAULT_TIMEOUT_MS: u64 = 5000;

/// The bridge ignores the host for this long after DTR rises.
const SETTLE_WAIT_MS: u64 = 250;

pub struct Transport<P = Box<dyn SerialPort>> {
    port: P,
    rx_buf: Vec<u8>,
}

impl Transport {
    /// Open `port_name` at `baud`. The baud selects the bridge mode.
    pub fn open(port_name: &str, baud: u32, timeout_ms: u64) -> Result<Self> {
        let mut port = serialport::new(port_name, baud)
            .timeout(Duration::from_millis(timeout_ms))
            .open()
            .with_context(|| format!("Failed to open serial port {}", port_name))?;

        port.write_data_terminal_ready(true)
            .context("Failed to raise DTR")?;
        thread::sleep(Duration::from_millis(SETTLE_WAIT_MS));

        Ok(Self::from_port(port))
    }

    /// Get the port name.
    pub fn port_name(&self) -> String {
        self.port.name().unwrap_or_else(|| "?".to_string())
    }

    /// Throw away anything the device sent so far.
    pub fn drain(&mut self) {
        let mut buf = [0u8; 256];
        let old_timeout = self.port.timeout();
        let _ = self.port.set_timeout(Duration::from_millis(50));
        while self.port.read(&mut buf).unwrap_or(0) > 0 {}
        let _ = self.port.set_timeout(old_timeout);
        self.rx_buf.clear();
    }
}

impl<P: Read + Write> Transport<P> {
    pub fn from_port(port: P) -> Self {
        Self {
            port,
            rx_buf: Vec::with_capacity(4096),
        }
    }

    #[cfg(test)]
    pub fn port_ref(&self) -> &P {
        &self.port
    }

    pub fn send(&mut self, data: &[u8]) -> Result<()> {
        self.port
            .write_all(data)
            .map_err(|e| anyhow::anyhow!("Failed to write to serial port: {}", e))?;
        self.port.flush()?;
        Ok(())
    }

    /// Next line without its line terminator.
    pub fn read_line(&mut self) -> Result<String> {
        loop {
            if let Some(end) = self.rx_buf.iter().position(|&b| b == b'\n') {
                let line: Vec<u8> = self.rx_buf.drain(..=end).collect();
                let text = String::from_utf8_lossy(&line);
                return Ok(text.trim_end_matches(['\r', '\n']).to_string());
            }
            self.fill()?;
        }
    }

    /// Read lines until one equals `wanted`, handing every line (including
    /// the last) to `f`.
    pub fn read_lines_until(&mut self, wanted: &str, mut f: impl FnMut(&str)) -> Result<()> {
        loop {
            let line = self.read_line()?;
            f(&line);
            if line == wanted {
                return Ok(());
            }
        }
    }

    /// Skip input up to and including `marker`. Fails early if a complete
    /// line equal to `refusal` shows up first.
    pub fn skip_past(&mut self, marker: &[u8], refusal: Option<&str>) -> Result<()> {
        loop {
            if let Some(pos) = self
                .rx_buf
                .windows(marker.len())
                .position(|window| window == marker)
            {
                self.rx_buf.drain(..pos + marker.len());
                return Ok(());
            }

            // Whole lines cannot contain the marker any more.
            while let Some(end) = self.rx_buf.iter().position(|&b| b == b'\n') {
                let line: Vec<u8> = self.rx_buf.drain(..=end).collect();
                let text = String::from_utf8_lossy(&line);
                if refusal == Some(text.trim_end_matches(['\r', '\n'])) {
                    bail!("Device refused: {}", text.trim_end());
                }
            }

            self.fill()?;
        }
    }

    /// Read exactly `len` raw bytes, reporting the running count to
    /// `progress`.
    pub fn read_exact(&mut self, len: usize, mut progress: impl FnMut(usize)) -> Result<Vec<u8>> {
        while self.rx_buf.len() < len {
            self.fill()?;
            progress(self.rx_buf.len().min(len));
        }
        progress(len);
        Ok(self.rx_buf.drain(..len).collect())
    }

    fn fill(&mut self) -> Result<()> {
        let mut chunk = [0u8; 1024];
        match self.port.read(&mut chunk) {
            Ok(0) => bail!("Serial port closed"),
            Ok(n) => {
                self.rx_buf.extend_from_slice(&chunk[..n]);
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::TimedOut => {
                bail!("Timeout waiting for device")
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => Ok(()),
            Err(e) => bail!("Serial read error: {}", e),
        }
    }
}

#[cfg(test)]
pub mod test_port {
    use std::io::{self, Cursor, Read, Write};

    /// Pre-recorded device output; records everything the host writes.
    pub struct ScriptedPort {
        input: Cursor<Vec<u8>>,
        pub written: Vec<u8>,
        /// Largest read returned at once, to exercise buffering.
        pub max_read: usize,
    }

    impl ScriptedPort {
        pub fn new(input: impl Into<Vec<u8>>) -> Self {
            Self {
                input: Cursor::new(input.into()),
                written: Vec::new(),
                max_read: 7,
            }
        }
    }

    impl Read for ScriptedPort {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let len = buf.len().min(self.max_read);
            let n = self.input.read(&mut buf[..len])?;
            if n == 0 {
                return Err(io::Error::new(io::ErrorKind::TimedOut, "no more data"));
            }
            Ok(n)
        }
    }

    impl Write for ScriptedPort {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.written.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }
}
