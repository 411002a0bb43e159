//! Reading side of the line protocol.

use std::io::{BufRead, BufReader};
use std::net::{SocketAddr, TcpStream};

use anyhow::{Context, Result};

use crate::wire::{decode_line, FrameMessage};

/// Yields one `FrameMessage` per received line until the stream closes.
pub struct MessageReader<R: BufRead> {
    reader: R,
    line: String,
    received: u64,
}

impl MessageReader<BufReader<TcpStream>> {
    pub fn connect(addr: SocketAddr) -> Result<Self> {
        let stream =
            TcpStream::connect(addr).with_context(|| format!("failed to connect to {}", addr))?;
        Ok(Self::new(BufReader::new(stream)))
    }
}

impl<R: BufRead> MessageReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            line: String::new(),
            received: 0,
        }
    }

    /// Read the next raw line without the trailing newline.
    ///
    /// `Ok(None)` means the server closed the connection. A final line with
    /// no terminating newline is treated as truncated and rejected.
    pub fn next_line(&mut self) -> Result<Option<&str>> {
        self.line.clear();
        let read = self
            .reader
            .read_line(&mut self.line)
            .context("failed to read from server")?;
        if read == 0 {
            return Ok(None);
        }
        if !self.line.ends_with('\n') {
            return Err(anyhow::anyhow!(
                "connection closed mid-line after {} messages",
                self.received
            ));
        }
        self.received += 1;
        Ok(Some(self.line.trim_end_matches(['\n', '\r'])))
    }

    pub fn received(&self) -> u64 {
        self.received
    }
}

impl<R: BufRead> Iterator for MessageReader<R> {
    type Item = Result<FrameMessage>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.next_line() {
            Ok(Some(line)) => Some(decode_line(line)),
            Ok(None) => None,
            Err(err) => Some(Err(err)),
        }
    }
}
