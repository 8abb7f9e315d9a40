//! Transactional framing over a blocking byte stream.
//!
//! Every protocol message is read or written as a frame whose exact byte
//! count is declared up front with `begin_read`/`begin_write`. The typed
//! operations then draw down that budget, letting a fixed-size buffer
//! amortise system calls without knowing the message layout. Exceeding a
//! declared total is a framing bug in the caller, not a peer error, and
//! panics rather than silently desynchronising the stream.

use std::cmp::min;
use std::io::{self, Read, Write};

use byteorder::{BigEndian, ByteOrder};

use crate::error::{ProtocolError, Result};

/// Size of each of the read and write buffers.
pub const FRAME_BUF_SIZE: usize = 2048;

/// A framed view over a blocking stream.
///
/// Read and write frames are budgeted independently, so a caller may read
/// request bytes and write reply bytes in alternation. A write frame is
/// flushed to the stream as soon as its final byte is buffered.
#[derive(Debug)]
pub struct FrameBuf<S> {
    stream: S,

    rbuf: [u8; FRAME_BUF_SIZE],
    rpos: usize,
    rlen: usize,
    read_remaining: u64,

    wbuf: [u8; FRAME_BUF_SIZE],
    wlen: usize,
    write_remaining: u64,
}

impl<S: Read + Write> FrameBuf<S> {
    pub fn new(stream: S) -> FrameBuf<S> {
        FrameBuf {
            stream,
            rbuf: [0; FRAME_BUF_SIZE],
            rpos: 0,
            rlen: 0,
            read_remaining: 0,
            wbuf: [0; FRAME_BUF_SIZE],
            wlen: 0,
            write_remaining: 0,
        }
    }

    /// Access the underlying stream, e.g. to shut it down.
    pub fn stream(&self) -> &S {
        &self.stream
    }

    // ── Reading ───────────────────────────────────────────────────────────

    /// Declare that exactly `total` bytes will be read before the next
    /// `begin_read`.
    pub fn begin_read(&mut self, total: u64) {
        assert_eq!(self.read_remaining, 0, "previous read frame unfinished");
        self.read_remaining = total;
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        let mut byte = [0u8; 1];
        self.read_exact(&mut byte)?;
        Ok(byte[0])
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        let mut bytes = [0u8; 4];
        self.read_exact(&mut bytes)?;
        Ok(BigEndian::read_u32(&bytes))
    }

    pub fn read_exact(&mut self, out: &mut [u8]) -> Result<()> {
        assert!(
            out.len() as u64 <= self.read_remaining,
            "read past the declared frame"
        );
        self.read_remaining -= out.len() as u64;

        let mut filled = 0;
        while filled < out.len() {
            if self.rpos == self.rlen {
                self.refill()?;
            }
            let n = min(out.len() - filled, self.rlen - self.rpos);
            out[filled..filled + n].copy_from_slice(&self.rbuf[self.rpos..self.rpos + n]);
            self.rpos += n;
            filled += n;
        }
        Ok(())
    }

    fn refill(&mut self) -> Result<()> {
        match self.stream.read(&mut self.rbuf) {
            // An orderly shutdown mid-frame still leaves the frame short.
            Ok(0) => Err(ProtocolError::SocketDry),
            Ok(n) => {
                self.rpos = 0;
                self.rlen = n;
                Ok(())
            }
            Err(e) => Err(ProtocolError::SocketRead(e)),
        }
    }

    // ── Writing ───────────────────────────────────────────────────────────

    /// Declare that exactly `total` bytes will be written before the next
    /// `begin_write`. The frame is flushed when its last byte is buffered.
    pub fn begin_write(&mut self, total: u64) {
        assert_eq!(self.write_remaining, 0, "previous write frame unfinished");
        self.write_remaining = total;
    }

    pub fn write_u8(&mut self, value: u8) -> Result<()> {
        self.write_all(&[value])
    }

    pub fn write_u32(&mut self, value: u32) -> Result<()> {
        let mut bytes = [0u8; 4];
        BigEndian::write_u32(&mut bytes, value);
        self.write_all(&bytes)
    }

    pub fn write_all(&mut self, data: &[u8]) -> Result<()> {
        assert!(
            data.len() as u64 <= self.write_remaining,
            "write past the declared frame"
        );
        self.write_remaining -= data.len() as u64;

        let mut written = 0;
        while written < data.len() {
            if self.wlen == FRAME_BUF_SIZE {
                self.drain()?;
            }
            let n = min(data.len() - written, FRAME_BUF_SIZE - self.wlen);
            self.wbuf[self.wlen..self.wlen + n].copy_from_slice(&data[written..written + n]);
            self.wlen += n;
            written += n;
        }

        if self.write_remaining == 0 {
            self.drain()?;
        }
        Ok(())
    }

    fn drain(&mut self) -> Result<()> {
        let mut sent = 0;
        while sent < self.wlen {
            match self.stream.write(&self.wbuf[sent..self.wlen]) {
                Ok(0) => {
                    return Err(ProtocolError::SocketWrite(io::ErrorKind::WriteZero.into()))
                }
                Ok(n) => sent += n,
                Err(e) => return Err(ProtocolError::SocketWrite(e)),
            }
        }
        self.wlen = 0;
        self.stream.flush().map_err(ProtocolError::SocketWrite)
    }
}
