//! Pull-based concatenation of a fixed prefix, an inner byte stream and a
//! fixed suffix.
//!
//! The wrapped result reads like any other resource: callers see one byte
//! stream whose length is known up front, and nothing is buffered beyond the
//! caller's own read buffer.

use std::borrow::Cow;
use std::io::{self, ErrorKind, Read};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Prefix,
    Inner,
    Suffix,
    Done,
}

pub struct WrappedSource<R> {
    prefix: Cow<'static, [u8]>,
    suffix: Cow<'static, [u8]>,
    inner: R,
    inner_len: u64,
    inner_read: u64,
    stage: Stage,
    /// Read position inside the current prefix or suffix
    offset: usize,
    produced: u64,
}

impl<R: Read> WrappedSource<R> {
    /// `inner_len` is the inner source's declared length. Exactly that many
    /// bytes are taken from `inner`; a shorter inner stream is an error.
    pub fn new(
        prefix: impl Into<Cow<'static, [u8]>>,
        inner: R,
        inner_len: u64,
        suffix: impl Into<Cow<'static, [u8]>>,
    ) -> Self {
        Self {
            prefix: prefix.into(),
            suffix: suffix.into(),
            inner,
            inner_len,
            inner_read: 0,
            stage: Stage::Prefix,
            offset: 0,
            produced: 0,
        }
    }

    /// Total number of bytes this source produces
    pub fn len(&self) -> u64 {
        self.prefix.len() as u64 + self.inner_len + self.suffix.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bytes produced so far
    pub fn position(&self) -> u64 {
        self.produced
    }

    pub fn remaining(&self) -> u64 {
        self.len() - self.produced
    }

    /// Pull a single byte; `None` once the suffix has been drained.
    pub fn read_byte(&mut self) -> io::Result<Option<u8>> {
        let mut byte = [0u8; 1];
        match self.read(&mut byte)? {
            0 => Ok(None),
            _ => Ok(Some(byte[0])),
        }
    }

    fn advance(&mut self) {
        self.offset = 0;
        self.stage = match self.stage {
            Stage::Prefix => Stage::Inner,
            Stage::Inner => Stage::Suffix,
            Stage::Suffix | Stage::Done => Stage::Done,
        };
    }

    fn read_inner(&mut self, out: &mut [u8]) -> io::Result<usize> {
        let left = self.inner_len - self.inner_read;
        if left == 0 {
            self.advance();
            return Ok(0);
        }
        let want = out.len().min(usize::try_from(left).unwrap_or(usize::MAX));
        loop {
            match self.inner.read(&mut out[..want]) {
                Ok(0) => {
                    return Err(io::Error::new(
                        ErrorKind::UnexpectedEof,
                        format!(
                            "wrapped source ended after {} of {} bytes",
                            self.inner_read, self.inner_len
                        ),
                    ))
                }
                Ok(n) => {
                    self.inner_read += n as u64;
                    if self.inner_read == self.inner_len {
                        self.advance();
                    }
                    return Ok(n);
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }
}

fn copy_segment(segment: &[u8], offset: &mut usize, out: &mut [u8]) -> usize {
    let n = out.len().min(segment.len() - *offset);
    out[..n].copy_from_slice(&segment[*offset..*offset + n]);
    *offset += n;
    n
}

impl<R: Read> Read for WrappedSource<R> {
    /// Fills `buf` with `min(buf.len(), remaining)` bytes, crossing segment
    /// boundaries within a single call.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut filled = 0;
        while filled < buf.len() && self.stage != Stage::Done {
            let n = match self.stage {
                Stage::Prefix => {
                    let n = copy_segment(&self.prefix, &mut self.offset, &mut buf[filled..]);
                    if self.offset == self.prefix.len() {
                        self.advance();
                    }
                    n
                }
                Stage::Inner => match self.read_inner(&mut buf[filled..]) {
                    Ok(n) => n,
                    // hand out what we already have; the error repeats on the next call
                    Err(_) if filled > 0 => break,
                    Err(e) => return Err(e),
                },
                Stage::Suffix => {
                    let n = copy_segment(&self.suffix, &mut self.offset, &mut buf[filled..]);
                    if self.offset == self.suffix.len() {
                        self.advance();
                    }
                    n
                }
                Stage::Done => 0,
            };
            filled += n;
        }
        self.produced += filled as u64;
        Ok(filled)
    }
}
