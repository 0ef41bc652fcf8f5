//! Wire framing for manager traffic
//!
//! An AMI message is a block of `Key: Value` CRLF lines terminated by an
//! empty line. [`Frame`] is the parsed form; [`FrameBuffer`] accumulates
//! raw bytes from the socket and splits complete blocks off the front.

use bytes::{Buf, BytesMut};

use crate::error::{AmiError, Result};

/// One parsed manager frame: an ordered list of key/value pairs.
///
/// Key lookup is case-insensitive because Asterisk versions disagree on
/// header casing (`Uniqueid` vs `UniqueID`, `ChannelStateDesc` vs
/// `ChannelStatedesc`). Order is preserved for serialization.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Frame {
    headers: Vec<(String, String)>,
}

impl Frame {
    pub fn new() -> Self {
        Self { headers: Vec::new() }
    }

    /// Append a header pair.
    pub fn push(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.headers.push((key.into(), value.into()));
    }

    /// First value for `key`, compared case-insensitively.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    /// Like [`get`](Self::get) but returns an owned value.
    pub fn get_owned(&self, key: &str) -> Option<String> {
        self.get(key).map(|v| v.to_string())
    }

    /// Value for `key`, or a protocol error naming the missing field.
    pub fn require(&self, kind: &'static str, field: &'static str) -> Result<&str> {
        self.get(field).ok_or(AmiError::MissingField { kind, field })
    }

    /// Parse a numeric header, tolerating absence but not garbage.
    pub fn get_u32(&self, field: &'static str) -> Result<Option<u32>> {
        match self.get(field) {
            None => Ok(None),
            Some(raw) => raw
                .trim()
                .parse::<u32>()
                .map(Some)
                .map_err(|_| AmiError::InvalidNumber { field, value: raw.to_string() }),
        }
    }

    /// All header pairs, in wire order.
    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }

    /// Parse one complete block (no trailing terminator required).
    pub fn parse(block: &str) -> Result<Frame> {
        let mut frame = Frame::new();
        for line in block.lines() {
            let line = line.trim_end_matches('\r');
            if line.is_empty() {
                continue;
            }
            match line.split_once(':') {
                Some((key, value)) => frame.push(key.trim(), value.trim()),
                // Asterisk occasionally emits follow-on output lines (e.g.
                // command responses); keep them under a synthetic key rather
                // than dropping data.
                None => frame.push("", line.trim()),
            }
        }
        if frame.is_empty() {
            return Err(AmiError::malformed("empty block"));
        }
        Ok(frame)
    }

    /// Serialize to the wire form, including the terminating blank line.
    pub fn serialize(&self) -> String {
        let mut out = String::new();
        for (key, value) in &self.headers {
            out.push_str(key);
            out.push_str(": ");
            out.push_str(value);
            out.push_str("\r\n");
        }
        out.push_str("\r\n");
        out
    }
}

/// Incremental buffer splitting complete frames off a byte stream.
///
/// Tolerates both `\r\n\r\n` and bare `\n\n` terminators; the login banner
/// (a single line that is not a frame) must be consumed by the caller
/// before feeding event traffic in.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    buf: BytesMut,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self { buf: BytesMut::with_capacity(4096) }
    }

    /// Append raw bytes read from the socket.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Pop the next complete frame, if one is buffered.
    pub fn next_frame(&mut self) -> Result<Option<Frame>> {
        let Some((end, skip)) = find_terminator(&self.buf) else {
            return Ok(None);
        };
        let block = self.buf.split_to(end);
        self.buf.advance(skip);
        let text = String::from_utf8_lossy(&block);
        if text.trim().is_empty() {
            // Stray terminator between frames; keep scanning.
            return self.next_frame();
        }
        Frame::parse(&text).map(Some)
    }

    /// Pop a single banner line (`Asterisk Call Manager/x.y`), if buffered.
    pub fn next_line(&mut self) -> Option<String> {
        let pos = self.buf.iter().position(|&b| b == b'\n')?;
        let line = self.buf.split_to(pos + 1);
        Some(String::from_utf8_lossy(&line).trim().to_string())
    }
}

fn find_terminator(buf: &[u8]) -> Option<(usize, usize)> {
    let mut i = 0;
    while i + 1 < buf.len() {
        if buf[i] == b'\n' {
            if buf[i + 1] == b'\n' {
                return Some((i + 1, 1));
            }
            if i + 2 < buf.len() && buf[i + 1] == b'\r' && buf[i + 2] == b'\n' {
                return Some((i + 1, 2));
            }
        }
        i += 1;
    }
    None
}
