//! Cursor helpers for the fixed record layout.
//!
//! Strings are written as a one-byte length followed by exactly `N` bytes of
//! payload, zero padded, so every field sits at a fixed offset regardless of
//! content.

use heapless::String;

/// Copy `value` into a bounded string, truncating at a char boundary when it
/// does not fit.
pub fn bounded<const N: usize>(value: &str) -> String<N> {
    let mut out = String::new();
    for ch in value.chars() {
        if out.push(ch).is_err() {
            break;
        }
    }
    out
}

/// Copy `value` into a bounded string, or `None` when it does not fit.
pub fn fitted<const N: usize>(value: &str) -> Option<String<N>> {
    String::try_from(value).ok()
}

pub struct BlockWriter<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> BlockWriter<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn put_u8(&mut self, value: u8) {
        self.put_bytes(&[value]);
    }

    pub fn put_bool(&mut self, value: bool) {
        self.put_u8(value as u8);
    }

    pub fn put_u32(&mut self, value: u32) {
        self.put_bytes(&value.to_le_bytes());
    }

    /// Length byte plus `N` zero-padded bytes.
    pub fn put_str<const N: usize>(&mut self, value: &String<N>) {
        let bytes = value.as_bytes();
        let len = bytes.len().min(N).min(u8::MAX as usize);
        self.put_u8(len as u8);
        let start = self.pos;
        self.put_bytes(&bytes[..len]);
        // Skip over the padding; the block starts zeroed
        self.pos = (start + N).min(self.buf.len());
    }

    fn put_bytes(&mut self, bytes: &[u8]) {
        let end = (self.pos + bytes.len()).min(self.buf.len());
        let n = end - self.pos;
        self.buf[self.pos..end].copy_from_slice(&bytes[..n]);
        self.pos = end;
    }
}

pub struct BlockReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> BlockReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn get_u8(&mut self) -> Option<u8> {
        let byte = *self.buf.get(self.pos)?;
        self.pos += 1;
        Some(byte)
    }

    /// Only 0 and 1 are accepted.
    pub fn get_bool(&mut self) -> Option<bool> {
        match self.get_u8()? {
            0 => Some(false),
            1 => Some(true),
            _ => None,
        }
    }

    pub fn get_u32(&mut self) -> Option<u32> {
        let bytes = self.buf.get(self.pos..self.pos + 4)?;
        self.pos += 4;
        Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn get_str<const N: usize>(&mut self) -> Option<String<N>> {
        let len = self.get_u8()? as usize;
        if len > N {
            return None;
        }
        let field = self.buf.get(self.pos..self.pos + N)?;
        self.pos += N;

        let text = core::str::from_utf8(&field[..len]).ok()?;
        let mut out = String::new();
        out.push_str(text).ok()?;
        Some(out)
    }
}
