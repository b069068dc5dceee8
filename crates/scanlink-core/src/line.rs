//! Assembles scanner bytes into lines.
//!
//! The scanner terminates each code with CR, LF or both. Empty lines are
//! swallowed. A line longer than the buffer is discarded up to the next
//! terminator and reported once.

use crate::config::MAX_LINE_LEN;

pub enum LineEvent<'a> {
    None,
    Complete(&'a [u8]),
    Overflow,
}

pub struct LineAssembler<const N: usize = MAX_LINE_LEN> {
    buf: [u8; N],
    len: usize,
    overflowed: bool,
}

impl<const N: usize> Default for LineAssembler<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> LineAssembler<N> {
    pub const fn new() -> Self {
        Self {
            buf: [0; N],
            len: 0,
            overflowed: false,
        }
    }

    pub fn push_byte(&mut self, byte: u8) -> LineEvent<'_> {
        if byte == b'\r' || byte == b'\n' {
            if self.overflowed {
                self.overflowed = false;
                return LineEvent::None;
            }
            if self.len == 0 {
                return LineEvent::None;
            }
            let complete = self.len;
            self.len = 0;
            return LineEvent::Complete(&self.buf[..complete]);
        }

        if self.overflowed {
            return LineEvent::None;
        }

        if self.len < N {
            self.buf[self.len] = byte;
            self.len += 1;
            return LineEvent::None;
        }

        self.len = 0;
        self.overflowed = true;
        LineEvent::Overflow
    }
}
