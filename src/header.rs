//! Tuple headers.
//!
//! One word sits immediately before every tuple's elements. From the top:
//! a 2-bit color, a 1-bit short/long discriminator, then either a 45-bit
//! word count plus a 16-bit tag (short tuples) or a 61-bit byte count (long
//! tuples, which carry no tag). Bit positions are taken from
//! `examples/original_source/include/ssm.h`.
//!
//! Uses `bit_field::BitField`, the crate the teacher already depends on for
//! the same kind of sub-word bitfield packing (see `gc.rs`'s `PageMeta`).

use bit_field::BitField;

const WORD_BITS: usize = usize::BITS as usize;
const COLOR_SHIFT: usize = WORD_BITS - 2;
const LONG_BIT: usize = WORD_BITS - 3;
const TAG_BITS: usize = 16;
const SHORT_SIZE_RANGE: std::ops::Range<usize> = TAG_BITS..LONG_BIT;
const LONG_SIZE_RANGE: std::ops::Range<usize> = 0..LONG_BIT;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(u8)]
pub enum Color {
    White = 0,
    Gray = 1,
    Red = 2,
    Black = 3,
}

impl Color {
    fn from_bits(bits: u8) -> Color {
        match bits {
            0 => Color::White,
            1 => Color::Gray,
            2 => Color::Red,
            3 => Color::Black,
            _ => unreachable!("color is a 2-bit field"),
        }
    }
}

/// A tuple header word.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Header(pub usize);

impl Header {
    #[inline]
    pub fn build_short(tag: u16, words: usize) -> Header {
        debug_assert!(words < (1 << (LONG_BIT - TAG_BITS)), "short tuple too large");
        let mut h: usize = 0;
        h.set_bits(SHORT_SIZE_RANGE, words);
        h.set_bits(0..TAG_BITS, tag as usize);
        Header(h)
    }

    #[inline]
    pub fn build_long(bytes: usize) -> Header {
        debug_assert!(bytes < (1 << LONG_BIT), "long tuple too large");
        let mut h: usize = 0;
        h.set_bit(LONG_BIT, true);
        h.set_bits(LONG_SIZE_RANGE, bytes);
        Header(h)
    }

    #[inline(always)]
    pub fn color(self) -> Color {
        Color::from_bits(self.0.get_bits(COLOR_SHIFT..WORD_BITS) as u8)
    }

    #[inline(always)]
    pub fn set_color(&mut self, c: Color) {
        self.0.set_bits(COLOR_SHIFT..WORD_BITS, c as usize);
    }

    #[inline(always)]
    pub fn is_marked(self) -> bool {
        self.color() != Color::White
    }

    #[inline(always)]
    pub fn is_long(self) -> bool {
        self.0.get_bit(LONG_BIT)
    }

    #[inline(always)]
    pub fn tag(self) -> u16 {
        debug_assert!(!self.is_long(), "long tuples have no tag");
        self.0.get_bits(0..TAG_BITS) as u16
    }

    /// Word count of the payload (short tuples).
    #[inline(always)]
    pub fn short_words(self) -> usize {
        debug_assert!(!self.is_long());
        self.0.get_bits(SHORT_SIZE_RANGE)
    }

    /// Byte count of the payload (long tuples).
    #[inline(always)]
    pub fn long_bytes(self) -> usize {
        debug_assert!(self.is_long());
        self.0.get_bits(LONG_SIZE_RANGE)
    }

    /// Payload size in words, regardless of short/long kind.
    #[inline]
    pub fn payload_words(self) -> usize {
        if self.is_long() {
            (self.long_bytes() + std::mem::size_of::<usize>() - 1) / std::mem::size_of::<usize>()
        } else {
            self.short_words()
        }
    }

    /// Total words occupied by header + payload (the header itself counts
    /// as one word), matching `ssmTWords`/`ssmTWordsFromBytes`.
    #[inline(always)]
    pub fn total_words(self) -> usize {
        1 + self.payload_words()
    }
}

impl std::fmt::Debug for Header {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_long() {
            write!(f, "Header{{long, color={:?}, bytes={}}}", self.color(), self.long_bytes())
        } else {
            write!(
                f,
                "Header{{short, color={:?}, tag={}, words={}}}",
                self.color(),
                self.tag(),
                self.short_words()
            )
        }
    }
}
