//! Overlap tracker for the data region
//!
//! One byte per offset in `[0, first_free)`. Each claimed object marks its
//! first byte `kind | BEGIN`, its last byte `kind | END` and everything in
//! between `kind`. Data records reached from a `first` entry additionally
//! carry `FIRST` on their begin byte.

use crate::error::{IntegrityError, ObjectKind};
use crate::header::BLOCK_ALIGN;

const UNUSED: u8 = 0;
const FIRST: u8 = 16;
const BEGIN: u8 = 32;
const END: u8 = 64;

const HASH_ENTRY: u8 = 1;
const DATA: u8 = 3;

fn kind_bits(kind: ObjectKind) -> u8 {
    match kind {
        ObjectKind::HashEntry => HASH_ENTRY,
        ObjectKind::Data => DATA,
    }
}

/// Per-byte classification of the allocated part of the data region
#[derive(Debug)]
pub struct Usemap {
    map: Vec<u8>,
}

impl Usemap {
    /// Create an all-unused map covering `first_free` bytes
    pub fn new(first_free: u32) -> Self {
        Usemap {
            map: vec![UNUSED; first_free as usize],
        }
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Claim `[start, start + len)` for an object of `kind`
    ///
    /// The range must lie inside the map and be block aligned. An unused
    /// range is marked. A range already holding the same kind with the same
    /// extent is accepted for data records (shared records) and rejected for
    /// hash entries. Anything else is an overlap.
    pub fn claim(
        &mut self,
        kind: ObjectKind,
        first: bool,
        start: u32,
        len: usize,
    ) -> Result<(), IntegrityError> {
        debug_assert!(len >= 2);

        let first_free = self.map.len() as u32;
        let end = start as u64 + len as u64;
        if start > first_free || end > first_free as u64 {
            return Err(IntegrityError::OutOfBounds {
                kind,
                offset: start,
                len: len as u64,
                first_free,
            });
        }
        if start % BLOCK_ALIGN != 0 {
            return Err(IntegrityError::Misaligned {
                kind,
                offset: start,
            });
        }

        let bits = kind_bits(kind);
        let first_bit = if first { FIRST } else { 0 };
        let begin = start as usize;
        let last = begin + len - 1;

        if self.map[begin] == UNUSED {
            self.map[begin] = bits | BEGIN | first_bit;
            for idx in begin + 1..=last {
                if self.map[idx] != UNUSED {
                    return Err(IntegrityError::Overlap {
                        kind,
                        offset: start,
                        at: idx as u32,
                    });
                }
                self.map[idx] = bits;
            }
            self.map[last] = bits | END;
        } else if self.map[begin] & !FIRST == bits | BEGIN {
            if kind == ObjectKind::HashEntry {
                return Err(IntegrityError::SharedHashEntry(start));
            }

            self.map[begin] |= first_bit;
            if self.map[begin + 1..last].iter().any(|&b| b != bits) || self.map[last] != bits | END
            {
                return Err(IntegrityError::ExtentMismatch {
                    kind,
                    offset: start,
                });
            }
        } else {
            // Points at a different object or into the middle of one
            return Err(IntegrityError::InvalidPointer {
                kind,
                offset: start,
            });
        }

        Ok(())
    }

    /// First data record that no `first` entry referenced
    pub fn find_unreferenced(&self) -> Option<u32> {
        self.map
            .iter()
            .position(|&b| b == DATA | BEGIN)
            .map(|idx| idx as u32)
    }
}
