//! Wildcard-nibble byte patterns.
//!
//! The scanner exchanges patterns as hex strings where any nibble may be a
//! `?`, e.g. `48 8b ?? e?`. Whitespace between byte pairs is optional, so the
//! compact form produced by hex-encoding a typed value is accepted as-is.
//! Matching lives here so every backend shares one implementation.

use shared::errors::ScanError;

use crate::types::ScanMatch;
use crate::Address;

/// Parsed pattern: per byte, a value and a mask. Wildcard nibbles have
/// their mask nibble cleared.
#[derive(Debug, Clone, PartialEq)]
pub struct BytePattern {
    values: Vec<u8>,
    masks: Vec<u8>,
}

impl BytePattern {
    pub fn parse(pattern: &str) -> Result<BytePattern, ScanError> {
        let bad = || ScanError::BadPattern { pattern: pattern.to_string() };

        let mut nibbles: Vec<(u8, u8)> = Vec::new();
        for c in pattern.chars() {
            match c {
                ' ' | '\t' => continue,
                '?' => nibbles.push((0, 0)),
                _ => {
                    let v = c.to_digit(16).ok_or_else(bad)? as u8;
                    nibbles.push((v, 0xf));
                }
            }
        }
        if nibbles.is_empty() || nibbles.len() % 2 != 0 {
            return Err(bad());
        }

        let mut values = Vec::with_capacity(nibbles.len() / 2);
        let mut masks = Vec::with_capacity(nibbles.len() / 2);
        for pair in nibbles.chunks(2) {
            values.push(pair[0].0 << 4 | pair[1].0);
            masks.push(pair[0].1 << 4 | pair[1].1);
        }
        Ok(BytePattern { values, masks })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// True if `window` (which must be exactly `len()` bytes) matches.
    pub fn matches(&self, window: &[u8]) -> bool {
        window.len() == self.values.len()
            && window
                .iter()
                .zip(self.values.iter().zip(&self.masks))
                .all(|(b, (v, m))| b & m == v & m)
    }

    /// All match positions inside `data`, reported as absolute addresses
    /// assuming `data` starts at `base`.
    pub fn find_all(&self, data: &[u8], base: Address) -> Vec<ScanMatch> {
        let n = self.values.len();
        if n == 0 || data.len() < n {
            return Vec::new();
        }
        let mut out = Vec::new();
        for offset in 0..=(data.len() - n) {
            if self.matches(&data[offset..offset + n]) {
                if let Some(address) = base.checked_add(offset as u64) {
                    out.push(ScanMatch { address, size: n });
                }
            }
        }
        out
    }
}
