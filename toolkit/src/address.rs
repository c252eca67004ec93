use std::fmt;

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use shared::errors::MemoryError;

/// Opaque handle into the target's virtual address space.
///
/// Host and target do not share a numeric representation: values beyond the
/// 53-bit safe-integer range must survive a JSON round-trip, so an `Address`
/// parses from decimal or `0x` hex and always prints (and serialises) as hex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Address(u64);

impl Address {
    pub const NULL: Address = Address(0);

    #[inline]
    pub const fn new(value: u64) -> Self {
        Address(value)
    }

    #[inline]
    pub const fn get(self) -> u64 {
        self.0
    }

    #[inline]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub fn checked_add(self, offset: u64) -> Option<Address> {
        self.0.checked_add(offset).map(Address)
    }

    /// Parse a decimal or `0x`-prefixed hexadecimal address string.
    pub fn parse(input: &str) -> Result<Address, MemoryError> {
        let s = input.trim();
        let parsed = if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
            u64::from_str_radix(hex, 16)
        } else {
            s.parse::<u64>()
        };
        parsed.map(Address).map_err(|_| MemoryError::BadAddress {
            input: input.to_string(),
        })
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl From<u64> for Address {
    fn from(value: u64) -> Self {
        Address(value)
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

struct AddressVisitor;

impl Visitor<'_> for AddressVisitor {
    type Value = Address;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("an address as a decimal/hex string or an unsigned integer")
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Address, E> {
        Ok(Address(v))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Address, E> {
        Address::parse(v).map_err(|e| E::custom(e.to_string()))
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Address, D::Error> {
        deserializer.deserialize_any(AddressVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_hex_and_decimal() {
        assert_eq!(Address::parse("0x1000").unwrap(), Address::new(4096));
        assert_eq!(Address::parse("4096").unwrap(), Address::new(4096));
        assert_eq!(Address::parse("  0XdeadBEEF ").unwrap(), Address::new(0xdead_beef));
    }

    #[test]
    fn survives_beyond_53_bits() {
        let a = Address::parse("0xffffffffffffff01").unwrap();
        assert_eq!(a.get(), 0xffff_ffff_ffff_ff01);
        assert_eq!(a.to_string(), "0xffffffffffffff01");
    }

    #[test]
    fn rejects_garbage() {
        assert!(Address::parse("").is_err());
        assert!(Address::parse("0xzz").is_err());
        assert!(Address::parse("-4").is_err());
    }

    #[test]
    fn checked_add_saturates_to_none() {
        assert_eq!(Address::new(u64::MAX).checked_add(1), None);
        assert_eq!(
            Address::new(0x1000).checked_add(0x10),
            Some(Address::new(0x1010))
        );
    }
}
