use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use shared::errors::MemoryError;

use crate::Address;

/// Target CPU architecture tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Arch {
    X64,
    Ia32,
    Arm,
    Arm64,
}

impl Arch {
    pub fn as_str(self) -> &'static str {
        match self {
            Arch::X64 => "x64",
            Arch::Ia32 => "ia32",
            Arch::Arm => "arm",
            Arch::Arm64 => "arm64",
        }
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Page protection as the familiar `rwx` triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Protection {
    pub read: bool,
    pub write: bool,
    pub execute: bool,
}

impl Protection {
    pub const fn rw() -> Self {
        Protection { read: true, write: true, execute: false }
    }

    pub const fn rx() -> Self {
        Protection { read: true, write: false, execute: true }
    }

    pub const fn r() -> Self {
        Protection { read: true, write: false, execute: false }
    }

    /// True if every permission in `min` is also present here.
    pub fn covers(self, min: Protection) -> bool {
        (!min.read || self.read) && (!min.write || self.write) && (!min.execute || self.execute)
    }

    /// The same mask with the write bit forced on. Used by the patch engine,
    /// which must never elevate beyond "whatever was there, plus write".
    pub fn with_write(self) -> Protection {
        Protection { write: true, ..self }
    }
}

impl FromStr for Protection {
    type Err = MemoryError;

    /// Parse the `rwx` form; each position is its letter or `-`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || MemoryError::BadProtection { input: s.to_string() };
        let bytes = s.as_bytes();
        if bytes.len() != 3 {
            return Err(bad());
        }
        let bit = |b: u8, on: u8| match b {
            b'-' => Ok(false),
            _ if b == on => Ok(true),
            _ => Err(bad()),
        };
        Ok(Protection {
            read: bit(bytes[0], b'r')?,
            write: bit(bytes[1], b'w')?,
            execute: bit(bytes[2], b'x')?,
        })
    }
}

impl fmt::Display for Protection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}{}",
            if self.read { 'r' } else { '-' },
            if self.write { 'w' } else { '-' },
            if self.execute { 'x' } else { '-' },
        )
    }
}

impl Serialize for Protection {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Protection {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// A contiguous span of the target's address space with uniform protection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemoryRange {
    pub base: Address,
    pub size: u64,
    pub protection: Protection,
    /// Backing file path, when the range is a mapped image or data file.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
}

impl MemoryRange {
    /// Inclusive on `base`, exclusive on `base + size`.
    pub fn contains(&self, addr: Address) -> bool {
        let a = addr.get();
        let base = self.base.get();
        a >= base && (a - base) < self.size
    }

    pub fn end(&self) -> u64 {
        self.base.get().saturating_add(self.size)
    }
}

/// A loaded code object with enumerable exports, imports and symbols.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModuleInfo {
    pub name: String,
    pub base: Address,
    pub size: u64,
    pub path: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SymbolKind {
    Function,
    Variable,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportInfo {
    #[serde(rename = "type")]
    pub kind: SymbolKind,
    pub name: String,
    pub address: Address,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImportInfo {
    #[serde(rename = "type")]
    pub kind: SymbolKind,
    pub name: String,
    /// Module the import is resolved from, when the loader knows it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub module: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<Address>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SymbolInfo {
    pub name: String,
    pub address: Address,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    pub global: bool,
}

/// Debug-symbol resolution record. All fields except the address may be
/// absent; `find_symbol_by_address` always returns one of these even when
/// nothing resolves.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolDetails {
    pub name: Option<String>,
    pub address: Address,
    pub module_name: Option<String>,
    pub file_name: Option<String>,
    pub line_number: Option<u32>,
}

impl SymbolDetails {
    /// The "nothing resolved" record for an address.
    pub fn unresolved(address: Address) -> Self {
        SymbolDetails {
            name: None,
            address,
            module_name: None,
            file_name: None,
            line_number: None,
        }
    }
}

/// One decoded instruction. `next` is the architectural fall-through
/// address supplied by the decoder, not a control-flow prediction.
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    pub address: Address,
    pub next: Address,
    pub size: u32,
    pub mnemonic: String,
    pub op_str: String,
    pub groups: Vec<String>,
    pub regs_read: Vec<String>,
    pub regs_written: Vec<String>,
}

/// Register state captured at an instrumentation point.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CpuContext {
    pub pc: Address,
    pub sp: Address,
    /// Remaining named registers; a BTreeMap keeps serialisation stable.
    pub regs: BTreeMap<String, Address>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThreadInfo {
    pub id: u32,
    pub state: String,
    #[serde(skip)]
    pub context: CpuContext,
}

/// One hit from a synchronous range scan.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScanMatch {
    pub address: Address,
    pub size: usize,
}
