use thiserror::Error;

/// All errors that can occur while touching target memory.
///
/// Addresses are carried as raw `u64` so this crate stays independent of
/// the toolkit's `Address` newtype; messages print them in hex.
#[derive(Debug, Error)]
pub enum MemoryError {
    /// A read faulted or ran past the end of the mapped range.
    #[error("unreadable memory at {address:#x} ({len} bytes)")]
    Unreadable { address: u64, len: usize },

    /// A write faulted or targeted a non-writable range.
    #[error("unwritable memory at {address:#x} ({len} bytes)")]
    Unwritable { address: u64, len: usize },

    /// Changing protection failed.
    #[error("failed to change protection of {size} bytes at {address:#x}")]
    ProtectFailed { address: u64, size: u64 },

    /// No mapped range contains the address.
    #[error("no mapped range contains {address:#x}")]
    NoRange { address: u64 },

    /// The caller-supplied address string did not parse.
    #[error("invalid address `{input}`")]
    BadAddress { input: String },

    /// The caller-supplied protection mask did not parse.
    #[error("invalid protection mask `{input}`")]
    BadProtection { input: String },

    /// An argument slot index beyond what the invocation exposes.
    #[error("argument slot {index} out of range")]
    BadSlot { index: usize },
}
