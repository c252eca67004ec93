use thiserror::Error;

#[derive(Debug, Error)]
pub enum PatchError {
    /// No mapped range contains the patch target.
    #[error("no mapped range contains {address:#x}")]
    NoRange { address: u64 },

    /// An instruction could not be decoded while sizing a NOP sled.
    #[error("undecodable instruction at {address:#x}")]
    Undecodable { address: u64 },

    /// The sled size is not a multiple of the architecture's NOP width.
    #[error("{size} bytes cannot be filled with whole {width}-byte NOPs")]
    UnevenSled { size: u64, width: usize },

    /// Zero-length patches are rejected rather than silently ignored.
    #[error("empty patch")]
    Empty,
}
