use thiserror::Error;

/// All errors that can occur in the scanner subsystem.
#[derive(Debug, Error)]
pub enum ScanError {
    /// The pattern string is not valid hex-with-wildcards.
    #[error("invalid scan pattern `{pattern}`")]
    BadPattern { pattern: String },

    /// Unrecognised scan value type.
    #[error("unknown scan value type `{name}`")]
    UnknownType { name: String },

    /// Unrecognised comparison operator.
    #[error("unknown comparison `{name}`")]
    UnknownComparison { name: String },

    /// The value could not be materialised as the requested type.
    #[error("bad scan value: {message}")]
    BadValue { message: String },

    /// A refinement needs a snapshot and none has been taken.
    #[error("no snapshot; run scan_snapshot first")]
    NoSnapshot,

    /// A backend range scan faulted.
    #[error("scan faulted at {address:#x}")]
    RangeFault { address: u64 },
}
