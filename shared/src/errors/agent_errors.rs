use thiserror::Error;

use super::{ConfigError, HookError, MemoryError, PatchError, ScanError};

/// Umbrella error carried by RPC handlers up to the dispatcher, where it
/// is flattened into either a `null` result or a `{success:false, error}`
/// envelope. Nothing crosses the RPC boundary as an exception.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error(transparent)]
    Memory(#[from] MemoryError),

    #[error(transparent)]
    Hook(#[from] HookError),

    #[error(transparent)]
    Scan(#[from] ScanError),

    #[error(transparent)]
    Patch(#[from] PatchError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Caller misuse at the dispatch layer (wrong parameter shape).
    #[error("invalid argument: {0}")]
    Argument(String),

    #[error("unknown method `{0}`")]
    UnknownMethod(String),
}
