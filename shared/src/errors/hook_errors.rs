use thiserror::Error;

#[derive(Debug, Error)]
pub enum HookError {
    /// The target is unmapped or its range is not executable.
    #[error("Invalid or non-executable address")]
    InvalidTarget,

    /// The hook id is not present in the table.
    #[error("Hook not found")]
    NotFound,

    /// The interceptor backend refused the attach.
    #[error("attach failed: {reason}")]
    AttachFailed { reason: String },

    /// The hook configuration object did not parse.
    #[error("invalid hook config: {message}")]
    BadConfig { message: String },
}
