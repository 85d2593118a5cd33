use thiserror::Error;

/// Errors raised while decoding a [`VmState`](crate::VmState).
#[derive(Debug, Error)]
pub enum StateError {
    /// The payload is not a JSON encoded state.
    #[error("malformed state json: {0}")]
    Json(#[from] serde_json::Error),

    /// The payload carries the gzip magic but could not be inflated.
    #[error("malformed gzip stream: {0}")]
    Gzip(#[source] std::io::Error),

    /// A running state must not carry an exit code.
    #[error("exit code {0} set on a state that has not exited")]
    ExitCodeWithoutExit(u8),
}
