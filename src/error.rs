/// Error type shared by the decoders, the dispatcher and the scanner session
use crate::models::SessionState;

#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    /// A declared length or count would read past the end of the buffer.
    #[error("read of {needed} bytes at offset {offset} exceeds buffer of {available} bytes")]
    Bounds {
        offset: usize,
        needed: usize,
        available: usize,
    },

    /// Payload is malformed or shorter than the structure it must hold.
    #[error("format error: {0}")]
    Format(String),

    /// Transport message written by an unsupported serializer version.
    #[error("msg version: {found} does not match current version: {expected}")]
    VersionMismatch { found: i32, expected: i32 },

    /// An application callback failed during dispatch.
    #[error("callback failed: {0}")]
    Callback(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Lifecycle operation not legal in the session's current state.
    #[error("cannot {operation} scanner in state {state:?}")]
    Lifecycle {
        operation: &'static str,
        state: SessionState,
    },

    /// The platform scanner backend rejected a request.
    #[error("scanner backend error: {0}")]
    Backend(String),

    /// Invalid configuration value.
    #[error("configuration error: {0}")]
    Config(String),
}

impl ScanError {
    /// Bounds error for a read of `needed` bytes at `offset` from a buffer of `available` bytes.
    pub fn bounds(offset: usize, needed: usize, available: usize) -> Self {
        ScanError::Bounds {
            offset,
            needed,
            available,
        }
    }
}
