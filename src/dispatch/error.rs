use crate::chunks::ChunkError;
use crate::dispatch::types::ServerFrame;
use thiserror::Error;

pub type DispatchResult<T> = Result<T, DispatchError>;

/// Everything a dispatch turn can answer with an `error` frame. The
/// connection is never torn down for these; clients may recover.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Invalid message format")]
    MalformedFrame,

    #[error("Invalid message: {0}")]
    InvalidRequest(String),

    #[error("Frame too large: {actual} bytes, limit {limit}")]
    FrameTooLarge { actual: usize, limit: usize },

    #[error("Chunk exchange is not available on this node")]
    ChunksUnavailable,

    #[error(transparent)]
    Chunk(#[from] ChunkError),
}

impl DispatchError {
    /// Map a JSON decode failure onto the error taxonomy. Unparseable input
    /// and unknown `type` values collapse to the generic malformed-frame
    /// message so untrusted input is never echoed back; missing required
    /// fields keep serde's message, which names the field.
    pub fn from_decode(err: serde_json::Error) -> Self {
        use serde_json::error::Category;

        match err.classify() {
            Category::Data => {
                let message = err.to_string();
                if message.starts_with("unknown variant") {
                    DispatchError::MalformedFrame
                } else {
                    DispatchError::InvalidRequest(message)
                }
            }
            _ => DispatchError::MalformedFrame,
        }
    }

    pub fn into_frame(self) -> ServerFrame {
        ServerFrame::Error {
            message: self.to_string(),
        }
    }
}
