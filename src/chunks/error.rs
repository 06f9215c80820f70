use thiserror::Error;

pub type ChunkResult<T> = Result<T, ChunkError>;

#[derive(Debug, Error)]
pub enum ChunkError {
    #[error("Chunk payload too large: {actual} bytes serialized, limit {limit}")]
    PayloadTooLarge { actual: usize, limit: usize },

    #[error("Chunk payload is not serializable: {0}")]
    Unserializable(#[from] serde_json::Error),
}
