//! Error types for the vector index

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Failures raised by [`super::ChunkStore`] and [`super::VectorIndex`].
///
/// Every storage error is fatal for the operation that raised it. Writes that
/// fail leave the index exactly as it was before the call.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Error reported by SQLite or the connection pool
    #[error("Database error: {source}")]
    Database {
        #[from]
        source: sqlx::Error,
    },

    /// Chunk metadata could not be encoded or decoded as JSON
    #[error("Metadata serialization failed: {source}")]
    Serialization {
        #[from]
        source: serde_json::Error,
    },

    /// A stored embedding does not have the query's dimensionality
    #[error("Embedding dimension mismatch for chunk {chunk_id}: expected {expected}, found {found}")]
    DimensionMismatch {
        chunk_id: String,
        expected: usize,
        found: usize,
    },

    /// Chunks must carry non-blank text
    #[error("Chunk {chunk_id} has empty text")]
    EmptyText { chunk_id: String },

    /// Chunks and queries must carry at least one embedding value
    #[error("Empty embedding for {context}")]
    EmptyEmbedding { context: String },

    /// An open-ended metadata key shadows a typed field
    #[error("Chunk {chunk_id} metadata uses reserved key {key:?}")]
    ReservedMetadataKey { chunk_id: String, key: String },

    /// A stored embedding blob is not a whole number of f32 values
    #[error("Corrupt embedding blob for chunk {chunk_id}: {len} bytes")]
    CorruptEmbedding { chunk_id: String, len: usize },

    /// The blocking scoring task panicked or was cancelled
    #[error("Scoring task failed: {source}")]
    BlockingTask {
        #[from]
        source: tokio::task::JoinError,
    },
}
