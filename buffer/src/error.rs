//! Error types for buffer operations.

use thiserror::Error;

/// Buffer manager error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BufferError {
    /// Neither the pool nor the one-off fallback could allocate the region.
    #[error("pool: out of memory ({requested} bytes)")]
    OutOfMemory { requested: usize },

    /// The handle is not on loan from this pool.
    #[error("pool: invalid buffer handle")]
    InvalidHandle,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_error_display() {
        let err = BufferError::OutOfMemory { requested: 4096 };
        assert_eq!(format!("{}", err), "pool: out of memory (4096 bytes)");

        let err = BufferError::InvalidHandle;
        assert_eq!(format!("{}", err), "pool: invalid buffer handle");
    }
}
