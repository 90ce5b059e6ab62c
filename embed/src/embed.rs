use std::sync::Arc;

use crate::error::EncodeError;

/// Encoder converts a batch of raw items into dense float32 vectors.
///
/// The output must hold exactly one vector per input item, in input order,
/// and every vector must have the same width across calls.
///
/// Implementations must be safe for concurrent use (Send + Sync).
pub trait Encoder<T>: Send + Sync {
    /// Return one embedding per item of `batch`.
    fn encode(&self, batch: &[T]) -> Result<Vec<Vec<f32>>, EncodeError>;

    /// Return the width of the output vectors, if known up front.
    fn dimension(&self) -> Option<usize> {
        None
    }
}

impl<T, E: Encoder<T> + ?Sized> Encoder<T> for Arc<E> {
    fn encode(&self, batch: &[T]) -> Result<Vec<Vec<f32>>, EncodeError> {
        (**self).encode(batch)
    }

    fn dimension(&self) -> Option<usize> {
        (**self).dimension()
    }
}
