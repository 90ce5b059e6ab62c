use std::marker::PhantomData;

use crate::embed::Encoder;
use crate::error::EncodeError;

/// FnEncoder adapts a closure into an [`Encoder`].
///
/// The closure sees the whole batch, so batched models can be wrapped
/// without an extra trait impl.
pub struct FnEncoder<T, F> {
    f: F,
    dim: Option<usize>,
    _item: PhantomData<fn(&T)>,
}

impl<T, F> FnEncoder<T, F>
where
    F: Fn(&[T]) -> Result<Vec<Vec<f32>>, EncodeError> + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self {
            f,
            dim: None,
            _item: PhantomData,
        }
    }

    pub fn with_dimension(mut self, dim: usize) -> Self {
        self.dim = Some(dim);
        self
    }
}

impl<T, F> Encoder<T> for FnEncoder<T, F>
where
    F: Fn(&[T]) -> Result<Vec<Vec<f32>>, EncodeError> + Send + Sync,
{
    fn encode(&self, batch: &[T]) -> Result<Vec<Vec<f32>>, EncodeError> {
        if batch.is_empty() {
            return Err(EncodeError::EmptyInput);
        }
        (self.f)(batch)
    }

    fn dimension(&self) -> Option<usize> {
        self.dim
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn doubler() -> FnEncoder<f32, impl Fn(&[f32]) -> Result<Vec<Vec<f32>>, EncodeError>> {
        FnEncoder::new(|xs: &[f32]| Ok(xs.iter().map(|&x| vec![x, 2.0 * x]).collect()))
    }

    #[test]
    fn test_encode_batch() {
        let enc = doubler();
        let out = enc.encode(&[1.0, 3.0]).unwrap();
        assert_eq!(out, vec![vec![1.0, 2.0], vec![3.0, 6.0]]);
    }

    #[test]
    fn test_empty_batch() {
        let enc = doubler();
        assert!(matches!(enc.encode(&[]), Err(EncodeError::EmptyInput)));
    }

    #[test]
    fn test_dimension_hint() {
        assert_eq!(doubler().dimension(), None);
        assert_eq!(doubler().with_dimension(2).dimension(), Some(2));
    }

    #[test]
    fn test_model_error_propagates() {
        let enc = FnEncoder::new(|_: &[u8]| Err(EncodeError::Model("oom".into())));
        let err = enc.encode(&[1]).unwrap_err();
        assert_eq!(err.to_string(), "embed: model error: oom");
    }

    #[test]
    fn test_shared_encoder() {
        let enc: Arc<dyn Encoder<f32>> = Arc::new(doubler().with_dimension(2));
        assert_eq!(enc.dimension(), Some(2));
        assert_eq!(enc.encode(&[0.5]).unwrap(), vec![vec![0.5, 1.0]]);
    }
}
