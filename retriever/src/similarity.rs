use std::fmt;
use std::sync::Arc;

use protoret_protodb::{PrototypeDb, cosine_with_norms, dot, l2_norm};
use rayon::prelude::*;

use crate::error::{Result, RetrieverError};

/// SimilarityFn scores every query against every prototype.
///
/// The returned matrix must have one row per query and one column per
/// prototype row. Closures of the matching shape implement it.
pub trait SimilarityFn: Send + Sync {
    fn similarity(&self, queries: &[Vec<f32>], db: &PrototypeDb) -> Vec<Vec<f32>>;
}

impl<F> SimilarityFn for F
where
    F: Fn(&[Vec<f32>], &PrototypeDb) -> Vec<Vec<f32>> + Send + Sync,
{
    fn similarity(&self, queries: &[Vec<f32>], db: &PrototypeDb) -> Vec<Vec<f32>> {
        self(queries, db)
    }
}

/// Similarity selects how queries are scored against prototypes.
#[derive(Clone, Default)]
pub enum Similarity {
    /// q·p / (|q| |p|); 0 when either vector is all zeros.
    #[default]
    Cosine,
    /// Unnormalized inner product.
    Dot,
    /// Caller-supplied scoring function.
    Custom(Arc<dyn SimilarityFn>),
}

impl Similarity {
    /// Resolve a built-in similarity by name.
    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            "cosine" | "cosine_similarity" => Ok(Self::Cosine),
            "dot" | "dot_product" => Ok(Self::Dot),
            _ => Err(RetrieverError::Config(format!(
                "unknown similarity function {name:?}"
            ))),
        }
    }

    pub fn custom(f: impl SimilarityFn + 'static) -> Self {
        Self::Custom(Arc::new(f))
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Cosine => "cosine",
            Self::Dot => "dot",
            Self::Custom(_) => "custom",
        }
    }

    /// Compute the (queries x prototypes) score matrix.
    pub fn matrix(&self, queries: &[Vec<f32>], db: &PrototypeDb) -> Vec<Vec<f32>> {
        match self {
            Self::Cosine => cosine_matrix(queries, db),
            Self::Dot => queries
                .par_iter()
                .map(|q| db.iter_rows().map(|p| dot(q, p) as f32).collect::<Vec<f32>>())
                .collect(),
            Self::Custom(f) => f.similarity(queries, db),
        }
    }
}

impl fmt::Debug for Similarity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Similarity({})", self.name())
    }
}

fn cosine_matrix(queries: &[Vec<f32>], db: &PrototypeDb) -> Vec<Vec<f32>> {
    let norms: Vec<f64> = db.iter_rows().map(l2_norm).collect();
    queries
        .par_iter()
        .map(|q| {
            let qn = l2_norm(q);
            db.iter_rows()
                .zip(&norms)
                .map(|(p, &pn)| cosine_with_norms(q, qn, p, pn))
                .collect::<Vec<f32>>()
        })
        .collect()
}
