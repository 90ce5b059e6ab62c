use std::cmp::Ordering;

use protoret_protodb::PrototypeDb;
use rayon::prelude::*;

use crate::error::{Result, RetrieverError, Stage};
use crate::result::QueryResult;
use crate::similarity::Similarity;

/// Matcher scores queries against the prototype database and ranks every
/// prototype for each query.
#[derive(Debug, Clone, Default)]
pub struct Matcher {
    similarity: Similarity,
}

impl Matcher {
    pub fn new(similarity: Similarity) -> Self {
        Self { similarity }
    }

    pub fn similarity(&self) -> &Similarity {
        &self.similarity
    }

    /// Rank all prototypes for every query, in query order.
    pub fn match_queries(&self, queries: &[Vec<f32>], db: &PrototypeDb) -> Result<Vec<QueryResult>> {
        if let Some(q) = queries.iter().find(|q| q.len() != db.dim()) {
            return Err(RetrieverError::DimensionMismatch {
                stage: Stage::Match,
                expected: db.dim(),
                got: q.len(),
            });
        }

        let matrix = self.similarity.matrix(queries, db);
        if matrix.len() != queries.len() {
            return Err(RetrieverError::CountMismatch {
                stage: Stage::Match,
                expected: queries.len(),
                got: matrix.len(),
            });
        }
        if let Some(row) = matrix.iter().find(|row| row.len() != db.rows()) {
            return Err(RetrieverError::DimensionMismatch {
                stage: Stage::Match,
                expected: db.rows(),
                got: row.len(),
            });
        }

        Ok(matrix.into_par_iter().map(rank).collect())
    }
}

/// Sort one row of scores in descending order.
///
/// Equal scores keep ascending prototype index order and NaN ranks last, so
/// the ranking is deterministic for a given database.
pub fn rank(scores: Vec<f32>) -> QueryResult {
    let mut indices: Vec<usize> = (0..scores.len()).collect();
    indices.sort_by(|&a, &b| by_score_desc(scores[a], scores[b]).then(a.cmp(&b)));
    let sorted = indices.iter().map(|&i| scores[i]).collect();
    QueryResult {
        scores: sorted,
        indices,
    }
}

fn by_score_desc(a: f32, b: f32) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (false, false) => b.partial_cmp(&a).unwrap_or(Ordering::Equal),
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
    }
}
