/// QueryResult is the ranking of the prototype database for one query.
///
/// `scores` is sorted in descending order and `indices[i]` is the prototype
/// row that scored `scores[i]`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct QueryResult {
    pub scores: Vec<f32>,
    pub indices: Vec<usize>,
}

impl QueryResult {
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Best match as `(index, score)`.
    pub fn top(&self) -> Option<(usize, f32)> {
        Some((*self.indices.first()?, *self.scores.first()?))
    }

    /// Keep only the first `k` entries.
    pub fn truncate(&mut self, k: usize) {
        self.scores.truncate(k);
        self.indices.truncate(k);
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, f32)> + '_ {
        self.indices.iter().copied().zip(self.scores.iter().copied())
    }
}

/// Prediction pairs a caller-supplied sample record with its ranking, so
/// annotations such as ground-truth labels travel with the result.
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction<M> {
    pub sample: M,
    pub result: QueryResult,
}
