use std::fmt;

use crate::error::DbError;

/// PrototypeDb is a dense, index-addressed N x C matrix of embeddings.
///
/// Row `i` holds the embedding of the reference sample whose stable
/// identifier is `i`. Rows are stored contiguously in row-major order so the
/// whole buffer can be summed across workers in one reduction.
#[derive(Clone, PartialEq)]
pub struct PrototypeDb {
    rows: usize,
    dim: usize,
    data: Vec<f32>,
}

impl PrototypeDb {
    /// Creates an all-zero database of `rows` x `dim`.
    pub fn zeros(rows: usize, dim: usize) -> Result<Self, DbError> {
        if rows == 0 {
            return Err(DbError::Empty);
        }
        if dim == 0 {
            return Err(DbError::DimensionMismatch { got: 0, want: 1 });
        }
        Ok(Self {
            rows,
            dim,
            data: vec![0.0; rows * dim],
        })
    }

    /// Builds a database from a preformed list of rows.
    ///
    /// Every row must have the width of the first one.
    pub fn from_rows<R: AsRef<[f32]>>(rows: &[R]) -> Result<Self, DbError> {
        let first = rows.first().ok_or(DbError::Empty)?;
        let dim = first.as_ref().len();
        let mut db = Self::zeros(rows.len(), dim)?;
        for (i, row) in rows.iter().enumerate() {
            db.set_row(i, row.as_ref())?;
        }
        Ok(db)
    }

    /// Wraps a row-major buffer of `rows * dim` values.
    pub fn from_flat(rows: usize, dim: usize, data: Vec<f32>) -> Result<Self, DbError> {
        if rows == 0 {
            return Err(DbError::Empty);
        }
        if dim == 0 {
            return Err(DbError::DimensionMismatch { got: 0, want: 1 });
        }
        if data.len() != rows * dim {
            return Err(DbError::InvalidFormat(format!(
                "buffer holds {} values, want {rows} x {dim}",
                data.len()
            )));
        }
        Ok(Self { rows, dim, data })
    }

    /// Number of prototypes (N).
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Embedding width (C).
    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn row(&self, i: usize) -> Option<&[f32]> {
        if i >= self.rows {
            return None;
        }
        Some(&self.data[i * self.dim..(i + 1) * self.dim])
    }

    /// Overwrites row `i` with `vector`.
    pub fn set_row(&mut self, i: usize, vector: &[f32]) -> Result<(), DbError> {
        if i >= self.rows {
            return Err(DbError::RowOutOfRange {
                row: i,
                rows: self.rows,
            });
        }
        if vector.len() != self.dim {
            return Err(DbError::DimensionMismatch {
                got: vector.len(),
                want: self.dim,
            });
        }
        self.data[i * self.dim..(i + 1) * self.dim].copy_from_slice(vector);
        Ok(())
    }

    pub fn iter_rows(&self) -> impl Iterator<Item = &[f32]> {
        self.data.chunks_exact(self.dim)
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    /// Mutable view of the whole row-major buffer, used by the collective
    /// reduction.
    pub fn as_mut_slice(&mut self) -> &mut [f32] {
        &mut self.data
    }

    pub fn into_rows(self) -> Vec<Vec<f32>> {
        self.data.chunks_exact(self.dim).map(<[f32]>::to_vec).collect()
    }
}

impl fmt::Debug for PrototypeDb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrototypeDb")
            .field("rows", &self.rows)
            .field("dim", &self.dim)
            .finish()
    }
}
