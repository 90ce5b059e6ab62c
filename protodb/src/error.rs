use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("protodb: dimension mismatch: got {got}, want {want}")]
    DimensionMismatch { got: usize, want: usize },

    #[error("protodb: row {row} out of range for {rows} rows")]
    RowOutOfRange { row: usize, rows: usize },

    #[error("protodb: empty database")]
    Empty,

    #[error("protodb: {0}")]
    Io(String),

    #[error("protodb: invalid format: {0}")]
    InvalidFormat(String),
}
