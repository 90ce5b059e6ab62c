use std::fmt;

use protoret_embed::EncodeError;
use protoret_protodb::DbError;
use thiserror::Error;

use crate::collective::CollectiveError;

/// Stage of the retrieval pipeline an error was raised in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Build,
    Encode,
    Match,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Build => write!(f, "build"),
            Self::Encode => write!(f, "encode"),
            Self::Match => write!(f, "match"),
        }
    }
}

#[derive(Error, Debug)]
pub enum RetrieverError {
    #[error("retriever: config: {0}")]
    Config(String),

    #[error("retriever: {stage}: {source}")]
    Encode {
        stage: Stage,
        #[source]
        source: EncodeError,
    },

    #[error("retriever: {stage}: dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch {
        stage: Stage,
        expected: usize,
        got: usize,
    },

    #[error("retriever: {stage}: count mismatch: expected {expected}, got {got}")]
    CountMismatch {
        stage: Stage,
        expected: usize,
        got: usize,
    },

    #[error("retriever: build: sample index {index} out of range for {rows} prototypes")]
    SampleOutOfRange { index: usize, rows: usize },

    #[error("retriever: {stage}: {source}")]
    Database {
        stage: Stage,
        #[source]
        source: DbError,
    },

    #[error("retriever: build: corpus: {0}")]
    Corpus(String),

    #[error("retriever: build: reduction failed: {0}")]
    Reduction(#[from] CollectiveError),

    #[error("retriever: build: cancelled")]
    Cancelled,

    #[error("retriever: build failed earlier: {0}")]
    BuildFailed(String),
}

impl RetrieverError {
    pub(crate) fn db(stage: Stage) -> impl FnOnce(DbError) -> Self {
        move |source| Self::Database { stage, source }
    }

    pub(crate) fn encode(stage: Stage) -> impl FnOnce(EncodeError) -> Self {
        move |source| Self::Encode { stage, source }
    }
}

pub type Result<T> = std::result::Result<T, RetrieverError>;
