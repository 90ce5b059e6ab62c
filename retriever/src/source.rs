use std::fmt;
use std::path::PathBuf;

use protoret_protodb::PrototypeDb;

use crate::config::SourceSpec;
use crate::corpus::Corpus;
use crate::error::{Result, RetrieverError, Stage};

/// PrototypeSource is where the prototype database comes from.
pub enum PrototypeSource<T> {
    /// A preformed embedding matrix, used as-is.
    Array(PrototypeDb),
    /// A file written by [`protoret_protodb::save_file`].
    File(PathBuf),
    /// A reference corpus encoded batch by batch.
    Corpus(Box<dyn Corpus<T>>),
}

impl<T> PrototypeSource<T> {
    pub fn corpus(corpus: impl Corpus<T> + 'static) -> Self {
        Self::Corpus(Box::new(corpus))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Array(_) => "array",
            Self::File(_) => "file",
            Self::Corpus(_) => "corpus",
        }
    }
}

impl<T> TryFrom<SourceSpec> for PrototypeSource<T> {
    type Error = RetrieverError;

    fn try_from(spec: SourceSpec) -> Result<Self> {
        match spec {
            SourceSpec::Array { rows } => PrototypeDb::from_rows(&rows)
                .map(Self::Array)
                .map_err(RetrieverError::db(Stage::Build)),
            SourceSpec::File { path } => Ok(Self::File(path)),
        }
    }
}

impl<T> fmt::Debug for PrototypeSource<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Array(db) => f.debug_tuple("Array").field(db).finish(),
            Self::File(path) => f.debug_tuple("File").field(path).finish(),
            Self::Corpus(c) => f.debug_struct("Corpus").field("len", &c.len()).finish(),
        }
    }
}
