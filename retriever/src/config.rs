use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::cancel::CancelToken;
use crate::collective::{Collective, SingleProcess};
use crate::corpus::Corpus;
use crate::error::{Result, RetrieverError};
use crate::similarity::Similarity;
use crate::source::PrototypeSource;

/// TopK limits how many ranked prototypes each query returns.
///
/// Serialized as an integer: `-1` keeps the full ranking, `k >= 0` keeps
/// the best `k`. A `k` above the database size is clamped, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub enum TopK {
    #[default]
    All,
    K(usize),
}

impl TopK {
    /// Number of entries to keep out of `n` ranked prototypes.
    pub fn limit(&self, n: usize) -> usize {
        match self {
            Self::All => n,
            Self::K(k) => (*k).min(n),
        }
    }
}

impl TryFrom<i64> for TopK {
    type Error = RetrieverError;

    fn try_from(v: i64) -> Result<Self> {
        match v {
            -1 => Ok(Self::All),
            k if k >= 0 => Ok(Self::K(k as usize)),
            k => Err(RetrieverError::Config(format!(
                "top_k must be -1 or non-negative, got {k}"
            ))),
        }
    }
}

impl From<TopK> for i64 {
    fn from(k: TopK) -> Self {
        match k {
            TopK::All => -1,
            TopK::K(k) => k as i64,
        }
    }
}

/// Declarative prototype source, tagged by `kind`.
///
/// Corpus sources are injected in code through
/// [`RetrieverOptions::with_corpus`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceSpec {
    Array { rows: Vec<Vec<f32>> },
    File { path: PathBuf },
}

fn default_similarity() -> String {
    "cosine".to_string()
}

/// Serializable retriever settings.
///
/// ```
/// use protoret_retriever::{RetrieverConfig, TopK};
///
/// let cfg = RetrieverConfig::from_json(r#"{"similarity": "cosine", "top_k": 5}"#).unwrap();
/// assert_eq!(cfg.top_k, TopK::K(5));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetrieverConfig {
    /// Name of a built-in similarity function. Default: "cosine".
    #[serde(default = "default_similarity")]
    pub similarity: String,

    /// Default: -1 (keep everything).
    #[serde(default)]
    pub top_k: TopK,

    #[serde(default)]
    pub prototype: Option<SourceSpec>,
}

impl Default for RetrieverConfig {
    fn default() -> Self {
        Self {
            similarity: default_similarity(),
            top_k: TopK::All,
            prototype: None,
        }
    }
}

impl RetrieverConfig {
    pub fn from_json(s: &str) -> Result<Self> {
        serde_json::from_str(s).map_err(|e| RetrieverError::Config(e.to_string()))
    }

    pub fn from_yaml(s: &str) -> Result<Self> {
        serde_yaml::from_str(s).map_err(|e| RetrieverError::Config(e.to_string()))
    }

    /// Resolve names and sources. Fails on unknown similarity names and
    /// malformed inline arrays.
    pub fn into_options<T>(self) -> Result<RetrieverOptions<T>> {
        let mut opts = RetrieverOptions::default()
            .with_similarity(Similarity::from_name(&self.similarity)?)
            .with_top_k(self.top_k);
        if let Some(spec) = self.prototype {
            opts = opts.with_source(PrototypeSource::try_from(spec)?);
        }
        Ok(opts)
    }
}

/// Builder-style options for [`crate::Retriever::new`].
pub struct RetrieverOptions<T> {
    pub(crate) similarity: Similarity,
    pub(crate) top_k: TopK,
    pub(crate) source: Option<PrototypeSource<T>>,
    pub(crate) collective: Arc<dyn Collective>,
    pub(crate) cancel: CancelToken,
}

impl<T> Default for RetrieverOptions<T> {
    fn default() -> Self {
        Self {
            similarity: Similarity::Cosine,
            top_k: TopK::All,
            source: None,
            collective: Arc::new(SingleProcess),
            cancel: CancelToken::new(),
        }
    }
}

impl<T> RetrieverOptions<T> {
    pub fn with_similarity(mut self, similarity: Similarity) -> Self {
        self.similarity = similarity;
        self
    }

    pub fn with_top_k(mut self, top_k: TopK) -> Self {
        self.top_k = top_k;
        self
    }

    pub fn with_source(mut self, source: PrototypeSource<T>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn with_corpus(self, corpus: impl Corpus<T> + 'static) -> Self {
        self.with_source(PrototypeSource::corpus(corpus))
    }

    /// Distributed context for sharded builds. Default: [`SingleProcess`].
    pub fn with_collective(mut self, collective: impl Collective + 'static) -> Self {
        self.collective = Arc::new(collective);
        self
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }
}
