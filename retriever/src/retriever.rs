use std::fmt;
use std::path::Path;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use protoret_embed::Encoder;
use protoret_protodb::{PrototypeDb, save_file};
use tracing::{debug, info, warn};

use crate::builder::PrototypeBuilder;
use crate::cancel::CancelToken;
use crate::collective::Collective;
use crate::config::{RetrieverConfig, RetrieverOptions, TopK};
use crate::error::{Result, RetrieverError, Stage};
use crate::matcher::Matcher;
use crate::result::{Prediction, QueryResult};
use crate::similarity::Similarity;
use crate::source::PrototypeSource;

/// Lifecycle of the prototype database.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetrievalState {
    Uninitialized,
    /// A build is running, or the last build failed and the engine must be
    /// reset before it can be queried again.
    Building,
    Ready,
}

impl fmt::Display for RetrievalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uninitialized => write!(f, "uninitialized"),
            Self::Building => write!(f, "building"),
            Self::Ready => write!(f, "ready"),
        }
    }
}

enum Phase {
    Uninitialized,
    Building,
    Failed(String),
    Ready(Arc<PrototypeDb>),
}

/// Retriever ranks a reference database of embeddings against queries.
///
/// The database is built lazily by the first query (or an explicit
/// [`Retriever::prepare`]). At most one build runs at a time: callers that
/// arrive while it is running wait for it and observe the same outcome.
/// Once ready, the database is immutable and shared by all queries.
///
/// Thread-safe: all methods can be called concurrently.
pub struct Retriever<T> {
    encoder: Arc<dyn Encoder<T>>,
    matcher: Matcher,
    top_k: TopK,
    collective: Arc<dyn Collective>,
    cancel: CancelToken,
    source: Mutex<Option<PrototypeSource<T>>>,
    phase: Mutex<Phase>,
    phase_changed: Condvar,
}

impl<T> Retriever<T> {
    pub fn new(encoder: Arc<dyn Encoder<T>>, opts: RetrieverOptions<T>) -> Self {
        Self {
            encoder,
            matcher: Matcher::new(opts.similarity),
            top_k: opts.top_k,
            collective: opts.collective,
            cancel: opts.cancel,
            source: Mutex::new(opts.source),
            phase: Mutex::new(Phase::Uninitialized),
            phase_changed: Condvar::new(),
        }
    }

    /// Creates a Retriever from serialized settings. Unknown similarity
    /// names fail here rather than at query time.
    pub fn from_config(encoder: Arc<dyn Encoder<T>>, cfg: RetrieverConfig) -> Result<Self> {
        Ok(Self::new(encoder, cfg.into_options()?))
    }

    pub fn state(&self) -> RetrievalState {
        match &*self.phase.lock() {
            Phase::Uninitialized => RetrievalState::Uninitialized,
            Phase::Building | Phase::Failed(_) => RetrievalState::Building,
            Phase::Ready(_) => RetrievalState::Ready,
        }
    }

    pub fn top_k(&self) -> TopK {
        self.top_k
    }

    pub fn similarity(&self) -> &Similarity {
        self.matcher.similarity()
    }

    /// Token that cancels an in-flight build.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Replace the prototype source. Takes effect on the next build.
    pub fn set_source(&self, source: PrototypeSource<T>) {
        *self.source.lock() = Some(source);
    }

    /// The database, if it has been built.
    pub fn database(&self) -> Option<Arc<PrototypeDb>> {
        match &*self.phase.lock() {
            Phase::Ready(db) => Some(db.clone()),
            _ => None,
        }
    }

    /// Build the database if it is not built yet and return it.
    ///
    /// A no-op on a ready engine. After a failed build this keeps returning
    /// [`RetrieverError::BuildFailed`] until [`Retriever::reset`] or
    /// [`Retriever::rebuild`].
    pub fn prepare(&self) -> Result<Arc<PrototypeDb>> {
        let mut phase = self.phase.lock();
        loop {
            match &*phase {
                Phase::Ready(db) => return Ok(db.clone()),
                Phase::Failed(msg) => return Err(RetrieverError::BuildFailed(msg.clone())),
                Phase::Uninitialized => break,
                Phase::Building => {}
            }
            self.phase_changed.wait(&mut phase);
        }
        *phase = Phase::Building;
        drop(phase);
        self.run_build()
    }

    /// Build the database again from the current source, even if ready.
    /// Clears an earlier cancellation.
    pub fn rebuild(&self) -> Result<Arc<PrototypeDb>> {
        let mut phase = self.phase.lock();
        while matches!(*phase, Phase::Building) {
            self.phase_changed.wait(&mut phase);
        }
        self.cancel.reset();
        *phase = Phase::Building;
        drop(phase);
        self.run_build()
    }

    /// Drop the database (or a recorded build failure) and clear the
    /// cancel token. Waits for a running build to finish first.
    pub fn reset(&self) {
        let mut phase = self.phase.lock();
        while matches!(*phase, Phase::Building) {
            self.phase_changed.wait(&mut phase);
        }
        self.cancel.reset();
        *phase = Phase::Uninitialized;
        info!("prototype database reset");
    }

    /// Run the encoder only.
    pub fn extract(&self, inputs: &[T]) -> Result<Vec<Vec<f32>>> {
        let feats = self
            .encoder
            .encode(inputs)
            .map_err(RetrieverError::encode(Stage::Encode))?;
        if feats.len() != inputs.len() {
            return Err(RetrieverError::CountMismatch {
                stage: Stage::Encode,
                expected: inputs.len(),
                got: feats.len(),
            });
        }
        if let Some(dim) = self.encoder.dimension() {
            if let Some(f) = feats.iter().find(|f| f.len() != dim) {
                return Err(RetrieverError::DimensionMismatch {
                    stage: Stage::Encode,
                    expected: dim,
                    got: f.len(),
                });
            }
        }
        Ok(feats)
    }

    /// Rank the prototype database for every input, in input order.
    ///
    /// The first call builds the database, even for an empty `inputs`.
    pub fn predict(&self, inputs: &[T]) -> Result<Vec<QueryResult>> {
        let db = self.prepare()?;
        if inputs.is_empty() {
            return Ok(Vec::new());
        }
        let feats = self.extract(inputs)?;
        self.rank_against(&db, &feats)
    }

    /// Like [`Retriever::predict`], attaching each result to the matching
    /// caller sample record.
    pub fn predict_with<M>(&self, inputs: &[T], samples: Vec<M>) -> Result<Vec<Prediction<M>>> {
        if samples.len() != inputs.len() {
            return Err(RetrieverError::CountMismatch {
                stage: Stage::Match,
                expected: inputs.len(),
                got: samples.len(),
            });
        }
        let results = self.predict(inputs)?;
        Ok(samples
            .into_iter()
            .zip(results)
            .map(|(sample, result)| Prediction { sample, result })
            .collect())
    }

    /// Rank the prototype database for precomputed query embeddings.
    pub fn match_embeddings(&self, queries: &[Vec<f32>]) -> Result<Vec<QueryResult>> {
        let db = self.prepare()?;
        self.rank_against(&db, queries)
    }

    /// Build the database if needed and write it to `path`.
    ///
    /// The file is not tied to the corpus it came from; rebuild it when the
    /// corpus changes.
    pub fn dump(&self, path: impl AsRef<Path>) -> Result<()> {
        let db = self.prepare()?;
        save_file(&db, path).map_err(RetrieverError::db(Stage::Build))
    }

    fn rank_against(&self, db: &PrototypeDb, queries: &[Vec<f32>]) -> Result<Vec<QueryResult>> {
        let mut results = self.matcher.match_queries(queries, db)?;
        let keep = self.top_k.limit(db.rows());
        for r in &mut results {
            r.truncate(keep);
        }
        debug!("matched {} queries against {} prototypes", results.len(), db.rows());
        Ok(results)
    }

    fn run_build(&self) -> Result<Arc<PrototypeDb>> {
        let mut guard = BuildGuard {
            phase: &self.phase,
            phase_changed: &self.phase_changed,
            finished: false,
        };
        let result = self.build_database();
        guard.finished = true;

        let mut phase = self.phase.lock();
        let out = match result {
            Ok(db) => {
                info!("prototype database ready: {} x {}", db.rows(), db.dim());
                let db = Arc::new(db);
                *phase = Phase::Ready(db.clone());
                Ok(db)
            }
            Err(err) => {
                warn!("prototype build failed: {err}");
                *phase = Phase::Failed(err.to_string());
                Err(err)
            }
        };
        self.phase_changed.notify_all();
        out
    }

    fn build_database(&self) -> Result<PrototypeDb> {
        let mut source = self.source.lock();
        let source = source
            .as_mut()
            .ok_or_else(|| RetrieverError::Config("no prototype source configured".into()))?;
        debug!("building prototypes from {} source", source.kind());
        PrototypeBuilder::new(self.encoder.as_ref(), self.collective.as_ref(), &self.cancel)
            .build(source)
    }
}

/// Marks the engine failed if a build unwinds, so waiters wake up.
struct BuildGuard<'a> {
    phase: &'a Mutex<Phase>,
    phase_changed: &'a Condvar,
    finished: bool,
}

impl Drop for BuildGuard<'_> {
    fn drop(&mut self) {
        if !self.finished {
            *self.phase.lock() = Phase::Failed("build panicked".into());
            self.phase_changed.notify_all();
        }
    }
}
