use protoret_embed::Encoder;
use protoret_protodb::{PrototypeDb, load_file};
use tracing::{debug, info, warn};

use crate::cancel::CancelToken;
use crate::collective::Collective;
use crate::corpus::Corpus;
use crate::error::{Result, RetrieverError, Stage};
use crate::source::PrototypeSource;

/// PrototypeBuilder turns a [`PrototypeSource`] into a complete
/// [`PrototypeDb`].
///
/// For corpus sources every worker encodes its own shard into a zeroed
/// N x C buffer, writing each embedding at its sample identifier's row, and
/// the buffers are then summed across workers by the collective.
pub struct PrototypeBuilder<'a, T> {
    encoder: &'a dyn Encoder<T>,
    collective: &'a dyn Collective,
    cancel: &'a CancelToken,
}

impl<'a, T> PrototypeBuilder<'a, T> {
    pub fn new(
        encoder: &'a dyn Encoder<T>,
        collective: &'a dyn Collective,
        cancel: &'a CancelToken,
    ) -> Self {
        Self {
            encoder,
            collective,
            cancel,
        }
    }

    pub fn build(&self, source: &mut PrototypeSource<T>) -> Result<PrototypeDb> {
        match source {
            PrototypeSource::Array(db) => {
                info!("using preformed prototype array {} x {}", db.rows(), db.dim());
                Ok(db.clone())
            }
            PrototypeSource::File(path) => {
                load_file(path.as_path()).map_err(RetrieverError::db(Stage::Build))
            }
            PrototypeSource::Corpus(corpus) => self.build_from_corpus(corpus.as_mut()),
        }
    }

    fn build_from_corpus(&self, corpus: &mut dyn Corpus<T>) -> Result<PrototypeDb> {
        let rank = self.collective.rank();
        let world_size = self.collective.world_size();
        let rows = corpus.len();
        if rows == 0 {
            return Err(RetrieverError::Config("prototype corpus is empty".into()));
        }
        info!(
            "building prototype database from corpus of {rows} samples (rank {rank} of {world_size})"
        );

        let local = match self.encode_shard(corpus, rows) {
            Ok(local) => local,
            Err(err) => {
                if world_size > 1 {
                    self.collective.abort(&err.to_string());
                }
                return Err(err);
            }
        };

        if self.cancel.is_cancelled() {
            warn!("prototype build cancelled before reduction");
            if world_size > 1 {
                self.collective.abort("cancelled");
            }
            return Err(RetrieverError::Cancelled);
        }

        if world_size == 1 {
            let db = local.ok_or_else(|| {
                RetrieverError::Config("prototype corpus produced no samples".into())
            })?;
            info!("prototype database built: {} x {}", db.rows(), db.dim());
            return Ok(db);
        }

        let dim = self.agree_on_dim(local.as_ref().map_or(0, PrototypeDb::dim))?;
        let mut db = match local {
            Some(db) => db,
            None => PrototypeDb::zeros(rows, dim).map_err(RetrieverError::db(Stage::Build))?,
        };
        debug!("rank {rank}: reducing {} values", db.as_slice().len());
        if let Err(err) = self.collective.all_reduce_sum(db.as_mut_slice()) {
            warn!("rank {rank}: prototype reduction failed: {err}");
            return Err(err.into());
        }
        info!(
            "prototype database built: {} x {} (rank {rank} of {world_size})",
            db.rows(),
            db.dim()
        );
        Ok(db)
    }

    /// Encode this worker's shard. Returns `None` when the shard was empty.
    fn encode_shard(&self, corpus: &mut dyn Corpus<T>, rows: usize) -> Result<Option<PrototypeDb>> {
        let mut db: Option<PrototypeDb> = None;
        let mut written = 0usize;

        for (i, batch) in corpus.batches().enumerate() {
            if self.cancel.is_cancelled() {
                warn!("prototype build cancelled after {written} samples");
                return Err(RetrieverError::Cancelled);
            }
            let batch = batch.map_err(|e| RetrieverError::Corpus(e.to_string()))?;
            if batch.items.len() != batch.sample_ids.len() {
                return Err(RetrieverError::CountMismatch {
                    stage: Stage::Build,
                    expected: batch.items.len(),
                    got: batch.sample_ids.len(),
                });
            }
            if batch.items.is_empty() {
                continue;
            }

            let feats = self
                .encoder
                .encode(&batch.items)
                .map_err(RetrieverError::encode(Stage::Build))?;
            if feats.len() != batch.items.len() {
                return Err(RetrieverError::CountMismatch {
                    stage: Stage::Build,
                    expected: batch.items.len(),
                    got: feats.len(),
                });
            }

            if db.is_none() {
                let width = feats[0].len();
                if let Some(hint) = self.encoder.dimension() {
                    if hint != width {
                        return Err(RetrieverError::DimensionMismatch {
                            stage: Stage::Build,
                            expected: hint,
                            got: width,
                        });
                    }
                }
                db = Some(PrototypeDb::zeros(rows, width).map_err(RetrieverError::db(Stage::Build))?);
            }
            if let Some(db) = db.as_mut() {
                for (feat, &id) in feats.iter().zip(&batch.sample_ids) {
                    if feat.len() != db.dim() {
                        return Err(RetrieverError::DimensionMismatch {
                            stage: Stage::Build,
                            expected: db.dim(),
                            got: feat.len(),
                        });
                    }
                    if id >= rows {
                        return Err(RetrieverError::SampleOutOfRange { index: id, rows });
                    }
                    db.set_row(id, &canonical_zeros(feat))
                        .map_err(RetrieverError::db(Stage::Build))?;
                }
            }
            written += feats.len();
            debug!("batch {i}: encoded {} samples ({written} total)", feats.len());
        }

        Ok(db)
    }

    /// Agree on the embedding width across workers. A worker with an empty
    /// shard reports 0 and adopts the width of the others.
    ///
    /// Widths travel through the f32 reduction and are exact up to 2^24.
    fn agree_on_dim(&self, local_dim: usize) -> Result<usize> {
        debug_assert!(local_dim <= 1 << 24, "embedding width {local_dim} exceeds f32 precision");
        let mut dims = vec![0.0f32; self.collective.world_size()];
        dims[self.collective.rank()] = local_dim as f32;
        self.collective.all_reduce_sum(&mut dims)?;

        let mut agreed = 0usize;
        for d in dims.into_iter().map(|d| d as usize).filter(|&d| d > 0) {
            if agreed == 0 {
                agreed = d;
            } else if d != agreed {
                return Err(RetrieverError::DimensionMismatch {
                    stage: Stage::Build,
                    expected: agreed,
                    got: d,
                });
            }
        }
        if agreed == 0 {
            return Err(RetrieverError::Config(
                "prototype corpus produced no samples on any worker".into(),
            ));
        }
        Ok(agreed)
    }
}

/// Replace `-0.0` with `+0.0`. The sum reduction produces `+0.0` for a
/// `-0.0` row value, so every build stores the positive zero.
fn canonical_zeros(feat: &[f32]) -> Vec<f32> {
    feat.iter().map(|&v| if v == 0.0 { 0.0 } else { v }).collect()
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use protoret_embed::{EncodeError, FnEncoder};

    use super::*;
    use crate::collective::SingleProcess;
    use crate::corpus::{Batch, CorpusError, VecCorpus};

    fn identity() -> FnEncoder<f32, impl Fn(&[f32]) -> std::result::Result<Vec<Vec<f32>>, EncodeError>> {
        FnEncoder::new(|xs: &[f32]| Ok(xs.iter().map(|&x| vec![x, 1.0]).collect()))
    }

    fn build(source: &mut PrototypeSource<f32>) -> Result<PrototypeDb> {
        let enc = identity();
        let cancel = CancelToken::new();
        PrototypeBuilder::new(&enc, &SingleProcess, &cancel).build(source)
    }

    /// Yields fixed batches, in whatever order they were given.
    struct Scripted {
        len: usize,
        batches: Vec<Batch<f32>>,
    }

    impl Corpus<f32> for Scripted {
        fn len(&self) -> usize {
            self.len
        }

        fn batches(&mut self) -> Box<dyn Iterator<Item = std::result::Result<Batch<f32>, CorpusError>> + '_> {
            Box::new(self.batches.clone().into_iter().map(Ok))
        }
    }

    #[test]
    fn rows_follow_sample_ids() {
        let mut src = PrototypeSource::corpus(Scripted {
            len: 3,
            batches: vec![
                Batch { items: vec![30.0, 10.0], sample_ids: vec![2, 0] },
                Batch { items: vec![20.0], sample_ids: vec![1] },
            ],
        });
        let db = build(&mut src).unwrap();
        assert_eq!(db.into_rows(), vec![vec![10.0, 1.0], vec![20.0, 1.0], vec![30.0, 1.0]]);
    }

    #[test]
    fn array_source_used_as_is() {
        let array = PrototypeDb::from_rows(&[vec![1.0f32, 2.0]]).unwrap();
        let db = build(&mut PrototypeSource::Array(array.clone())).unwrap();
        assert_eq!(db, array);
    }

    #[test]
    fn file_source_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("p.pdb");
        let array = PrototypeDb::from_rows(&[vec![1.0f32], vec![-1.0]]).unwrap();
        protoret_protodb::save_file(&array, &path).unwrap();
        assert_eq!(build(&mut PrototypeSource::File(path)).unwrap(), array);
    }

    #[test]
    fn malformed_file_is_build_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.pdb");
        std::fs::write(&path, b"garbage").unwrap();
        let err = build(&mut PrototypeSource::File(path)).unwrap_err();
        assert!(matches!(err, RetrieverError::Database { stage: Stage::Build, .. }));
    }

    #[test]
    fn width_change_between_batches() {
        let calls = AtomicUsize::new(0);
        let enc = FnEncoder::new(|xs: &[f32]| {
            let width = 2 + calls.fetch_add(1, Ordering::SeqCst);
            Ok(xs.iter().map(|_| vec![0.5; width]).collect())
        });
        let cancel = CancelToken::new();
        let mut src = PrototypeSource::corpus(VecCorpus::new(vec![1.0f32, 2.0, 3.0], 2));
        let err = PrototypeBuilder::new(&enc, &SingleProcess, &cancel)
            .build(&mut src)
            .unwrap_err();
        assert!(matches!(
            err,
            RetrieverError::DimensionMismatch { stage: Stage::Build, expected: 2, got: 3 }
        ));
        assert_eq!(
            err.to_string(),
            "retriever: build: dimension mismatch: expected 2, got 3"
        );
    }

    #[test]
    fn sample_id_out_of_range() {
        let mut src = PrototypeSource::corpus(Scripted {
            len: 2,
            batches: vec![Batch { items: vec![1.0], sample_ids: vec![5] }],
        });
        assert!(matches!(
            build(&mut src),
            Err(RetrieverError::SampleOutOfRange { index: 5, rows: 2 })
        ));
    }

    #[test]
    fn ids_and_items_disagree() {
        let mut src = PrototypeSource::corpus(Scripted {
            len: 2,
            batches: vec![Batch { items: vec![1.0, 2.0], sample_ids: vec![0] }],
        });
        assert!(matches!(
            build(&mut src),
            Err(RetrieverError::CountMismatch { stage: Stage::Build, .. })
        ));
    }

    #[test]
    fn encoder_drops_items() {
        let enc = FnEncoder::new(|_: &[f32]| Ok(vec![vec![1.0]]));
        let cancel = CancelToken::new();
        let mut src = PrototypeSource::corpus(VecCorpus::new(vec![1.0f32, 2.0], 2));
        assert!(matches!(
            PrototypeBuilder::new(&enc, &SingleProcess, &cancel).build(&mut src),
            Err(RetrieverError::CountMismatch { expected: 2, got: 1, .. })
        ));
    }

    #[test]
    fn encoder_failure_is_build_stage() {
        let enc = FnEncoder::new(|_: &[f32]| Err(EncodeError::Model("cuda".into())));
        let cancel = CancelToken::new();
        let mut src = PrototypeSource::corpus(VecCorpus::new(vec![1.0f32], 1));
        let err = PrototypeBuilder::new(&enc, &SingleProcess, &cancel)
            .build(&mut src)
            .unwrap_err();
        assert_eq!(err.to_string(), "retriever: build: embed: model error: cuda");
    }

    #[test]
    fn empty_corpus() {
        let mut src = PrototypeSource::corpus(VecCorpus::new(Vec::<f32>::new(), 4));
        assert!(matches!(build(&mut src), Err(RetrieverError::Config(_))));
    }

    #[test]
    fn cancelled_before_first_batch() {
        let enc = identity();
        let cancel = CancelToken::new();
        cancel.cancel();
        let mut src = PrototypeSource::corpus(VecCorpus::new(vec![1.0f32, 2.0], 1));
        assert!(matches!(
            PrototypeBuilder::new(&enc, &SingleProcess, &cancel).build(&mut src),
            Err(RetrieverError::Cancelled)
        ));
    }

    #[test]
    fn cancelled_during_last_batch() {
        let cancel = CancelToken::new();
        let trigger = cancel.clone();
        let enc = FnEncoder::new(move |xs: &[f32]| {
            trigger.cancel();
            Ok(xs.iter().map(|&x| vec![x]).collect())
        });
        let mut src = PrototypeSource::corpus(VecCorpus::new(vec![1.0f32, 2.0], 2));
        assert!(matches!(
            PrototypeBuilder::new(&enc, &SingleProcess, &cancel).build(&mut src),
            Err(RetrieverError::Cancelled)
        ));
    }

    #[test]
    fn width_disagrees_with_dimension_hint() {
        let enc = identity().with_dimension(3);
        let cancel = CancelToken::new();
        let mut src = PrototypeSource::corpus(VecCorpus::new(vec![1.0f32], 1));
        assert!(matches!(
            PrototypeBuilder::new(&enc, &SingleProcess, &cancel).build(&mut src),
            Err(RetrieverError::DimensionMismatch { stage: Stage::Build, expected: 3, got: 2 })
        ));
    }

    #[test]
    fn negative_zero_stored_positive() {
        let mut src = PrototypeSource::corpus(VecCorpus::new(vec![-0.0f32, 2.0], 2));
        let db = build(&mut src).unwrap();
        let bits: Vec<u32> = db.as_slice().iter().map(|v| v.to_bits()).collect();
        assert_eq!(bits, vec![0, 1.0f32.to_bits(), 2.0f32.to_bits(), 1.0f32.to_bits()]);
    }
}
