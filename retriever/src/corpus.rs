use std::fmt;
use std::sync::Arc;

/// Error type corpus implementations report while producing batches.
pub type CorpusError = Box<dyn std::error::Error + Send + Sync>;

/// A batch of raw reference items with one stable sample identifier each.
///
/// `sample_ids[i]` is the database row of `items[i]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch<T> {
    pub items: Vec<T>,
    pub sample_ids: Vec<usize>,
}

/// Corpus is the dataloader-like reference set a prototype database is
/// built from.
///
/// Sample identifiers must be unique across the whole corpus and cover
/// `[0, len())` without gaps. In a sharded build every worker holds its own
/// Corpus, which yields only that worker's shard while `len()` still
/// reports the size of the whole corpus.
pub trait Corpus<T>: Send {
    /// Size N of the whole corpus, across all shards.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterate over this worker's batches. May block on I/O.
    fn batches(&mut self) -> Box<dyn Iterator<Item = Result<Batch<T>, CorpusError>> + '_>;
}

/// VecCorpus is an in-memory [`Corpus`] over a shared item list.
///
/// The item at position `i` has sample identifier `i`. Sharding is strided
/// like a distributed sampler: shard `rank` of `world_size` holds the
/// identifiers `rank, rank + world_size, ...`.
pub struct VecCorpus<T> {
    items: Arc<[T]>,
    batch_size: usize,
    rank: usize,
    world_size: usize,
}

impl<T> VecCorpus<T> {
    /// Creates an unsharded corpus.
    ///
    /// # Panics
    ///
    /// Panics if `batch_size` is 0.
    pub fn new(items: impl Into<Arc<[T]>>, batch_size: usize) -> Self {
        assert!(batch_size > 0, "corpus: batch_size must be positive");
        Self {
            items: items.into(),
            batch_size,
            rank: 0,
            world_size: 1,
        }
    }

    /// Restricts the corpus to shard `rank` of `world_size`.
    ///
    /// # Panics
    ///
    /// Panics if `rank >= world_size`.
    pub fn shard(mut self, rank: usize, world_size: usize) -> Self {
        assert!(rank < world_size, "corpus: rank {rank} out of range for world size {world_size}");
        self.rank = rank;
        self.world_size = world_size;
        self
    }

    /// Sample identifiers of this shard, in iteration order.
    pub fn shard_ids(&self) -> impl Iterator<Item = usize> + '_ {
        (self.rank..self.items.len()).step_by(self.world_size)
    }
}

impl<T> Clone for VecCorpus<T> {
    fn clone(&self) -> Self {
        Self {
            items: self.items.clone(),
            batch_size: self.batch_size,
            rank: self.rank,
            world_size: self.world_size,
        }
    }
}

impl<T> fmt::Debug for VecCorpus<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VecCorpus")
            .field("len", &self.items.len())
            .field("batch_size", &self.batch_size)
            .field("rank", &self.rank)
            .field("world_size", &self.world_size)
            .finish()
    }
}

impl<T: Clone + Send + Sync> Corpus<T> for VecCorpus<T> {
    fn len(&self) -> usize {
        self.items.len()
    }

    fn batches(&mut self) -> Box<dyn Iterator<Item = Result<Batch<T>, CorpusError>> + '_> {
        let ids: Vec<usize> = self.shard_ids().collect();
        let total = ids.len();
        let batch_size = self.batch_size;
        let items = &self.items;
        Box::new((0..total).step_by(batch_size).map(move |start| {
            let sample_ids = ids[start..(start + batch_size).min(total)].to_vec();
            Ok(Batch {
                items: sample_ids.iter().map(|&i| items[i].clone()).collect(),
                sample_ids,
            })
        }))
    }
}
