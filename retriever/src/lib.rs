//! Exact top-k retrieval against a prototype database of embeddings.
//!
//! A [`Retriever`] encodes a reference corpus once (lazily, on the first
//! query), keeps the resulting N×C matrix in memory and ranks every
//! prototype for each query. Builds can be sharded across workers that
//! share a [`Collective`].

pub mod builder;
pub mod cancel;
pub mod collective;
pub mod config;
pub mod corpus;
pub mod error;
pub mod matcher;
pub mod result;
pub mod retriever;
pub mod similarity;
pub mod source;

pub use builder::PrototypeBuilder;
pub use cancel::CancelToken;
pub use collective::{Collective, CollectiveError, LocalGroup, LocalMember, SingleProcess};
pub use config::{RetrieverConfig, RetrieverOptions, SourceSpec, TopK};
pub use corpus::{Batch, Corpus, CorpusError, VecCorpus};
pub use error::{Result, RetrieverError, Stage};
pub use matcher::{Matcher, rank};
pub use result::{Prediction, QueryResult};
pub use retriever::{RetrievalState, Retriever};
pub use similarity::{Similarity, SimilarityFn};
pub use source::PrototypeSource;

pub use protoret_embed::{EncodeError, Encoder, FnEncoder};
pub use protoret_protodb::{DbError, PrototypeDb};
