//! The embedding source seen by the retriever.
//!
//! An [`Encoder`] turns a batch of raw items into one fixed-width `f32`
//! vector per item. The network behind it is opaque to this workspace.

pub mod embed;
pub mod error;
pub mod func;

pub use embed::Encoder;
pub use error::EncodeError;
pub use func::FnEncoder;
