pub mod cosine;
pub mod db;
pub mod error;
pub mod io;

pub use cosine::{cosine_similarity, cosine_with_norms, dot, l2_norm};
pub use db::PrototypeDb;
pub use error::DbError;
pub use io::{load, load_file, save, save_file};
