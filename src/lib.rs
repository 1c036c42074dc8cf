//! fotovec: embedding-based indexing, search and organisation for a
//! photo/video library.
//!
//! The pipeline is: scan the library into the catalogue, index media into
//! CLIP embeddings stored in the embedding store, then run similarity
//! decisions over the vectors — search, destination classification with
//! undoable moves, and non-exclusive tagging.

pub mod classify;
pub mod config;
pub mod db;
pub mod embedder;
pub mod error;
pub mod index;
pub mod logging;
pub mod media;
pub mod organise;
pub mod search;
pub mod store;
pub mod tagger;
pub mod tasks;
pub mod vector;

pub use config::Config;
pub use db::Database;
pub use error::{Error, Result};
