//! Semantic clustering and relationship graphs over embedded files.
//!
//! [`engine::ClusterService`] is the entry point: it pulls embeddings from a
//! [`store::VectorStore`], groups them with k-means, names the groups, and
//! caches the result for the graph and duplicate queries.

pub mod classify;
pub mod cli;
pub mod config;
pub mod duplicates;
pub mod engine;
mod error;
pub mod graph;
pub mod io_utils;
pub mod label;
pub mod logging;
pub mod serde_helpers;
pub mod store;
pub mod terms;

pub use error::{AppError, AppResult};
