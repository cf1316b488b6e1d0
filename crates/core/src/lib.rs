//! Core domain types and shared logic for the dgrep log-search store.
//!
//! This crate defines the canonical data model used across the other crates:
//! - Jobs, chunks, matches and per-chunk search results
//! - Log files as listed from object storage
//! - Storage categories and the bucket registry that routes them
//! - Configuration shared by the storage layer and the operator CLI

pub mod bucket;
pub mod config;
pub mod error;
pub mod models;

pub use bucket::{BucketOptions, BucketRegistry, BucketSpec, ContentType, StorageCategory};
pub use config::{AppConfig, ObjectStoreConfig, StorageOptions};
pub use error::{Error, Result};
pub use models::{
    Chunk, ChunkMessage, Job, JobStats, JobStatus, LogFile, Match, MatchContext, ResultMessage,
    SearchResult,
};
