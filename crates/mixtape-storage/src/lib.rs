//! Artifact and job record storage.
//!
//! This crate provides:
//! - `ArtifactStore` with local filesystem, in-memory and R2 backends
//! - `JobStore` with in-memory and filesystem backends and per-job claims

pub mod artifact;
pub mod error;
pub mod job_store;
pub mod r2;

pub use artifact::{artifact_key, ArtifactBody, ArtifactStore, InMemoryArtifactStore, LocalArtifactStore};
pub use error::{StorageError, StorageResult};
pub use job_store::{FsJobStore, InMemoryJobStore, JobStore};
pub use r2::{R2ArtifactStore, R2Config};
