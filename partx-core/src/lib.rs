#![forbid(unsafe_code)]

pub mod checksum;
pub mod config;
pub mod error;
pub mod manifest;
pub mod merge;
pub mod plan;
pub mod progress;
pub mod rows;
pub mod schema;
pub mod split;
pub mod store;

// Re-exports: stable API surface
pub use checksum::Digest;
pub use config::{MergeOptions, PartxConfig, SplitOptions};
pub use error::{ErrorKind, PartxError, Result};
pub use manifest::{ChunkMeta, Manifest};
pub use merge::{MergeReport, MergeState, VerificationReport, merge, merge_with, verify};
pub use progress::{Flow, ProgressSink, ProgressUpdate, Stage};
pub use schema::SchemaDescriptor;
pub use split::{ManifestHandle, split, split_with};
