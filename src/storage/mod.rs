//! Storage: the in-memory sample store and its on-disk renderers.

pub mod export;
pub mod model;

pub use export::{ExportError, OutputFormat, save};
pub use model::{EpochRecord, ProcessSample, SampleStore};
