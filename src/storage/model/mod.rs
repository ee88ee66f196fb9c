//! Data model of a sampling run.

mod epoch;
mod store;

pub use epoch::{EpochRecord, ProcessSample};
pub use store::SampleStore;
