//! Readers for the Linux `/proc` filesystem.
//!
//! `parser` holds pure functions over file contents, `process` answers
//! per-PID questions, and `sampler` turns periodic readings into observations.

pub mod parser;
pub mod process;
pub mod sampler;

pub use parser::ParseError;
pub use process::{CollectError, ProcessProbe, ProcfsProbe};
pub use sampler::ProcfsSource;
