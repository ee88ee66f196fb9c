//! Observation sources for the sampler.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                 SampleSource (trait)                     │
//! │  ┌──────────────────────┐   ┌─────────────────────────┐  │
//! │  │    ProcfsSource      │   │       TopSource         │  │
//! │  │  - /proc/stat        │   │  - `top` child process  │  │
//! │  │  - /proc/[pid]/stat  │   │  - escape-coded lines   │  │
//! │  └──────────┬───────────┘   └─────────────────────────┘  │
//! │             │                                            │
//! │      ┌──────▼──────┐        ProcessProbe (trait)         │
//! │      │ ProcfsProbe │◄──── liveness + PSS for the         │
//! │      └──────┬──────┘      epoch aggregator               │
//! │             │                                            │
//! │      ┌──────▼──────┐                                     │
//! │      │  FileSystem │ (trait)                             │
//! │      └──────┬──────┘                                     │
//! └─────────────┼────────────────────────────────────────────┘
//!        ┌──────┴──────┐
//!   ┌────▼────┐   ┌────▼────┐
//!   │ RealFs  │   │ MockFs  │
//!   └─────────┘   └─────────┘
//! ```
//!
//! # Usage
//!
//! ```
//! use std::time::Duration;
//! use softlog::collector::{MockFs, ProcfsProbe, ProcfsSource};
//!
//! let probe = ProcfsProbe::new(MockFs::watched_system(), "/proc");
//! let mut source = ProcfsSource::new(probe, &[1000], Duration::from_secs(1)).unwrap();
//! assert!(source.refresh().is_empty()); // no ticks elapsed since the baseline
//! ```

pub mod mock;
pub mod procfs;
pub mod source;
pub mod top;
pub mod traits;

pub use mock::MockFs;
pub use procfs::{CollectError, ProcessProbe, ProcfsProbe, ProcfsSource};
pub use source::{Observation, Poll, SampleSource, SourceError};
pub use top::TopSource;
pub use traits::{FileSystem, RealFs};
