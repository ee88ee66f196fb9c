//! softlog - CPU and memory sampling probe for a fixed set of processes.
//!
//! Samples machine-wide CPU usage and per-process CPU and memory at a fixed
//! interval, aggregates the samples into epochs on a strict time grid and
//! writes the whole run as CSV or JSON when stopped.
//!
//! The `softlog` binary wires these pieces together; the library keeps them
//! testable against a mock `/proc` and scripted sources.

pub mod aggregator;
pub mod collector;
pub mod config;
pub mod sampler;
pub mod storage;
pub mod util;
