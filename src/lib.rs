//! eimrun — run Edge Impulse model processes from Rust.
//!
//! A model exported for Linux is a standalone executable that serves
//! classifications over a Unix socket. This crate starts such a process,
//! speaks its JSON protocol ([`runner`]), and feeds it live input from
//! capture sources: a sliding-window audio pipeline ([`audio`]) and a
//! per-frame camera pipeline ([`camera`]). Both pipelines drop input
//! rather than queueing it while a classification is still in flight, so
//! a slow or stalled model never blocks capture.
//!
//! ```no_run
//! use eimrun::runner::{ProcessRunner, Runner, RunnerOpts};
//!
//! fn main() -> eimrun::Result<()> {
//!     let runner = ProcessRunner::start("model.eim", RunnerOpts::default())?;
//!     println!("model {}", runner.model_parameters());
//!     let response = runner.classify(&[0.1, 0.2, 0.3])?;
//!     println!("{response}");
//!     runner.close();
//!     Ok(())
//! }
//! ```
//!
//! Capture backends are external programs (`sox`/`arecord` for audio,
//! `ffmpeg` for cameras); recorders stay owned by the caller and are
//! started and stopped independently of the pipelines consuming them.

#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

pub mod audio;
pub mod camera;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod defaults;
pub mod error;
#[cfg(feature = "ingest")]
pub mod ingest;
pub mod maf;
pub mod runner;
mod tempdir;

// Error handling
pub use error::{EimrunError, Result};

// Runner and protocol types
pub use runner::protocol::{
    BoundingBox, ClassifyResponse, ClassifyResult, ModelParameters, ModelType, Project,
    SensorType, Timing,
};
pub use runner::{MockRunner, ProcessRunner, Runner, RunnerOpts};

// Smoothing
pub use maf::Maf;
