//! Lip-sync job runner.
//!
//! This crate provides:
//! - Environment and command-line configuration
//! - Device resolution and device-tuned settings
//! - Optional input pre-optimisation
//! - Staged progress and structured job logging
//! - Job outcome reporting

pub mod cli;
pub mod config;
pub mod error;
pub mod logging;
pub mod processor;

pub use cli::Cli;
pub use config::WorkerConfig;
pub use error::{WorkerError, WorkerResult};
pub use logging::JobLogger;
pub use processor::{locate_checkpoint, resolve_device, LipSyncProcessor};
