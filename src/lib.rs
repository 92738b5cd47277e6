//! `prompter`: real-time alignment of live speech to a scrolling script.
//!
//! This crate provides:
//! - Script segmentation into short, matchable lines
//! - A rolling, normalized transcript window fed by incremental recognizer output
//! - Prefix-oriented line scoring with a confirmation state machine
//! - A forward-only position controller with decaying confidence
//! - A threaded session actor and a deterministic replay driver
//!
//! The engine itself is synchronous and takes time as an argument, so it can be driven by the
//! session thread, by a simulated clock, or directly by a host's own event loop.

// High-level API (most consumers should start here).
pub mod engine;
pub mod opts;
pub mod session;

// Script and transcript preparation.
pub mod normalize;
pub mod script;
pub mod transcript;

// Matching, confirmation and cursor control.
pub mod confirm;
pub mod matcher;
pub mod position;

// Offline driving from recorded sessions.
pub mod replay;

// Logging configuration and control.
#[cfg(feature = "logging")]
pub mod logging;

mod error;

pub use engine::{AlignmentEngine, EngineEvent, Step};
pub use error::{Error, Result};
pub use opts::Opts;
pub use position::{ConfidenceBand, ConfidenceLevel, ScrollTo};
pub use session::SessionHandle;
