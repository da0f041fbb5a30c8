//! Core utilities for the frame loop workspace.
//!
//! This crate provides foundational types and utilities used across the
//! other crates:
//! - Error types and result aliases
//! - Logging initialization
//! - Timer utilities
//! - Configuration

mod config;
mod error;
mod logging;
mod timer;

pub use config::{DEFAULT_FRAMES_IN_FLIGHT, MAX_FRAMES_IN_FLIGHT, RendererConfig};
pub use error::{Error, Result};
pub use logging::{DEFAULT_FILTER, init_logging};
pub use timer::Timer;
