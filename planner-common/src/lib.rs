//! Planner Common - Shared configuration, errors, and logging for the study planner services.
//!
//! This crate provides:
//! - Configuration types and loading (file + environment overrides)
//! - Error types and handling utilities
//! - Logging setup and request tracing helpers

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod config;
pub mod error;
pub mod logging;

pub use config::{
    Config, GeminiConfig, ObservabilityConfig, RedisConfig, SearchConfig, ServerConfig,
};
pub use error::{Error, Result, ResultExt};

