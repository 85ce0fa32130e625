//! Configuration module for the V3C streaming toolkit
//!
//! Handles loading configuration from TOML files and environment variable overrides.

pub mod config;

pub use config::*;
