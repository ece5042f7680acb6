// src/config/mod.rs

//! Runtime configuration for flowdag.
//!
//! Responsibilities:
//! - Define the TOML-backed data model (`model.rs`).
//! - Load a config file from disk (`loader.rs`).
//! - Validate basic invariants like worker counts and durations (`validate.rs`).
//!
//! The workflow itself (tasks and links) is not configured here; it lives in
//! the persisted JSON document handled by [`crate::workflow`].

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{default_config_path, load_and_validate, load_from_path, load_or_default};
pub use model::{ConfigFile, DefaultSection, ProjectSection, RawConfigFile, RuntimeSection};
