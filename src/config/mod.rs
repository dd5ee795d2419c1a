// src/config/mod.rs

//! Node configuration.
//!
//! Responsibilities:
//! - Define the TOML-backed data model (`model.rs`).
//! - Load a config file from disk (`loader.rs`).
//! - Validate it and resolve durations into a [`NodeConfig`] (`validate.rs`).

pub mod duration;
pub mod loader;
pub mod model;
pub mod validate;

pub use duration::parse_duration;
pub use loader::{default_config_path, from_toml_str, load_and_validate, load_from_path};
pub use model::{
    CoordinatorSettings, LoopSettings, NodeConfig, RawNodeConfig, TerminationPolicy,
    WorkerSettings,
};
