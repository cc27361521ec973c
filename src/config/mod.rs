//! Configuration module for sisense-kit
//!
//! Provides connection settings (YAML or inline), CLI arguments,
//! and the option enums shared by the migration workflows.

mod settings;

pub use settings::*;
