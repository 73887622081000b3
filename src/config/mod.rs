//! Configuration module for kongsync.
//!
//! This module handles all configuration-related functionality:
//! - Parsing and deserializing `kongsync.yaml`
//! - Validation of configuration values
//! - Computing configuration hashes for change detection

mod spec;
mod parser;
mod validator;
mod hash;

pub use spec::{
    AdminConfig, StateConfig, SyncConfig, TargetConfig, UpstreamConfig, MAX_SLOTS, MAX_WEIGHT,
    MIN_SLOTS,
};
pub use parser::{ConfigParser, find_config_file, ADMIN_TOKEN_VAR, DEFAULT_CONFIG_FILES};
pub use validator::{ConfigValidator, ValidationError, ValidationResult, is_valid_name, is_valid_target};
pub use hash::ConfigHasher;
