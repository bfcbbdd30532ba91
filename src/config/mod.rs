//! Configuration Module
//!
//! Runtime settings from a JSON file and the environment. Connection
//! descriptors live in [`crate::ssh::SshConfig`].

pub mod settings;

pub use settings::{
    config_dir, settings_file, ConfigError, Settings, DEFAULT_TERM, MAX_CONCURRENT_ENV,
    PROGRESS_ENV, TERM_ENV,
};
