//! Configuration management infrastructure
//!
//! Project files are loaded with figment:
//! - Programmatic defaults merged under the YAML file
//! - Unknown fields rejected everywhere
//! - Validation into ordered service definitions

pub mod loader;

pub use loader::{
    socket_path_for, ConfigError, ConfigLoader, LoadedConfig, DEFAULT_CONFIG_FILE, STATE_DIR,
};
