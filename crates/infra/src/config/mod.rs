//! Configuration loading
//!
//! Layers a config file and `OFFSYNC_*` environment variables over the
//! defaults in `offsync-domain`.

pub mod loader;

// Re-export commonly used items
pub use loader::{discover_config_path, load, load_from_env, load_from_file};
