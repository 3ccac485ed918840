//! Application preferences, the persisted state tree, and the JSON store
//! for project and profile records.

mod config;
mod store;

pub use config::{
    default_state_dir, detect_claude_path, detect_codex_path, parse_grid, AppConfig, ConfigError,
};
pub use store::{JsonStore, StoreError};
