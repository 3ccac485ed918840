use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

const CONFIG_FILE: &str = "config.json";
const MAX_RECENT_PATHS: usize = 20;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0}")]
    Invalid(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("config file is malformed: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Application preferences persisted at `<state>/config.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Full path to the claude executable, when the user pinned one.
    #[serde(default)]
    pub claude_path: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub codex_path: String,
    #[serde(default)]
    pub default_shell: String,
    #[serde(default)]
    pub initialized: bool,
    #[serde(default)]
    pub theme: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub recent_paths: Vec<String>,
    #[serde(default = "default_grid_dim")]
    pub grid_rows: u16,
    #[serde(default = "default_grid_dim")]
    pub grid_cols: u16,
}

fn default_grid_dim() -> u16 {
    2
}

impl Default for AppConfig {
    fn default() -> Self {
        let default_shell = std::env::var("SHELL").unwrap_or_else(|_| {
            if cfg!(windows) {
                "cmd.exe".to_owned()
            } else {
                "/bin/sh".to_owned()
            }
        });
        Self {
            claude_path: String::new(),
            codex_path: String::new(),
            default_shell,
            initialized: false,
            theme: "catppuccin-mocha".to_owned(),
            recent_paths: Vec::new(),
            grid_rows: 2,
            grid_cols: 2,
        }
    }
}

impl AppConfig {
    /// Loads preferences; a missing file yields defaults, a malformed file
    /// is an error.
    pub fn load(state_dir: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = state_dir.as_ref().join(CONFIG_FILE);
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&data)?)
    }

    pub fn save(&self, state_dir: impl AsRef<Path>) -> Result<(), ConfigError> {
        let state_dir = state_dir.as_ref();
        std::fs::create_dir_all(state_dir)?;
        let data = serde_json::to_string_pretty(self)?;
        std::fs::write(state_dir.join(CONFIG_FILE), data)?;
        Ok(())
    }

    /// Records a path at the front of the MRU list, keeping at most 20.
    pub fn add_recent_path(&mut self, path: impl Into<String>) {
        let path = path.into();
        self.recent_paths.retain(|existing| existing != &path);
        self.recent_paths.insert(0, path);
        self.recent_paths.truncate(MAX_RECENT_PATHS);
    }

    pub fn grid_capacity(&self) -> usize {
        usize::from(self.grid_rows) * usize::from(self.grid_cols)
    }
}

/// Root of the persisted state tree:
/// `$XDG_CONFIG_HOME/agentmux`, falling back to `~/.config/agentmux`.
pub fn default_state_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        if !xdg.is_empty() {
            return PathBuf::from(xdg).join("agentmux");
        }
    }
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("agentmux")
}

/// Parses a grid-size setting. Accepts a pane count (`4`, `6`, `9`) or an
/// explicit `rows x cols` with each dimension in 1..=3 and a product of
/// 4, 6, or 9.
pub fn parse_grid(input: &str) -> Result<(u16, u16), ConfigError> {
    let value = input.trim().to_ascii_lowercase();
    if value.is_empty() {
        return Err(ConfigError::Invalid(
            "grid size is required (4/6/9 or 2x2/2x3/3x3)".to_owned(),
        ));
    }

    match value.as_str() {
        "4" => return Ok((2, 2)),
        "6" => return Ok((2, 3)),
        "9" => return Ok((3, 3)),
        _ => {}
    }

    if let Some((rows, cols)) = value.split_once('x') {
        let rows: u16 = rows
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid("invalid grid size format".to_owned()))?;
        let cols: u16 = cols
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid("invalid grid size format".to_owned()))?;
        if !(1..=3).contains(&rows) || !(1..=3).contains(&cols) {
            return Err(ConfigError::Invalid(
                "grid rows/cols must be between 1 and 3".to_owned(),
            ));
        }
        if ![4, 6, 9].contains(&(rows * cols)) {
            return Err(ConfigError::Invalid(
                "grid size must be 4, 6, or 9".to_owned(),
            ));
        }
        return Ok((rows, cols));
    }

    Err(ConfigError::Invalid(
        "grid size must be 4, 6, or 9 (or 2x2/2x3/3x3)".to_owned(),
    ))
}

/// Looks for the claude binary on PATH, then in the usual install spots.
pub fn detect_claude_path() -> Option<String> {
    detect_binary("claude")
}

pub fn detect_codex_path() -> Option<String> {
    detect_binary("codex")
}

fn detect_binary(name: &str) -> Option<String> {
    if let Ok(path) = which::which(name) {
        return Some(path.to_string_lossy().into_owned());
    }

    let home = dirs::home_dir()?;
    let mut candidates: Vec<PathBuf> = Vec::new();
    if let Ok(nvm) = std::env::var("NVM_BIN") {
        candidates.push(PathBuf::from(nvm).join(name));
    }
    if let Ok(volta) = std::env::var("VOLTA_HOME") {
        candidates.push(PathBuf::from(volta).join("bin").join(name));
    }
    candidates.extend([
        PathBuf::from("/opt/homebrew/bin").join(name),
        PathBuf::from("/usr/local/bin").join(name),
        PathBuf::from("/usr/bin").join(name),
        home.join(".local/bin").join(name),
        home.join(".npm-global/bin").join(name),
    ]);

    candidates
        .into_iter()
        .find(|candidate| candidate.is_file())
        .map(|candidate| candidate.to_string_lossy().into_owned())
}
