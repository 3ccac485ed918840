use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::mpsc;

use agentmux_app::ui::{self, EffectContext};
use agentmux_app::App;
use agentmux_config::{default_state_dir, detect_claude_path, detect_codex_path, AppConfig, JsonStore};
use agentmux_notify::Dispatcher;
use agentmux_runtime::{BinaryOverrides, Engine};

#[tokio::main]
async fn main() -> Result<()> {
    let state_dir = default_state_dir();
    std::fs::create_dir_all(&state_dir)
        .with_context(|| format!("create state dir {}", state_dir.display()))?;

    // The alternate screen owns stdout, so logs go to a file in the state
    // tree.
    let log_file = std::fs::File::create(state_dir.join("agentmux.log"))
        .context("create log file")?;
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with_writer(Arc::new(log_file))
        .with_ansi(false)
        .init();

    let mut config = AppConfig::load(&state_dir).context("load config")?;
    if !config.initialized {
        if config.claude_path.is_empty() {
            if let Some(path) = detect_claude_path() {
                config.claude_path = path;
            }
        }
        if config.codex_path.is_empty() {
            if let Some(path) = detect_codex_path() {
                config.codex_path = path;
            }
        }
        config.initialized = true;
        config.save(&state_dir).context("save config")?;
    }

    let overrides = BinaryOverrides {
        claude_path: Some(config.claude_path.clone()).filter(|p| !p.is_empty()),
        codex_path: Some(config.codex_path.clone()).filter(|p| !p.is_empty()),
    };
    let engine = Arc::new(Engine::with_overrides(&state_dir, overrides));
    let store = Arc::new(JsonStore::open(&state_dir).context("open data store")?);

    let (tx, rx) = mpsc::unbounded_channel();
    let ctx = EffectContext {
        engine: Arc::clone(&engine),
        store: Arc::clone(&store),
        notifier: Arc::new(Dispatcher::new()),
        tx,
    };
    let app = App::new(engine, store, config, &state_dir);

    ui::run(app, ctx, rx).await.context("terminal loop")?;
    Ok(())
}
