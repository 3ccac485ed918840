//! Application state and the pure state-transition function. Every event
//! reduces to a new state plus a list of effects; the runtime loop executes
//! the effects between reductions so no blocking I/O ever happens here.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use tracing::warn;

use agentmux_config::{AppConfig, JsonStore};
use agentmux_core::{ChainSessionId, Project, ProjectId, SessionStatus};
use agentmux_runtime::{extract_conclusion, ChainContext, Engine};

use crate::dispatch::{route_targets, DispatchMode};
use crate::events::{AppEvent, Effect};
use crate::ime::{ImeBuffer, ImeAction, FLUSH_TIMEOUT};
use crate::keymap::encode_key;
use crate::roles::preset_for_index;
use crate::turn::{Advance, TurnScheduler, SUBMIT_DELAY};
use crate::watcher::OutputWatcher;

const MIN_PANE_ROWS: u16 = 2;
const MIN_PANE_COLS: u16 = 8;
const STATUS_BAR_ROWS: u16 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InputMode {
    /// Keys drive the multiplexer.
    #[default]
    Control,
    /// Keys are forwarded to the focused/broadcast sessions.
    Terminal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptKind {
    AddProjectPath,
    TurnSequence,
}

#[derive(Debug)]
pub struct Prompt {
    pub kind: PromptKind,
    pub buffer: String,
}

#[derive(Debug, Default)]
pub struct StatusLine {
    pub message: String,
    pub is_error: bool,
}

pub struct App {
    engine: Arc<Engine>,
    store: Arc<JsonStore>,
    config: AppConfig,
    state_dir: PathBuf,
    projects: Vec<Project>,
    focus: usize,
    input_mode: InputMode,
    dispatch_mode: DispatchMode,
    watchers: HashMap<ProjectId, OutputWatcher>,
    ime: ImeBuffer,
    chain: Option<Arc<ChainContext>>,
    scheduler: TurnScheduler,
    prompt: Option<Prompt>,
    status: StatusLine,
    width: u16,
    height: u16,
    should_quit: bool,
}

impl App {
    pub fn new(
        engine: Arc<Engine>,
        store: Arc<JsonStore>,
        config: AppConfig,
        state_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            engine,
            store,
            config,
            state_dir: state_dir.into(),
            projects: Vec::new(),
            focus: 0,
            input_mode: InputMode::Control,
            dispatch_mode: DispatchMode::Solo,
            watchers: HashMap::new(),
            ime: ImeBuffer::new(),
            chain: None,
            scheduler: TurnScheduler::new(),
            prompt: None,
            status: StatusLine::default(),
            width: 80,
            height: 24,
            should_quit: false,
        }
    }

    // ---- accessors used by the runtime loop and renderer ----

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    pub fn store(&self) -> &Arc<JsonStore> {
        &self.store
    }

    pub fn chain(&self) -> Option<Arc<ChainContext>> {
        self.chain.clone()
    }

    pub fn should_quit(&self) -> bool {
        self.should_quit
    }

    pub fn status(&self) -> &StatusLine {
        &self.status
    }

    pub fn prompt(&self) -> Option<&Prompt> {
        self.prompt.as_ref()
    }

    pub fn input_mode(&self) -> InputMode {
        self.input_mode
    }

    pub fn dispatch_mode(&self) -> DispatchMode {
        self.dispatch_mode
    }

    pub fn turn_status(&self) -> String {
        self.scheduler.status_line()
    }

    pub fn focus_index(&self) -> usize {
        self.focus
    }

    pub fn grid_dims(&self) -> (u16, u16) {
        (self.config.grid_rows.max(1), self.config.grid_cols.max(1))
    }

    /// Projects shown in the grid, in display order.
    pub fn grid(&self) -> Vec<&Project> {
        self.projects
            .iter()
            .take(self.config.grid_capacity().max(1))
            .collect()
    }

    fn grid_ids(&self) -> Vec<ProjectId> {
        self.grid().iter().map(|p| p.id.clone()).collect()
    }

    fn focused_project(&self) -> Option<&Project> {
        let grid = self.grid();
        grid.get(self.focus).copied()
    }

    pub fn focused_id(&self) -> Option<ProjectId> {
        self.focused_project().map(|p| p.id.clone())
    }

    /// Inner PTY dimensions of one grid cell at the current window size.
    pub fn pane_size(&self) -> (u16, u16) {
        let (grid_rows, grid_cols) = self.grid_dims();
        let usable_h = self.height.saturating_sub(STATUS_BAR_ROWS);
        let cell_h = usable_h / grid_rows;
        let cell_w = self.width / grid_cols;
        // Each cell spends two rows/cols on its border.
        let rows = cell_h.saturating_sub(2).max(MIN_PANE_ROWS);
        let cols = cell_w.saturating_sub(2).max(MIN_PANE_COLS);
        (rows, cols)
    }

    fn set_status(&mut self, message: impl Into<String>, is_error: bool) {
        self.status = StatusLine {
            message: message.into(),
            is_error,
        };
    }

    fn set_focus(&mut self, index: usize) {
        let slots = self.grid().len();
        if slots == 0 {
            self.focus = 0;
            return;
        }
        self.focus = index.min(slots - 1);
        if let Some(id) = self.focused_id() {
            self.ime.set_target(&id);
        }
    }

    fn focus_by_id(&mut self, id: &ProjectId) {
        let index = self.grid().iter().position(|p| &p.id == id);
        if let Some(index) = index {
            self.set_focus(index);
        }
    }

    // ---- reduction ----

    pub fn handle_event(&mut self, event: AppEvent) -> Vec<Effect> {
        match event {
            AppEvent::ProjectsLoaded(projects) => {
                self.projects = projects;
                self.set_focus(self.focus);
                Vec::new()
            }
            AppEvent::Resize(width, height) => {
                self.width = width;
                self.height = height;
                let (rows, cols) = self.pane_size();
                self.grid_ids()
                    .into_iter()
                    .filter(|id| self.engine.session_status(id) == SessionStatus::Running)
                    .map(|id| Effect::ResizeSession { id, rows, cols })
                    .collect()
            }
            AppEvent::SessionStarted { id } => {
                self.watchers.insert(id.clone(), OutputWatcher::new());
                self.set_status("Session started", false);
                let (rows, cols) = self.pane_size();
                vec![
                    Effect::StartPump { id: id.clone() },
                    Effect::ResizeSession { id, rows, cols },
                ]
            }
            AppEvent::SessionSpawnFailed { id, error } => {
                self.set_status(format!("Session {id} failed: {error}"), true);
                Vec::new()
            }
            AppEvent::SessionOutput { id, bytes } => self.on_session_output(id, &bytes),
            AppEvent::SessionStopped { id } => {
                self.watchers.remove(&id);
                let exit_error = self
                    .engine
                    .get_session(&id)
                    .and_then(|session| session.exit_error());
                match exit_error {
                    Some(error) => self.set_status(format!("Session ended: {error}"), true),
                    None => self.set_status("Session ended", false),
                }
                Vec::new()
            }
            AppEvent::ImeFlush { target } => self.on_ime_flush(target),
            AppEvent::TurnTimeout { target, seq } => {
                if self.scheduler.is_current_turn(seq) {
                    self.set_status(format!("Turn timed out waiting on {target}"), true);
                }
                Vec::new()
            }
            AppEvent::StatusMessage { text, is_error } => {
                self.set_status(text, is_error);
                Vec::new()
            }
            AppEvent::Key(key) => self.on_key(key),
        }
    }

    fn on_session_output(&mut self, id: ProjectId, bytes: &[u8]) -> Vec<Effect> {
        let Some(project) = self.projects.iter().find(|p| p.id == id).cloned() else {
            return Vec::new();
        };
        let profile = match self.store.profile_for_project(&project) {
            Ok(profile) => profile,
            Err(error) => {
                warn!(%error, "profile lookup failed during output analysis");
                return Vec::new();
            }
        };

        let watcher = self.watchers.entry(id.clone()).or_default();
        let events = watcher.process(&project, &profile, bytes);
        let mut effects: Vec<Effect> = events
            .into_iter()
            .map(|event| Effect::Notify {
                policy: profile.notification.clone(),
                event,
            })
            .collect();

        if let Some(reply) = watcher.consume_auto_reply() {
            effects.push(Effect::WriteSession { id, bytes: reply });
        }
        effects
    }

    fn on_ime_flush(&mut self, target: ProjectId) -> Vec<Effect> {
        if self.input_mode != InputMode::Terminal {
            self.ime.clear();
            return Vec::new();
        }
        if self.ime.target() != Some(&target) {
            return Vec::new();
        }
        match self.ime.flush() {
            Some(bytes) => vec![Effect::WriteSession { id: target, bytes }],
            None => Vec::new(),
        }
    }

    // ---- keys ----

    fn on_key(&mut self, key: KeyEvent) -> Vec<Effect> {
        if self.prompt.is_some() {
            return self.on_prompt_key(key);
        }

        // Mode toggle works from both planes.
        let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
        if key.code == KeyCode::F(12) || (ctrl && key.code == KeyCode::Char('e')) {
            self.input_mode = match self.input_mode {
                InputMode::Control => InputMode::Terminal,
                InputMode::Terminal => InputMode::Control,
            };
            self.ime.clear();
            self.set_status(
                match self.input_mode {
                    InputMode::Control => "Control mode",
                    InputMode::Terminal => "Terminal mode",
                },
                false,
            );
            return Vec::new();
        }

        match self.input_mode {
            InputMode::Terminal => self.on_terminal_key(key),
            InputMode::Control => self.on_control_key(key),
        }
    }

    fn on_prompt_key(&mut self, key: KeyEvent) -> Vec<Effect> {
        match key.code {
            KeyCode::Esc => {
                self.prompt = None;
            }
            KeyCode::Backspace => {
                if let Some(prompt) = self.prompt.as_mut() {
                    prompt.buffer.pop();
                }
            }
            KeyCode::Enter => {
                if let Some(Prompt { kind, buffer }) = self.prompt.take() {
                    return self.submit_prompt(kind, buffer);
                }
            }
            KeyCode::Char(c) => {
                if let Some(prompt) = self.prompt.as_mut() {
                    prompt.buffer.push(c);
                }
            }
            _ => {}
        }
        Vec::new()
    }

    fn submit_prompt(&mut self, kind: PromptKind, input: String) -> Vec<Effect> {
        match kind {
            PromptKind::AddProjectPath => {
                let path = input.trim().to_owned();
                if path.is_empty() {
                    return Vec::new();
                }
                vec![Effect::CreateProject { path }]
            }
            PromptKind::TurnSequence => {
                self.scheduler.init(&input, &self.grid_ids());
                self.set_status(
                    "Sequence set. Alt-N advances, Alt-A starts auto-turn.",
                    false,
                );
                Vec::new()
            }
        }
    }

    fn on_terminal_key(&mut self, key: KeyEvent) -> Vec<Effect> {
        if let Some(id) = self.focused_id() {
            self.ime.set_target(&id);
        }

        let alt = key.modifiers.contains(KeyModifiers::ALT);
        let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);

        if let (KeyCode::Char(c), false, false) = (key.code, alt, ctrl) {
            let mut text_buf = [0u8; 4];
            let text = c.encode_utf8(&mut text_buf);
            return match self.ime.process_text(text) {
                ImeAction::Staged => match self.ime.target().cloned() {
                    Some(target) => vec![Effect::ArmImeFlush {
                        target,
                        delay: FLUSH_TIMEOUT,
                    }],
                    None => Vec::new(),
                },
                ImeAction::Emit(bytes) => self.route_bytes(bytes),
                ImeAction::FlushThenEmit { staged, emit } => {
                    let mut effects = self.route_bytes(staged);
                    effects.extend(self.route_bytes(emit));
                    effects
                }
            };
        }

        // Non-rune keys deliver any staged preedit first, in order.
        let mut effects = Vec::new();
        if let Some(staged) = self.ime.flush() {
            effects.extend(self.route_bytes(staged));
        }
        if let Some(bytes) = encode_key(&key) {
            effects.extend(self.route_bytes(bytes));
        }
        effects
    }

    /// Typed input goes to the router's targets for the active dispatch
    /// mode.
    fn route_bytes(&self, bytes: Vec<u8>) -> Vec<Effect> {
        if bytes.is_empty() {
            return Vec::new();
        }
        route_targets(self.dispatch_mode, self.focused_id().as_ref(), &self.engine)
            .into_iter()
            .map(|id| Effect::WriteSession {
                id,
                bytes: bytes.clone(),
            })
            .collect()
    }

    fn on_control_key(&mut self, key: KeyEvent) -> Vec<Effect> {
        let alt = key.modifiers.contains(KeyModifiers::ALT);
        let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
        let (grid_rows, grid_cols) = self.grid_dims();

        match key.code {
            KeyCode::Char('q') if !alt && !ctrl => {
                self.should_quit = true;
                Vec::new()
            }
            KeyCode::Tab => {
                let slots = self.grid().len();
                if slots > 0 {
                    self.set_focus((self.focus + 1) % slots);
                }
                Vec::new()
            }
            KeyCode::BackTab => {
                let slots = self.grid().len();
                if slots > 0 {
                    self.set_focus((self.focus + slots - 1) % slots);
                }
                Vec::new()
            }
            KeyCode::Up | KeyCode::Down | KeyCode::Left | KeyCode::Right => {
                self.navigate_grid(key.code, grid_rows, grid_cols);
                Vec::new()
            }
            KeyCode::Enter => self.start_focused_session(),
            KeyCode::Char('a') if !alt && !ctrl => {
                self.prompt = Some(Prompt {
                    kind: PromptKind::AddProjectPath,
                    buffer: String::new(),
                });
                Vec::new()
            }
            KeyCode::Char('s') if !alt && !ctrl => {
                self.prompt = Some(Prompt {
                    kind: PromptKind::TurnSequence,
                    buffer: String::new(),
                });
                Vec::new()
            }
            KeyCode::Char('x') if !alt && !ctrl => match self.focused_id() {
                Some(id) => {
                    self.set_status("Session closed", false);
                    vec![Effect::CloseSession { id }]
                }
                None => Vec::new(),
            },
            KeyCode::Char('d') if !alt && !ctrl => match self.focused_id() {
                Some(id) => {
                    vec![
                        Effect::CloseSession { id: id.clone() },
                        Effect::DeleteProject { id },
                    ]
                }
                None => Vec::new(),
            },
            KeyCode::Char('p') if !alt && !ctrl => {
                let names: Vec<String> = self
                    .store
                    .list_profiles()
                    .into_iter()
                    .map(|profile| {
                        if profile.is_default {
                            format!("{}*", profile.name)
                        } else {
                            profile.name
                        }
                    })
                    .collect();
                self.set_status(format!("Profiles: {}", names.join(", ")), false);
                Vec::new()
            }
            KeyCode::Char('m') if alt => {
                self.cycle_dispatch_mode();
                Vec::new()
            }
            KeyCode::Char('n') if alt => self.advance_turn(),
            KeyCode::Char('a') if alt => self.toggle_auto_turn(),
            KeyCode::Char('r') if ctrl => self.assign_roles(),
            KeyCode::Char('f') if alt => self.assign_roles(),
            _ => Vec::new(),
        }
    }

    fn navigate_grid(&mut self, code: KeyCode, grid_rows: u16, grid_cols: u16) {
        let slots = self.grid().len();
        if slots == 0 {
            return;
        }
        let cols = usize::from(grid_cols.max(1));
        let rows = usize::from(grid_rows.max(1));
        let mut row = self.focus / cols;
        let mut col = self.focus % cols;
        match code {
            KeyCode::Left if col > 0 => col -= 1,
            KeyCode::Right if col + 1 < cols => col += 1,
            KeyCode::Up if row > 0 => row -= 1,
            KeyCode::Down if row + 1 < rows => row += 1,
            _ => return,
        }
        let index = row * cols + col;
        if index < slots {
            self.set_focus(index);
        }
    }

    fn start_focused_session(&mut self) -> Vec<Effect> {
        let Some(project) = self.focused_project().cloned() else {
            self.set_status("No project selected. Press a to add one.", true);
            return Vec::new();
        };
        if self.engine.session_status(&project.id) == SessionStatus::Running {
            self.set_status("Session already running", false);
            return Vec::new();
        }
        let (rows, cols) = self.pane_size();
        vec![Effect::StartSession {
            project,
            rows,
            cols,
        }]
    }

    fn cycle_dispatch_mode(&mut self) {
        self.dispatch_mode = self.dispatch_mode.next();
        if self.dispatch_mode == DispatchMode::Chain && self.chain.is_none() {
            let id = ChainSessionId::new(chrono::Utc::now().timestamp().to_string());
            let task = format!("Chain session {}", id.as_str());
            match ChainContext::new(id, task, self.state_dir.join("chain")) {
                Ok(chain) => self.chain = Some(Arc::new(chain)),
                Err(error) => {
                    self.set_status(format!("Chain init failed: {error}"), true);
                    return;
                }
            }
        }
        self.set_status(
            format!("Dispatch mode: {}", self.dispatch_mode.label()),
            false,
        );
    }

    /// `Alt-N`: capture the current agent's conclusion, append it to the
    /// chain, and hand the turn to the next agent in the sequence.
    fn advance_turn(&mut self) -> Vec<Effect> {
        if !self.scheduler.is_configured() {
            self.set_status("No turn sequence. Press s to define one.", true);
            return Vec::new();
        }
        let mut effects = Vec::new();

        if let Some(current) = self.scheduler.current().cloned() {
            if let Some(session) = self.engine.get_session(&current) {
                let history = session.history();
                let conclusion = extract_conclusion(&String::from_utf8_lossy(&history));
                if !conclusion.is_empty() {
                    let agent = self
                        .projects
                        .iter()
                        .find(|p| p.id == current)
                        .map(|p| p.display_name().to_owned())
                        .unwrap_or_else(|| current.as_str().to_owned());
                    effects.push(Effect::AppendChain { agent, conclusion });
                }
            }
        }

        match self.scheduler.advance() {
            Advance::Turn(next) => {
                self.focus_by_id(&next);
                let seq = self.scheduler.begin_turn();
                self.set_status(format!("Turn: {next}"), false);
                effects.push(Effect::PerformTurn { target: next, seq });
            }
            Advance::Completed => {
                self.set_status("Turn sequence completed", false);
            }
            Advance::Empty => {}
        }
        effects
    }

    /// `Alt-A`: pause/resume auto-advance; resuming performs the current
    /// turn immediately.
    fn toggle_auto_turn(&mut self) -> Vec<Effect> {
        if !self.scheduler.is_configured() {
            self.set_status("No turn sequence. Press s to define one.", true);
            return Vec::new();
        }
        match self.scheduler.toggle() {
            Some(target) => {
                self.focus_by_id(&target);
                let seq = self.scheduler.begin_turn();
                self.set_status("Auto-turn: on", false);
                vec![Effect::PerformTurn { target, seq }]
            }
            None => {
                self.set_status("Auto-turn: off", false);
                Vec::new()
            }
        }
    }

    /// `Ctrl-R` / `Alt-F`: inject the preset role prompts into every
    /// running pane, each submitted after a settle delay.
    fn assign_roles(&mut self) -> Vec<Effect> {
        let mut effects = Vec::new();
        for (index, id) in self.grid_ids().into_iter().enumerate() {
            if self.engine.session_status(&id) != SessionStatus::Running {
                continue;
            }
            effects.push(Effect::WriteSession {
                id: id.clone(),
                bytes: preset_for_index(index).into_bytes(),
            });
            effects.push(Effect::WriteSessionDelayed {
                id,
                bytes: b"\r".to_vec(),
                delay: SUBMIT_DELAY,
            });
        }
        if effects.is_empty() {
            self.set_status("No running sessions to assign roles to", true);
        } else {
            self.set_status("Roles assigned", false);
        }
        effects
    }
}
