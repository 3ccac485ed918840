//! Terminal frontend and effect executor: raw-mode guard, the cooperative
//! event loop, the grid renderer, and the code that turns reducer effects
//! into actual I/O.

use std::io::{self, Stdout};
use std::sync::Arc;

use crossterm::event::{self, Event as TermEvent, KeyEventKind};
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use crossterm::ExecutableCommand;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Paragraph};
use ratatui::Terminal;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tracing::{debug, error};

use agentmux_config::JsonStore;
use agentmux_core::{Project, SessionStatus};
use agentmux_notify::Notifier;
use agentmux_runtime::Engine;

use crate::app::{App, InputMode, PromptKind};
use crate::events::{AppEvent, Effect};
use crate::pump::spawn_output_pump;
use crate::turn::{TurnScheduler, SUBMIT_DELAY, TURN_TIMEOUT};

const EVENT_BATCH_LIMIT: usize = 64;

/// Everything the effect executor needs besides the app state itself.
pub struct EffectContext {
    pub engine: Arc<Engine>,
    pub store: Arc<JsonStore>,
    pub notifier: Arc<dyn Notifier>,
    pub tx: UnboundedSender<AppEvent>,
}

/// Alternate-screen terminal with restore-on-drop, so a panic or early
/// return never leaves the user's shell in raw mode.
pub struct Tui {
    pub terminal: Terminal<CrosstermBackend<Stdout>>,
}

impl Tui {
    pub fn init() -> io::Result<Self> {
        enable_raw_mode()?;
        let mut stdout = io::stdout();
        stdout.execute(EnterAlternateScreen)?;
        let terminal = Terminal::new(CrosstermBackend::new(stdout))?;
        Ok(Self { terminal })
    }
}

impl Drop for Tui {
    fn drop(&mut self) {
        let _ = disable_raw_mode();
        let _ = io::stdout().execute(LeaveAlternateScreen);
    }
}

/// Forwards key presses and resizes from the blocking crossterm reader into
/// the app channel. The thread ends when the channel closes.
pub fn spawn_input_thread(tx: UnboundedSender<AppEvent>) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || loop {
        match event::read() {
            Ok(TermEvent::Key(key)) if key.kind == KeyEventKind::Press => {
                if tx.send(AppEvent::Key(key)).is_err() {
                    break;
                }
            }
            Ok(TermEvent::Resize(width, height)) => {
                if tx.send(AppEvent::Resize(width, height)).is_err() {
                    break;
                }
            }
            Ok(_) => {}
            Err(err) => {
                debug!(%err, "input thread ended");
                break;
            }
        }
    })
}

/// The cooperative UI loop: await one event, drain a bounded batch, reduce,
/// execute effects, redraw once per batch.
pub async fn run(mut app: App, ctx: EffectContext, mut rx: UnboundedReceiver<AppEvent>) -> io::Result<()> {
    let mut tui = Tui::init()?;
    spawn_input_thread(ctx.tx.clone());
    execute_effects(&app, &ctx, vec![Effect::LoadProjects]);
    draw(&mut tui.terminal, &app)?;

    while let Some(first) = rx.recv().await {
        let mut batch = vec![first];
        while batch.len() < EVENT_BATCH_LIMIT {
            match rx.try_recv() {
                Ok(event) => batch.push(event),
                Err(_) => break,
            }
        }
        for event in batch {
            let effects = app.handle_event(event);
            execute_effects(&app, &ctx, effects);
        }
        if app.should_quit() {
            break;
        }
        draw(&mut tui.terminal, &app)?;
    }

    if let Err(err) = ctx.engine.close_all() {
        error!(%err, "session teardown reported an error");
    }
    Ok(())
}

// ---- effects ----

pub fn execute_effects(app: &App, ctx: &EffectContext, effects: Vec<Effect>) {
    for effect in effects {
        execute_effect(app, ctx, effect);
    }
}

fn send_status(ctx: &EffectContext, text: String, is_error: bool) {
    let _ = ctx.tx.send(AppEvent::StatusMessage { text, is_error });
}

fn execute_effect(app: &App, ctx: &EffectContext, effect: Effect) {
    match effect {
        Effect::LoadProjects => {
            let _ = ctx
                .tx
                .send(AppEvent::ProjectsLoaded(ctx.store.list_projects()));
        }
        Effect::CreateProject { path } => {
            if !std::path::Path::new(&path).is_dir() {
                send_status(ctx, format!("Not a directory: {path}"), true);
                return;
            }
            let name = std::path::Path::new(&path)
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.clone());
            match ctx.store.add_project(Project::new(name, path)) {
                Ok(()) => {
                    send_status(ctx, "Project added".to_owned(), false);
                    let _ = ctx
                        .tx
                        .send(AppEvent::ProjectsLoaded(ctx.store.list_projects()));
                }
                Err(err) => send_status(ctx, format!("Error adding project: {err}"), true),
            }
        }
        Effect::DeleteProject { id } => {
            match ctx.store.delete_project(&id) {
                Ok(()) => send_status(ctx, "Project deleted".to_owned(), false),
                Err(err) => send_status(ctx, format!("Error deleting project: {err}"), true),
            }
            let _ = ctx
                .tx
                .send(AppEvent::ProjectsLoaded(ctx.store.list_projects()));
        }
        Effect::StartSession {
            project,
            rows,
            cols,
        } => {
            let engine = Arc::clone(&ctx.engine);
            let store = Arc::clone(&ctx.store);
            let tx = ctx.tx.clone();
            tokio::task::spawn_blocking(move || {
                let result = store
                    .profile_for_project(&project)
                    .map_err(|err| err.to_string())
                    .and_then(|profile| {
                        engine
                            .create_session(&project, &profile, rows, cols)
                            .map_err(|err| err.to_string())
                    });
                let event = match result {
                    Ok(_) => AppEvent::SessionStarted {
                        id: project.id.clone(),
                    },
                    Err(error) => AppEvent::SessionSpawnFailed {
                        id: project.id.clone(),
                        error,
                    },
                };
                let _ = tx.send(event);
            });
        }
        Effect::StartPump { id } => {
            let Some(session) = ctx.engine.get_session(&id) else {
                return;
            };
            match session.subscribe() {
                Ok(subscription) => {
                    spawn_output_pump(id, subscription, ctx.tx.clone());
                }
                Err(err) => debug!(%err, "output subscription unavailable"),
            }
        }
        Effect::WriteSession { id, bytes } => {
            if let Some(session) = ctx.engine.get_session(&id) {
                if let Err(err) = session.write(&bytes) {
                    debug!(%err, session = %id, "session write dropped");
                }
            }
        }
        Effect::WriteSessionDelayed { id, bytes, delay } => {
            let engine = Arc::clone(&ctx.engine);
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                if let Some(session) = engine.get_session(&id) {
                    if let Err(err) = session.write(&bytes) {
                        debug!(%err, session = %id, "delayed write dropped");
                    }
                }
            });
        }
        Effect::ResizeSession { id, rows, cols } => {
            if let Some(session) = ctx.engine.get_session(&id) {
                if let Err(err) = session.resize(rows, cols) {
                    debug!(%err, session = %id, "resize rejected");
                }
            }
        }
        Effect::CloseSession { id } => {
            if let Err(err) = ctx.engine.close_session(&id) {
                send_status(ctx, format!("Error closing session: {err}"), true);
            }
        }
        Effect::ArmImeFlush { target, delay } => {
            let tx = ctx.tx.clone();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let _ = tx.send(AppEvent::ImeFlush { target });
            });
        }
        Effect::AppendChain { agent, conclusion } => {
            let Some(chain) = app.chain() else {
                return;
            };
            if let Err(err) = chain.append(agent, conclusion) {
                send_status(ctx, format!("Chain write failed: {err}"), true);
            }
        }
        Effect::PerformTurn { target, seq } => {
            let Some(chain) = app.chain() else {
                send_status(ctx, "No chain context; switch to chain mode first".to_owned(), true);
                return;
            };
            let mut prompt =
                TurnScheduler::turn_banner(&chain.path().display().to_string());
            prompt.push_str(&chain.format_for_injection());

            let engine = Arc::clone(&ctx.engine);
            let write_target = target.clone();
            tokio::spawn(async move {
                if let Some(session) = engine.get_session(&write_target) {
                    if session.status() == SessionStatus::Running {
                        if let Err(err) = session.write(prompt.as_bytes()) {
                            debug!(%err, "turn prompt write dropped");
                            return;
                        }
                        tokio::time::sleep(SUBMIT_DELAY).await;
                        let _ = session.write(b"\r");
                    }
                }
            });

            let tx = ctx.tx.clone();
            tokio::spawn(async move {
                tokio::time::sleep(TURN_TIMEOUT).await;
                let _ = tx.send(AppEvent::TurnTimeout { target, seq });
            });
        }
        Effect::Notify { policy, event } => {
            ctx.notifier.dispatch(&policy, event);
        }
    }
}

// ---- rendering ----

pub fn draw(terminal: &mut Terminal<CrosstermBackend<Stdout>>, app: &App) -> io::Result<()> {
    terminal.draw(|frame| {
        let [grid_area, status_area] =
            Layout::vertical([Constraint::Min(1), Constraint::Length(1)]).areas(frame.area());

        let (grid_rows, grid_cols) = app.grid_dims();
        let row_rects = Layout::vertical(
            (0..grid_rows).map(|_| Constraint::Ratio(1, u32::from(grid_rows))),
        )
        .split(grid_area);

        let panes = app.grid();
        let mut index = 0;
        for row_rect in row_rects.iter() {
            let col_rects = Layout::horizontal(
                (0..grid_cols).map(|_| Constraint::Ratio(1, u32::from(grid_cols))),
            )
            .split(*row_rect);
            for col_rect in col_rects.iter() {
                if let Some(project) = panes.get(index) {
                    render_pane(frame, *col_rect, app, project, index == app.focus_index());
                }
                index += 1;
            }
        }

        render_status_bar(frame, status_area, app);
    })?;
    Ok(())
}

fn render_pane(
    frame: &mut ratatui::Frame,
    rect: Rect,
    app: &App,
    project: &Project,
    focused: bool,
) {
    let status = app.engine().session_status(&project.id);
    let border_style = if focused {
        Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD)
    } else {
        Style::default().fg(Color::DarkGray)
    };
    let title = format!(" {} [{status}] ", project.display_name());
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(border_style)
        .title(title);
    let inner = block.inner(rect);
    frame.render_widget(block, rect);

    match app.engine().get_session(&project.id) {
        Some(session) => {
            let snapshot = session.screen();
            let lines: Vec<Line> = snapshot
                .lines
                .iter()
                .take(usize::from(inner.height))
                .map(|line| Line::raw(line.clone()))
                .collect();
            frame.render_widget(Paragraph::new(lines), inner);

            if focused
                && status == SessionStatus::Running
                && app.input_mode() == InputMode::Terminal
                && snapshot.cursor_visible
                && snapshot.cursor_row < inner.height
                && snapshot.cursor_col < inner.width
            {
                frame.set_cursor_position((
                    inner.x + snapshot.cursor_col,
                    inner.y + snapshot.cursor_row,
                ));
            }
        }
        None => {
            frame.render_widget(
                Paragraph::new("press Enter to launch").style(Style::default().fg(Color::DarkGray)),
                inner,
            );
        }
    }
}

fn render_status_bar(frame: &mut ratatui::Frame, rect: Rect, app: &App) {
    let mut spans = Vec::new();

    if let Some(prompt) = app.prompt() {
        let label = match prompt.kind {
            PromptKind::AddProjectPath => "add project path",
            PromptKind::TurnSequence => "turn sequence",
        };
        spans.push(Span::styled(
            format!("{label}> {}", prompt.buffer),
            Style::default().fg(Color::Yellow),
        ));
    } else {
        let status = app.status();
        let style = if status.is_error {
            Style::default().fg(Color::Red).add_modifier(Modifier::BOLD)
        } else {
            Style::default().fg(Color::Gray)
        };
        spans.push(Span::styled(status.message.clone(), style));
    }

    let mode = match app.input_mode() {
        InputMode::Control => "ctrl",
        InputMode::Terminal => "term",
    };
    let mut right = format!(" | {} | {}", mode, app.dispatch_mode().label());
    let turn = app.turn_status();
    if !turn.is_empty() {
        right.push_str(" | ");
        right.push_str(&turn);
    }
    spans.push(Span::styled(right, Style::default().fg(Color::DarkGray)));

    frame.render_widget(Paragraph::new(Line::from(spans)), rect);
}
