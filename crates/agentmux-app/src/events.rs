use std::time::Duration;

use crossterm::event::KeyEvent;

use agentmux_core::{NotificationPolicy, Project, ProjectId};
use agentmux_notify::Event as NotifyEvent;

/// Everything the UI loop reacts to: output frames, lifecycle signals,
/// keys, and timers, in message-arrival order.
#[derive(Debug)]
pub enum AppEvent {
    Key(KeyEvent),
    Resize(u16, u16),
    ProjectsLoaded(Vec<Project>),
    SessionStarted { id: ProjectId },
    SessionSpawnFailed { id: ProjectId, error: String },
    SessionOutput { id: ProjectId, bytes: Vec<u8> },
    SessionStopped { id: ProjectId },
    ImeFlush { target: ProjectId },
    TurnTimeout { target: ProjectId, seq: u64 },
    StatusMessage { text: String, is_error: bool },
}

/// I/O the reducer requests; executed in order between reductions.
#[derive(Debug, PartialEq, Eq)]
pub enum Effect {
    LoadProjects,
    CreateProject { path: String },
    DeleteProject { id: ProjectId },
    StartSession { project: Project, rows: u16, cols: u16 },
    StartPump { id: ProjectId },
    WriteSession { id: ProjectId, bytes: Vec<u8> },
    WriteSessionDelayed { id: ProjectId, bytes: Vec<u8>, delay: Duration },
    ResizeSession { id: ProjectId, rows: u16, cols: u16 },
    CloseSession { id: ProjectId },
    ArmImeFlush { target: ProjectId, delay: Duration },
    AppendChain { agent: String, conclusion: String },
    PerformTurn { target: ProjectId, seq: u64 },
    Notify { policy: NotificationPolicy, event: NotifyEvent },
}
