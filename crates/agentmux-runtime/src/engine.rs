use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use tracing::info;

use agentmux_core::{Profile, Project, ProjectId, SessionStatus};

use crate::{resolve_launch, BinaryOverrides, PtySession, RuntimeError, RuntimeResult};

/// Environment variable injected into every child so concurrent sessions
/// keep separate agent state.
const SESSION_CONFIG_DIR_VAR: &str = "CLAUDE_CONFIG_DIR";

/// Keyed session registry: one live session per project id. The registry
/// lock covers only the map; each session governs its own locking.
pub struct Engine {
    sessions: Mutex<HashMap<ProjectId, Arc<PtySession>>>,
    overrides: BinaryOverrides,
    state_dir: PathBuf,
}

impl Engine {
    pub fn new(state_dir: impl Into<PathBuf>) -> Self {
        Self::with_overrides(state_dir, BinaryOverrides::default())
    }

    pub fn with_overrides(state_dir: impl Into<PathBuf>, overrides: BinaryOverrides) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            overrides,
            state_dir: state_dir.into(),
        }
    }

    /// Creates and starts a session for the project, or returns the existing
    /// one when it is still running. A terminal entry is discarded and
    /// replaced by a fresh session under the same id.
    pub fn create_session(
        &self,
        project: &Project,
        profile: &Profile,
        rows: u16,
        cols: u16,
    ) -> RuntimeResult<Arc<PtySession>> {
        let mut sessions = self.sessions.lock().expect("session map lock poisoned");

        if let Some(existing) = sessions.get(&project.id) {
            if existing.status() == SessionStatus::Running {
                return Ok(Arc::clone(existing));
            }
            sessions.remove(&project.id);
        }

        if !std::fs::metadata(&project.path)
            .map(|meta| meta.is_dir())
            .unwrap_or(false)
        {
            return Err(RuntimeError::Configuration(format!(
                "project path not found: {}",
                project.path
            )));
        }

        let isolation_dir = self
            .state_dir
            .join("sessions")
            .join(project.id.as_str());
        std::fs::create_dir_all(&isolation_dir)?;

        // Clone before injecting so the caller's profile stays untouched.
        let mut profile = profile.clone();
        profile
            .env_vars
            .entry(SESSION_CONFIG_DIR_VAR.to_owned())
            .or_insert_with(|| isolation_dir.to_string_lossy().into_owned());

        let spec = resolve_launch(&profile, &project.path, &self.overrides, rows, cols)?;
        let session = Arc::new(PtySession::new(project.id.clone(), &spec)?);
        session.start(&spec)?;
        info!(project = %project.id, command = %spec.command_line, "session started");

        sessions.insert(project.id.clone(), Arc::clone(&session));
        Ok(session)
    }

    pub fn get_session(&self, id: &ProjectId) -> Option<Arc<PtySession>> {
        self.sessions
            .lock()
            .expect("session map lock poisoned")
            .get(id)
            .cloned()
    }

    pub fn list_sessions(&self) -> Vec<Arc<PtySession>> {
        self.sessions
            .lock()
            .expect("session map lock poisoned")
            .values()
            .cloned()
            .collect()
    }

    /// `Idle` when no session exists for the id.
    pub fn session_status(&self, id: &ProjectId) -> SessionStatus {
        self.get_session(id)
            .map(|session| session.status())
            .unwrap_or(SessionStatus::Idle)
    }

    /// Stops and removes the session. A no-op when the id is unknown.
    pub fn close_session(&self, id: &ProjectId) -> RuntimeResult<()> {
        let removed = self
            .sessions
            .lock()
            .expect("session map lock poisoned")
            .remove(id);
        match removed {
            Some(session) => session.stop(),
            None => Ok(()),
        }
    }

    /// Best-effort teardown of everything; the last error (if any) wins.
    pub fn close_all(&self) -> RuntimeResult<()> {
        let drained: Vec<_> = self
            .sessions
            .lock()
            .expect("session map lock poisoned")
            .drain()
            .collect();
        let mut last_error = None;
        for (_, session) in drained {
            if let Err(error) = session.stop() {
                last_error = Some(error);
            }
        }
        match last_error {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}
