use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use agentmux_core::ChainSessionId;

use crate::RuntimeResult;

/// Marker the chain protocol asks agents to prefix their reply with; the
/// extractor keys on its last occurrence to recover the conclusion.
pub const OUTPUT_MARKER: &str = ":::VIBE_OUTPUT:::";

/// Continuation line appended after the serialized chain.
pub const CHAIN_PROMPT_HEADER: &str = "Based on the above context, please continue.";

/// Output-format instruction appended last.
pub const CHAIN_PROMPT_INSTRUCTION: &str =
    "IMPORTANT: Please start your output with ':::VIBE_OUTPUT:::' so I can extract it reliably.";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainEntry {
    pub agent: String,
    pub timestamp: DateTime<Utc>,
    pub conclusion: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChainState {
    session_id: ChainSessionId,
    created_at: DateTime<Utc>,
    task: String,
    chain: Vec<ChainEntry>,
}

/// Append-only log of per-agent conclusions for one chain session, flushed
/// to `<dir>/<session-id>.json` on every append.
pub struct ChainContext {
    state: Mutex<ChainState>,
    path: PathBuf,
}

impl ChainContext {
    pub fn new(
        id: ChainSessionId,
        task: impl Into<String>,
        dir: impl AsRef<Path>,
    ) -> RuntimeResult<Self> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;
        let path = dir.join(format!("{}.json", id.as_str()));
        Ok(Self {
            state: Mutex::new(ChainState {
                session_id: id,
                created_at: Utc::now(),
                task: task.into(),
                chain: Vec::new(),
            }),
            path,
        })
    }

    pub fn load(path: impl Into<PathBuf>) -> RuntimeResult<Self> {
        let path = path.into();
        let data = std::fs::read_to_string(&path)?;
        let state: ChainState = serde_json::from_str(&data)
            .map_err(|error| std::io::Error::new(std::io::ErrorKind::InvalidData, error))?;
        Ok(Self {
            state: Mutex::new(state),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn session_id(&self) -> ChainSessionId {
        self.state
            .lock()
            .expect("chain lock poisoned")
            .session_id
            .clone()
    }

    pub fn task(&self) -> String {
        self.state.lock().expect("chain lock poisoned").task.clone()
    }

    pub fn entries(&self) -> Vec<ChainEntry> {
        self.state
            .lock()
            .expect("chain lock poisoned")
            .chain
            .clone()
    }

    pub fn save(&self) -> RuntimeResult<()> {
        let serialized = {
            let state = self.state.lock().expect("chain lock poisoned");
            serde_json::to_string_pretty(&*state)
                .map_err(|error| std::io::Error::new(std::io::ErrorKind::InvalidData, error))?
        };
        std::fs::write(&self.path, serialized)?;
        Ok(())
    }

    /// Pushes a conclusion and flushes the whole log to disk. Entries are
    /// never mutated in place.
    pub fn append(&self, agent: impl Into<String>, conclusion: impl Into<String>) -> RuntimeResult<()> {
        {
            let mut state = self.state.lock().expect("chain lock poisoned");
            state.chain.push(ChainEntry {
                agent: agent.into(),
                timestamp: Utc::now(),
                conclusion: conclusion.into(),
            });
        }
        self.save()
    }

    /// Text of the most recent conclusion, or empty.
    pub fn latest(&self) -> String {
        self.state
            .lock()
            .expect("chain lock poisoned")
            .chain
            .last()
            .map(|entry| entry.conclusion.clone())
            .unwrap_or_default()
    }

    /// Serializes the task and every conclusion for injection into the next
    /// agent's prompt, closing with the continuation header and the output
    /// marker instruction.
    pub fn format_for_injection(&self) -> String {
        let state = self.state.lock().expect("chain lock poisoned");
        let mut out = String::from("【Chain Context】\n");
        out.push_str("Task: ");
        out.push_str(&state.task);
        out.push_str("\n\n");
        for entry in &state.chain {
            out.push_str("--- Agent: ");
            out.push_str(&entry.agent);
            out.push_str(" ---\n");
            out.push_str(&entry.conclusion);
            out.push_str("\n\n");
        }
        out.push_str(CHAIN_PROMPT_HEADER);
        out.push('\n');
        out.push_str(CHAIN_PROMPT_INSTRUCTION);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_persists_entries_in_call_order() {
        let dir = tempfile::tempdir().expect("temp dir");
        let chain = ChainContext::new(ChainSessionId::new("1700000000"), "draft", dir.path())
            .expect("create chain");

        chain.append("A", "draft v1").expect("first append");
        chain.append("B", "review notes").expect("second append");
        chain.append("A", "draft v2").expect("third append");

        let reloaded = ChainContext::load(dir.path().join("1700000000.json")).expect("reload");
        let entries = reloaded.entries();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].agent, "A");
        assert_eq!(entries[0].conclusion, "draft v1");
        assert_eq!(entries[1].agent, "B");
        assert_eq!(entries[2].conclusion, "draft v2");
        assert_eq!(reloaded.latest(), "draft v2");
    }

    #[test]
    fn latest_is_empty_for_a_fresh_chain() {
        let dir = tempfile::tempdir().expect("temp dir");
        let chain = ChainContext::new(ChainSessionId::new("x"), "task", dir.path())
            .expect("create chain");
        assert_eq!(chain.latest(), "");
    }

    #[test]
    fn injection_format_carries_task_entries_and_marker_instruction() {
        let dir = tempfile::tempdir().expect("temp dir");
        let chain = ChainContext::new(ChainSessionId::new("x"), "draft", dir.path())
            .expect("create chain");
        chain.append("A", "draft v1").expect("append");

        let formatted = chain.format_for_injection();
        assert!(formatted.contains("Task: draft"));
        assert!(formatted.contains("--- Agent: A ---"));
        assert!(formatted.contains("draft v1"));
        assert!(formatted.contains(CHAIN_PROMPT_HEADER));
        assert!(formatted.contains(OUTPUT_MARKER));
    }
}
