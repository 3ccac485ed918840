//! Composition buffering for input methods.
//!
//! Logographic-script IMEs first echo lowercase ASCII preedit, then commit a
//! non-ASCII string; forwarding the preedit would corrupt the composition.
//! Likely preedit is staged here and either discarded (on commit), flushed
//! ahead of other input, or flushed by a short timer.

use std::time::Duration;

use agentmux_core::ProjectId;

pub const FLUSH_TIMEOUT: Duration = Duration::from_millis(100);

#[derive(Debug, PartialEq, Eq)]
pub enum ImeAction {
    /// Input was staged; the caller should (re)arm the flush timer.
    Staged,
    /// Send these bytes now.
    Emit(Vec<u8>),
    /// Send the staged preedit first, then the new bytes.
    FlushThenEmit { staged: Vec<u8>, emit: Vec<u8> },
}

#[derive(Debug, Default)]
pub struct ImeBuffer {
    staged: String,
    target: Option<ProjectId>,
}

impl ImeBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebinds the buffer to a session; switching target drops any staged
    /// preedit, which belonged to the previous pane.
    pub fn set_target(&mut self, id: &ProjectId) {
        if self.target.as_ref() != Some(id) {
            self.staged.clear();
            self.target = Some(id.clone());
        }
    }

    pub fn target(&self) -> Option<&ProjectId> {
        self.target.as_ref()
    }

    pub fn has_staged(&self) -> bool {
        !self.staged.is_empty()
    }

    /// Classifies typed text. Runs of lowercase ASCII letters are staged as
    /// likely preedit; a non-ASCII commit discards the stage; anything else
    /// flushes the stage first.
    pub fn process_text(&mut self, text: &str) -> ImeAction {
        if text.is_empty() {
            return ImeAction::Emit(Vec::new());
        }

        if text.chars().any(|c| !c.is_ascii()) {
            // The IME committed; its preedit was never real input.
            self.staged.clear();
            return ImeAction::Emit(text.as_bytes().to_vec());
        }

        if text.chars().all(|c| c.is_ascii_lowercase() && c.is_ascii_alphabetic()) {
            self.staged.push_str(text);
            return ImeAction::Staged;
        }

        if !self.staged.is_empty() {
            let staged = std::mem::take(&mut self.staged).into_bytes();
            return ImeAction::FlushThenEmit {
                staged,
                emit: text.as_bytes().to_vec(),
            };
        }
        ImeAction::Emit(text.as_bytes().to_vec())
    }

    /// Takes the staged preedit, if any. Used on the flush timer and before
    /// non-rune keys.
    pub fn flush(&mut self) -> Option<Vec<u8>> {
        if self.staged.is_empty() {
            return None;
        }
        Some(std::mem::take(&mut self.staged).into_bytes())
    }

    pub fn clear(&mut self) {
        self.staged.clear();
    }
}
