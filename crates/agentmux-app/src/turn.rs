//! Turn sequencing for chain mode: a parsed sequence of session ids, a
//! cursor, and the pause/advance/timeout state machine. The actual prompt
//! writes are effects performed by the runtime loop.

use std::time::Duration;

use agentmux_core::ProjectId;
use agentmux_runtime::parse_turn_sequence;

/// Hard ceiling for one agent's turn before a warning surfaces.
pub const TURN_TIMEOUT: Duration = Duration::from_secs(120);
/// Delay between pasting the turn prompt and the submitting carriage
/// return, so the agent's input box has settled.
pub const SUBMIT_DELAY: Duration = Duration::from_millis(200);

#[derive(Debug, PartialEq, Eq)]
pub enum Advance {
    /// The cursor moved; this agent is up next.
    Turn(ProjectId),
    /// Past the end; auto-advance has been cleared.
    Completed,
    /// No sequence configured.
    Empty,
}

#[derive(Debug, Default)]
pub struct TurnScheduler {
    sequence: Vec<ProjectId>,
    cursor: usize,
    auto_advance: bool,
    /// Monotonic turn counter; timeout events carry it so a stale timer
    /// cannot warn about a turn that already ended.
    seq_counter: u64,
}

impl TurnScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the sequence from an expression over grid indices and resets
    /// the cursor, paused.
    pub fn init(&mut self, expression: &str, grid_ids: &[ProjectId]) {
        self.sequence = parse_turn_sequence(expression, grid_ids);
        self.cursor = 0;
        self.auto_advance = false;
    }

    pub fn is_configured(&self) -> bool {
        !self.sequence.is_empty()
    }

    pub fn auto_advance(&self) -> bool {
        self.auto_advance
    }

    pub fn current(&self) -> Option<&ProjectId> {
        self.sequence.get(self.cursor)
    }

    /// Toggles auto-advance. Enabling with the cursor in range yields the
    /// agent whose turn should be performed now.
    pub fn toggle(&mut self) -> Option<ProjectId> {
        self.auto_advance = !self.auto_advance;
        if self.auto_advance {
            self.current().cloned()
        } else {
            None
        }
    }

    /// Moves the cursor forward one step.
    pub fn advance(&mut self) -> Advance {
        if self.sequence.is_empty() {
            return Advance::Empty;
        }
        self.cursor += 1;
        if self.cursor >= self.sequence.len() {
            self.auto_advance = false;
            return Advance::Completed;
        }
        Advance::Turn(self.sequence[self.cursor].clone())
    }

    /// Marks the current turn as started and returns its timeout token.
    pub fn begin_turn(&mut self) -> u64 {
        self.seq_counter += 1;
        self.seq_counter
    }

    /// Whether a timeout event still refers to the in-flight turn.
    pub fn is_current_turn(&self, seq: u64) -> bool {
        self.seq_counter == seq
    }

    /// Status-bar fragment, 1-based.
    pub fn status_line(&self) -> String {
        if self.sequence.is_empty() {
            return String::new();
        }
        let current = (self.cursor + 1).min(self.sequence.len());
        let next = self
            .current()
            .map(|id| id.as_str())
            .unwrap_or("-");
        format!(
            "SEQ {current}/{total} (next: {next}, auto: {auto})",
            total = self.sequence.len(),
            auto = if self.auto_advance { "on" } else { "off" },
        )
    }

    /// The prompt pasted into the target pane when its turn begins. The
    /// chain context rendering is appended by the effect executor so it
    /// reflects any conclusion appended in the same reduction.
    pub fn turn_banner(chain_file: &str) -> String {
        format!("[SYSTEM] It is your turn. The shared chain file is {chain_file}.\n\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(count: usize) -> Vec<ProjectId> {
        (0..count)
            .map(|i| ProjectId::new(format!("id{i}")))
            .collect()
    }

    #[test]
    fn init_parses_and_starts_paused() {
        let grid = ids(3);
        let mut scheduler = TurnScheduler::new();
        scheduler.init("0,2", &grid);

        assert!(scheduler.is_configured());
        assert!(!scheduler.auto_advance());
        assert_eq!(scheduler.current(), Some(&grid[0]));
    }

    #[test]
    fn advancing_past_the_end_completes_and_pauses() {
        let grid = ids(2);
        let mut scheduler = TurnScheduler::new();
        scheduler.init("0,1", &grid);
        scheduler.toggle();

        assert_eq!(scheduler.advance(), Advance::Turn(grid[1].clone()));
        assert_eq!(scheduler.advance(), Advance::Completed);
        assert!(!scheduler.auto_advance());
        assert_eq!(scheduler.advance(), Advance::Completed);
    }

    #[test]
    fn toggle_on_returns_the_current_turn() {
        let grid = ids(2);
        let mut scheduler = TurnScheduler::new();
        scheduler.init("", &grid);

        assert_eq!(scheduler.toggle(), Some(grid[0].clone()));
        assert_eq!(scheduler.toggle(), None);
    }

    #[test]
    fn stale_timeouts_are_detectable() {
        let grid = ids(2);
        let mut scheduler = TurnScheduler::new();
        scheduler.init("0,1", &grid);

        let first = scheduler.begin_turn();
        assert!(scheduler.is_current_turn(first));
        let second = scheduler.begin_turn();
        assert!(!scheduler.is_current_turn(first));
        assert!(scheduler.is_current_turn(second));
    }

    #[test]
    fn empty_scheduler_reports_empty_advance() {
        let mut scheduler = TurnScheduler::new();
        assert_eq!(scheduler.advance(), Advance::Empty);
        assert_eq!(scheduler.status_line(), "");
    }
}
