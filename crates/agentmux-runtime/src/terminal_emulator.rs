use serde::{Deserialize, Serialize};

use crate::{RuntimeError, RuntimeResult};

/// Rendered view of a session's screen at one point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminalSnapshot {
    pub cols: u16,
    pub rows: u16,
    pub cursor_col: u16,
    pub cursor_row: u16,
    pub cursor_visible: bool,
    pub lines: Vec<String>,
}

/// Byte-stream to cell-grid translation for one session.
pub struct TerminalEmulator {
    parser: vt100::Parser,
}

impl TerminalEmulator {
    pub fn new(rows: u16, cols: u16, scrollback: usize) -> RuntimeResult<Self> {
        if rows == 0 || cols == 0 {
            return Err(RuntimeError::Configuration(
                "terminal emulator requires non-zero rows and columns".to_owned(),
            ));
        }
        Ok(Self {
            parser: vt100::Parser::new(rows, cols, scrollback),
        })
    }

    pub fn process(&mut self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        self.parser.process(bytes);
    }

    pub fn resize(&mut self, rows: u16, cols: u16) -> RuntimeResult<()> {
        if rows == 0 || cols == 0 {
            return Err(RuntimeError::Configuration(
                "terminal emulator resize requires non-zero rows and columns".to_owned(),
            ));
        }
        self.parser.set_size(rows, cols);
        Ok(())
    }

    pub fn snapshot(&self) -> TerminalSnapshot {
        let screen = self.parser.screen();
        let (rows, cols) = screen.size();
        let (cursor_row, cursor_col) = screen.cursor_position();
        TerminalSnapshot {
            cols,
            rows,
            cursor_col,
            cursor_row,
            cursor_visible: !screen.hide_cursor(),
            lines: screen.rows(0, cols).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(snapshot: &TerminalSnapshot, row: usize) -> &str {
        snapshot
            .lines
            .get(row)
            .map_or("", String::as_str)
            .trim_end()
    }

    #[test]
    fn renders_cursor_movement_and_overwrite() {
        let mut emulator = TerminalEmulator::new(4, 20, 64).expect("create emulator");
        emulator.process(b"hello\x1b[2DXY");

        let snapshot = emulator.snapshot();
        assert_eq!(line(&snapshot, 0), "helXY");
        assert_eq!(snapshot.cursor_row, 0);
        assert_eq!(snapshot.cursor_col, 5);
    }

    #[test]
    fn tracks_alternate_screen_switches() {
        let mut emulator = TerminalEmulator::new(4, 20, 64).expect("create emulator");
        emulator.process(b"main\r\nline2");
        emulator.process(b"\x1b[?1049halt");

        assert_eq!(line(&emulator.snapshot(), 0), "alt");

        emulator.process(b"\x1b[?1049l");
        let primary = emulator.snapshot();
        assert_eq!(line(&primary, 0), "main");
        assert_eq!(line(&primary, 1), "line2");
    }

    #[test]
    fn reports_cursor_visibility() {
        let mut emulator = TerminalEmulator::new(4, 20, 0).expect("create emulator");
        assert!(emulator.snapshot().cursor_visible);

        emulator.process(b"\x1b[?25l");
        assert!(!emulator.snapshot().cursor_visible);
    }

    #[test]
    fn rejects_zero_dimensions() {
        assert!(TerminalEmulator::new(0, 80, 0).is_err());
        let mut emulator = TerminalEmulator::new(24, 80, 0).expect("create emulator");
        assert!(emulator.resize(10, 0).is_err());
    }
}
