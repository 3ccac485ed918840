//! Dispatch layer and cooperative UI loop: a single-threaded reducer over a
//! tagged event stream, fed by per-session output pumps and the input
//! thread, with all I/O expressed as effects executed between reductions.

pub mod app;
pub mod dispatch;
pub mod events;
pub mod ime;
pub mod keymap;
pub mod pump;
pub mod roles;
pub mod turn;
pub mod ui;
pub mod watcher;

pub use app::{App, InputMode};
pub use dispatch::DispatchMode;
pub use events::{AppEvent, Effect};
