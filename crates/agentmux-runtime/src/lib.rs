//! Session engine: PTY-backed agent processes, their supervision, history,
//! and the chain protocol that sequences turns across them.

mod chain;
mod driver;
mod engine;
mod error;
mod extractor;
mod ring_buffer;
mod session;
mod terminal_emulator;
mod turn;

pub use chain::{
    ChainContext, ChainEntry, CHAIN_PROMPT_HEADER, CHAIN_PROMPT_INSTRUCTION, OUTPUT_MARKER,
};
pub use driver::{resolve_launch, split_command_line, BinaryOverrides, LaunchSpec};
pub use engine::Engine;
pub use error::{RuntimeError, RuntimeResult};
pub use extractor::{clean_output, extract_conclusion, strip_ansi};
pub use ring_buffer::RingBuffer;
pub use session::{OutputSubscription, PtySession};
pub use terminal_emulator::{TerminalEmulator, TerminalSnapshot};
pub use turn::parse_turn_sequence;
