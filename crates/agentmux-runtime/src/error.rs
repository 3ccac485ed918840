use thiserror::Error;

pub type RuntimeResult<T> = Result<T, RuntimeError>;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("command is empty")]
    CommandEmpty,
    #[error("command not found: {0}")]
    CommandNotFound(String),
    #[error("unterminated quote in command")]
    UnterminatedQuote,
    #[error("unfinished escape sequence in command")]
    UnfinishedEscape,
    #[error("pty error: {0}")]
    Pty(String),
    #[error("start failed: {command}: {reason}")]
    ChildStart { command: String, reason: String },
    #[error("session not running: {0}")]
    SessionNotRunning(String),
    #[error("session not found: {0}")]
    SessionNotFound(String),
    #[error("session output stream is closed: {0}")]
    OutputClosed(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_wording_is_stable() {
        assert_eq!(
            RuntimeError::CommandNotFound("clod".to_owned()).to_string(),
            "command not found: clod"
        );
        assert_eq!(
            RuntimeError::ChildStart {
                command: "claude --resume".to_owned(),
                reason: "no such file".to_owned(),
            }
            .to_string(),
            "start failed: claude --resume: no such file"
        );
    }
}
