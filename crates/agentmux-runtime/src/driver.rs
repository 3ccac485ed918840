use std::path::{Path, PathBuf};

use agentmux_core::{DriverKind, Profile};

use crate::{RuntimeError, RuntimeResult};

/// Configured absolute paths for the well-known agent binaries. When set,
/// they take precedence over PATH lookup for the bare names `claude` and
/// `codex`.
#[derive(Debug, Clone, Default)]
pub struct BinaryOverrides {
    pub claude_path: Option<String>,
    pub codex_path: Option<String>,
}

/// A fully resolved, environment-injected launch command pinned to a
/// project directory. Resolution is deterministic: the same profile and
/// overrides always produce an identical spec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    pub env: Vec<(String, String)>,
    /// Reconstructed command line, used in launch-failure messages.
    pub command_line: String,
    pub rows: u16,
    pub cols: u16,
}

/// Builds the launch spec for a profile. All driver kinds share the same
/// procedure; they differ only in the fallback command for an empty command
/// string.
pub fn resolve_launch(
    profile: &Profile,
    workdir: impl Into<PathBuf>,
    overrides: &BinaryOverrides,
    rows: u16,
    cols: u16,
) -> RuntimeResult<LaunchSpec> {
    let fallback = match profile.driver {
        DriverKind::Ccr => "ccr",
        DriverKind::Native | DriverKind::Custom => "claude",
    };
    let command_line = {
        let trimmed = profile.command.trim();
        if trimmed.is_empty() {
            fallback.to_owned()
        } else {
            trimmed.to_owned()
        }
    };

    let mut parts = split_command_line(&command_line)?;
    if parts.is_empty() {
        return Err(RuntimeError::CommandEmpty);
    }
    let mut program = parts.remove(0);

    // Configured overrides win for the well-known binaries.
    match program.as_str() {
        "claude" => {
            if let Some(path) = &overrides.claude_path {
                program = path.clone();
            }
        }
        "codex" => {
            if let Some(path) = &overrides.codex_path {
                program = path.clone();
            }
        }
        _ => {}
    }

    let program = resolve_executable(&program)
        .ok_or_else(|| RuntimeError::CommandNotFound(program.clone()))?;

    let mut env: Vec<(String, String)> = std::env::vars().collect();
    for (key, value) in &profile.env_vars {
        overlay_env(&mut env, key, value);
    }
    if !profile.env_vars.contains_key("TERM") {
        overlay_env(&mut env, "TERM", "xterm-256color");
        overlay_env(&mut env, "COLORTERM", "truecolor");
    }
    if !env.iter().any(|(key, _)| key == "NODE_OPTIONS") {
        env.push(("NODE_OPTIONS".to_owned(), "--max-old-space-size=4096".to_owned()));
    }

    Ok(LaunchSpec {
        program,
        args: parts,
        cwd: workdir.into(),
        env,
        command_line,
        rows,
        cols,
    })
}

fn overlay_env(env: &mut Vec<(String, String)>, key: &str, value: &str) {
    if let Some(entry) = env.iter_mut().find(|(existing, _)| existing == key) {
        entry.1 = value.to_owned();
    } else {
        env.push((key.to_owned(), value.to_owned()));
    }
}

fn resolve_executable(command: &str) -> Option<String> {
    if command.is_empty() {
        return None;
    }
    if Path::new(command).is_absolute() || command.contains(std::path::MAIN_SEPARATOR) {
        return std::fs::metadata(command)
            .ok()
            .map(|_| command.to_owned());
    }
    which::which(command)
        .ok()
        .map(|path| path.to_string_lossy().into_owned())
}

/// Shell-like argv splitting: double and single quotes group words,
/// backslash escapes the next character. Mirrors the quoting users expect
/// from a profile's command string without invoking a shell.
pub fn split_command_line(input: &str) -> RuntimeResult<Vec<String>> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut escaped = false;

    for ch in input.chars() {
        if escaped {
            current.push(ch);
            escaped = false;
            continue;
        }
        match ch {
            '\\' => escaped = true,
            _ if quote.is_some() => {
                if Some(ch) == quote {
                    quote = None;
                } else {
                    current.push(ch);
                }
            }
            '"' | '\'' => quote = Some(ch),
            ' ' | '\t' | '\n' => {
                if !current.is_empty() {
                    args.push(std::mem::take(&mut current));
                }
            }
            _ => current.push(ch),
        }
    }

    if escaped {
        return Err(RuntimeError::UnfinishedEscape);
    }
    if quote.is_some() {
        return Err(RuntimeError::UnterminatedQuote);
    }
    if !current.is_empty() {
        args.push(current);
    }
    Ok(args)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile_with_command(command: &str) -> Profile {
        let mut profile = Profile::new("test");
        profile.command = command.to_owned();
        profile
    }

    #[test]
    fn splits_plain_words() {
        let args = split_command_line("claude --resume last").expect("split");
        assert_eq!(args, ["claude", "--resume", "last"]);
    }

    #[test]
    fn honors_double_and_single_quotes() {
        let args = split_command_line(r#"run "a b" 'c d' e"#).expect("split");
        assert_eq!(args, ["run", "a b", "c d", "e"]);
    }

    #[test]
    fn backslash_escapes_the_next_character() {
        let args = split_command_line(r"echo a\ b").expect("split");
        assert_eq!(args, ["echo", "a b"]);
    }

    #[test]
    fn rejects_unterminated_quote() {
        let error = split_command_line("echo \"open").expect_err("should fail");
        assert!(matches!(error, RuntimeError::UnterminatedQuote));
    }

    #[test]
    fn rejects_unfinished_escape() {
        let error = split_command_line("echo tail\\").expect_err("should fail");
        assert!(matches!(error, RuntimeError::UnfinishedEscape));
    }

    #[test]
    fn resolves_a_path_binary_with_default_env() {
        let profile = profile_with_command("sh -c true");
        let spec = resolve_launch(&profile, "/tmp", &BinaryOverrides::default(), 24, 80)
            .expect("resolve sh");

        assert!(spec.program.ends_with("sh"));
        assert_eq!(spec.args, ["-c", "true"]);
        assert_eq!(spec.cwd, PathBuf::from("/tmp"));
        assert_eq!(spec.command_line, "sh -c true");
        assert!(spec
            .env
            .iter()
            .any(|(k, v)| k == "TERM" && v == "xterm-256color"));
        assert!(spec
            .env
            .iter()
            .any(|(k, v)| k == "COLORTERM" && v == "truecolor"));
        assert!(spec.env.iter().any(|(k, _)| k == "NODE_OPTIONS"));
    }

    #[test]
    fn profile_overlay_wins_over_process_env_and_suppresses_term_default() {
        let mut profile = profile_with_command("sh");
        profile.set_env_var("TERM", "vt220");
        profile.set_env_var("AGENT_ROLE", "reviewer");

        let spec = resolve_launch(&profile, "/tmp", &BinaryOverrides::default(), 24, 80)
            .expect("resolve sh");

        assert!(spec.env.iter().any(|(k, v)| k == "TERM" && v == "vt220"));
        assert!(spec
            .env
            .iter()
            .any(|(k, v)| k == "AGENT_ROLE" && v == "reviewer"));
        assert!(!spec.env.iter().any(|(k, v)| k == "TERM" && v == "xterm-256color"));
    }

    #[test]
    fn missing_command_is_reported_by_name() {
        let profile = profile_with_command("agentmux-no-such-binary --x");
        let error = resolve_launch(&profile, "/tmp", &BinaryOverrides::default(), 24, 80)
            .expect_err("should fail");

        assert!(matches!(error, RuntimeError::CommandNotFound(name) if name == "agentmux-no-such-binary"));
    }

    #[test]
    fn claude_override_is_preferred_for_the_bare_name() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let fake = dir.path().join("claude");
        std::fs::write(&fake, "#!/bin/sh\n").expect("write fake binary");

        let overrides = BinaryOverrides {
            claude_path: Some(fake.to_string_lossy().into_owned()),
            codex_path: None,
        };
        let profile = profile_with_command("claude --continue");
        let spec = resolve_launch(&profile, "/tmp", &overrides, 24, 80).expect("resolve claude");

        assert_eq!(spec.program, fake.to_string_lossy());
        assert_eq!(spec.args, ["--continue"]);
    }

    #[test]
    fn empty_ccr_profile_falls_back_to_ccr_name() {
        let mut profile = profile_with_command("   ");
        profile.driver = DriverKind::Ccr;
        match resolve_launch(&profile, "/tmp", &BinaryOverrides::default(), 24, 80) {
            Ok(spec) => assert!(spec.program.ends_with("ccr")),
            Err(RuntimeError::CommandNotFound(name)) => assert_eq!(name, "ccr"),
            Err(other) => panic!("unexpected resolution error: {other}"),
        }
    }

    #[test]
    fn resolution_is_deterministic() {
        let mut profile = profile_with_command("sh -x");
        profile.set_env_var("B_VAR", "2");
        profile.set_env_var("A_VAR", "1");

        let first = resolve_launch(&profile, "/tmp", &BinaryOverrides::default(), 24, 80)
            .expect("first resolve");
        let second = resolve_launch(&profile, "/tmp", &BinaryOverrides::default(), 24, 80)
            .expect("second resolve");
        assert_eq!(first, second);
    }
}
