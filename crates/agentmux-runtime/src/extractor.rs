//! Conclusion extraction from captured terminal output.
//!
//! Strategy is tiered: the explicit output marker wins when present, frame
//! isolation handles TUI tools that never print it, and generic noise
//! filtering runs either way. Failure mode is "returns more text than
//! needed", never garbled bytes.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;

use crate::chain::{CHAIN_PROMPT_HEADER, CHAIN_PROMPT_INSTRUCTION, OUTPUT_MARKER};

// Frame-isolation thresholds, chosen empirically; tunable, not contractual.
const SEPARATOR_MIN_LEN: usize = 10;
const SEPARATOR_MIN_COUNT: usize = 3;
const BLOCK_MIN_LEN: usize = 20;
const MIN_LINES_FOR_ISOLATION: usize = 10;

static CSI: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\x1b\[[0-9;?]*[a-zA-Z]").expect("valid csi regex"));
static OSC: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\x1b\][^\x07\x1b]*(?:\x07|\x1b\\)").expect("valid osc regex"));
static DCS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\x1b[PX^_][^\x1b]*\x1b\\").expect("valid dcs regex"));
static SINGLE_ESC: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\x1b[()#%][A-Za-z0-9]?").expect("valid single-escape regex"));
static MOUSE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\x1b\[M...|\x1b\[<[0-9;]*[mM]").expect("valid mouse regex"));
static BRAILLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\u{2800}-\u{28FF}]").expect("valid braille regex"));

static PERCENT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d+%").expect("valid % regex"));
static TIME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d+:\d+:\d+|\d+:\d+|\d+s|\d+ms").expect("valid time regex"));

static NOISE_PREFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(tips|hint|usage|入门|提示)[:：]").expect("valid tips regex")
});
static KEY_HINT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(ctrl|alt|esc)\s*\+").expect("valid key-hint regex"));
static CONTEXT_INFO: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(loaded|context|已加载)[:：]").expect("valid context regex")
});

static NOISE_LINES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        // Prompt and input areas of common agent CLIs.
        r"(?i)^>\s*(输入您的消息|Type your message|Enter your)",
        r"(?i)^\?\s*Select",
        // Status indicators and spinners.
        r"(?i)(Thinking\.{0,3}|Smart mode|esc to cancel)",
        r"(?i)(loading\.{0,3}\d*s?\)?)",
        r"[\u{2800}-\u{28FF}]",
        // Horizontal rules and empty box-drawing skeletons.
        r"^[\s]*[─═\-_]{5,}[\s]*$",
        r"^\s*>\s*$",
        r"^[\s│┃|]*$",
        // Status-bar fragments and key hints.
        r"(?i)sandbox\s*\(\d+%",
        r"(?i).*\s+to\s+(toggle|select|switch|cancel)\)?\s*$",
        r"^\.{3}.*[\\/].*",
        r"(?i)context\s+left\s+\d+",
        r"(?i)^\s*-\s*\d+\s*file\(s\)\s*$",
    ]
    .into_iter()
    .map(|pattern| Regex::new(pattern).expect("valid noise regex"))
    .collect()
});

/// Removes ANSI escape sequences and control characters, keeping only
/// newline, carriage return, and tab among the controls.
pub fn strip_ansi(input: &str) -> String {
    let mut clean = CSI.replace_all(input, "").into_owned();
    clean = OSC.replace_all(&clean, "").into_owned();
    clean = DCS.replace_all(&clean, "").into_owned();
    clean = SINGLE_ESC.replace_all(&clean, "").into_owned();
    clean = MOUSE.replace_all(&clean, "").into_owned();
    clean
        .chars()
        .filter(|&c| c == '\n' || c == '\t' || c == '\r' || (c != '\u{1b}' && !c.is_control()))
        .collect()
}

/// `strip_ansi` plus spinner removal and outer trimming; the canonical
/// "clean text" both extraction strategies operate on.
pub fn clean_output(input: &str) -> String {
    let stripped = strip_ansi(input);
    BRAILLE.replace_all(&stripped, "").trim().to_owned()
}

/// Produces the agent's conclusion from accumulated stdout (a ring-buffer
/// snapshot is sufficient input).
pub fn extract_conclusion(input: &str) -> String {
    let clean = clean_output(input);

    let content = match after_last_marker(&clean) {
        Some(suffix) => suffix.to_owned(),
        None => isolate_final_frame(&clean),
    };

    let content = remove_tui_noise(&content);
    let lines: Vec<&str> = content.lines().collect();
    let filtered = filter_noise_lines(&lines);
    deduplicate_consecutive(&filtered).join("\n")
}

/// Suffix after the *last* occurrence of the output marker, if present.
fn after_last_marker(input: &str) -> Option<&str> {
    input
        .rfind(OUTPUT_MARKER)
        .map(|idx| input[idx + OUTPUT_MARKER.len()..].trim())
}

/// Detects the recurring status-bar/header line of a TUI recording and
/// treats it as a frame separator, returning the last substantial block.
fn isolate_final_frame(input: &str) -> String {
    let lines: Vec<&str> = input.lines().collect();
    if lines.len() < MIN_LINES_FOR_ISOLATION {
        return input.to_owned();
    }

    let mut counts: HashMap<&str, usize> = HashMap::new();
    for line in &lines {
        let trimmed = line.trim();
        if trimmed.len() > SEPARATOR_MIN_LEN {
            *counts.entry(trimmed).or_default() += 1;
        }
    }

    let mut separator: Option<&str> = None;
    let mut best = 0;
    for (line, count) in counts {
        if count >= SEPARATOR_MIN_COUNT && count > best {
            best = count;
            separator = Some(line);
        }
    }
    let Some(separator) = separator else {
        return input.to_owned();
    };

    let mut blocks: Vec<String> = Vec::new();
    let mut current = String::new();
    for line in &lines {
        if line.trim() == separator {
            if !current.is_empty() {
                blocks.push(std::mem::take(&mut current));
            }
            continue;
        }
        current.push_str(line);
        current.push('\n');
    }
    if !current.is_empty() {
        blocks.push(current);
    }

    for block in blocks.iter().rev() {
        let trimmed = block.trim();
        if trimmed.len() > BLOCK_MIN_LEN {
            return trimmed.to_owned();
        }
    }
    input.to_owned()
}

fn remove_tui_noise(input: &str) -> String {
    input
        .lines()
        .filter(|line| {
            let trimmed = line.trim();
            if NOISE_PREFIX.is_match(trimmed)
                || KEY_HINT.is_match(trimmed)
                || CONTEXT_INFO.is_match(trimmed)
            {
                return false;
            }
            !is_mostly_border(trimmed)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn is_mostly_border(line: &str) -> bool {
    if line.is_empty() {
        return false;
    }
    let total = line.chars().count();
    let border = line
        .chars()
        .filter(|c| "─═-_│┃║╔╗╚╝".contains(*c))
        .count();
    border as f64 / total as f64 > 0.8
}

fn filter_noise_lines<'a>(lines: &[&'a str]) -> Vec<&'a str> {
    lines
        .iter()
        .copied()
        .filter(|line| {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                return false;
            }
            if trimmed.starts_with(CHAIN_PROMPT_HEADER)
                || trimmed.starts_with(CHAIN_PROMPT_INSTRUCTION)
            {
                return false;
            }
            !NOISE_LINES.iter().any(|pattern| pattern.is_match(trimmed))
        })
        .collect()
}

/// Replaces percentages and times with placeholders so lines differing only
/// in ticking values compare as equal.
fn normalize_dynamic_content(line: &str) -> String {
    let normalized = PERCENT.replace_all(line, "<PCT>");
    TIME.replace_all(&normalized, "<TIME>").into_owned()
}

fn deduplicate_consecutive<'a>(lines: &[&'a str]) -> Vec<&'a str> {
    let mut result: Vec<&str> = Vec::with_capacity(lines.len());
    for line in lines {
        let keep = match result.last() {
            Some(previous) => {
                normalize_dynamic_content(previous.trim())
                    != normalize_dynamic_content(line.trim())
            }
            None => true,
        };
        if keep {
            result.push(line);
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_csi_and_osc_sequences() {
        let input = "\x1b[31mred\x1b[0m \x1b]0;title\x07plain";
        assert_eq!(strip_ansi(input), "red plain");
    }

    #[test]
    fn strips_dcs_and_mouse_tracking() {
        let input = "\x1bPq#payload\x1b\\text\x1b[<35;10;4Mmore";
        assert_eq!(strip_ansi(input), "textmore");
    }

    #[test]
    fn drops_control_chars_except_whitespace() {
        let input = "a\x01b\tc\nd\re";
        assert_eq!(strip_ansi(input), "ab\tc\nd\re");
    }

    #[test]
    fn clean_output_removes_braille_spinners() {
        assert_eq!(clean_output("⠋⠙⠹ working"), "working");
    }

    #[test]
    fn marker_suffix_wins_over_everything_else() {
        let input = format!(
            "{sep}\nframe one\n{sep}\nframe two\n{marker}\ndraft v1\n",
            sep = "============== status ==============",
            marker = OUTPUT_MARKER
        );
        assert_eq!(extract_conclusion(&input), "draft v1");
    }

    #[test]
    fn last_marker_occurrence_is_used() {
        let input = format!("{m}\nold answer\nnoise\n{m}\nfinal answer", m = OUTPUT_MARKER);
        assert_eq!(extract_conclusion(&input), "final answer");
    }

    #[test]
    fn marker_inside_ansi_decorated_stream_is_found() {
        let input = format!("\x1b[2J\x1b[1;1H{}\n\x1b[32mdone deal\x1b[0m\n", OUTPUT_MARKER);
        assert_eq!(extract_conclusion(&input), "done deal");
    }

    #[test]
    fn frame_isolation_returns_the_last_substantial_block() {
        let separator = "tool v1.0 — session status bar";
        let mut input = String::new();
        for frame in [
            "first frame body text here",
            "second frame body text here",
            "third frame body text here",
            "fourth frame body text here",
        ] {
            input.push_str(separator);
            input.push('\n');
            input.push_str(frame);
            input.push('\n');
        }
        input.push_str(separator);
        input.push('\n');
        input.push_str("the final frame carries the real conclusion\n");
        input.push_str(separator);
        input.push('\n');

        assert_eq!(
            extract_conclusion(&input),
            "the final frame carries the real conclusion"
        );
    }

    #[test]
    fn short_output_passes_through_isolation_untouched() {
        let input = "just two lines\nof plain output";
        assert_eq!(extract_conclusion(input), input);
    }

    #[test]
    fn noise_lines_are_filtered() {
        let input = "\
Tips: type /help to get started
real content line
──────────────────────────
press m to toggle
Context left 42
more real content";
        let extracted = extract_conclusion(input);
        assert_eq!(extracted, "real content line\nmore real content");
    }

    #[test]
    fn chain_boilerplate_is_filtered() {
        let input = format!(
            "conclusion text\n{header}\n{instruction}\n",
            header = CHAIN_PROMPT_HEADER,
            instruction = CHAIN_PROMPT_INSTRUCTION
        );
        assert_eq!(extract_conclusion(&input), "conclusion text");
    }

    #[test]
    fn ticking_progress_lines_collapse_to_one() {
        let input = "syncing 10%\nsyncing 55%\nsyncing 90%\nfinished";
        assert_eq!(extract_conclusion(input), "syncing 10%\nfinished");
    }

    #[test]
    fn border_heavy_lines_are_dropped() {
        let input = "║══════════════║\nactual result text\n────────";
        assert_eq!(extract_conclusion(input), "actual result text");
    }
}
