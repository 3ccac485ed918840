//! Per-session output-stream analysis: OSC notifications, prompt and error
//! detection, bell handling, and auto-reply staging.
//!
//! The watcher only classifies; the UI loop performs the actual write of a
//! staged reply. Small rolling tails carry state across frame boundaries so
//! sequences split between frames are still recognized.

use std::collections::HashMap;
use std::sync::LazyLock;
use std::time::{Duration, Instant};

use chrono::Utc;
use regex::Regex;

use agentmux_core::{Profile, Project};
use agentmux_notify::{Event, EventKind};
use agentmux_runtime::strip_ansi;

const OSC_TAIL_LIMIT: usize = 2048;
const TEXT_TAIL_LIMIT: usize = 4096;
const SCAN_LINES: usize = 12;
const EVENT_COOLDOWN: Duration = Duration::from_secs(12);
const AUTO_REPLY_COOLDOWN: Duration = Duration::from_secs(8);
const DEDUP_PRUNE_THRESHOLD: usize = 128;

static INPUT_REQUIRED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(\[y/n\]|\(y/n\)|\bpress enter\b|\brequires your (approval|confirmation)\b|\bneed(s)? your input\b)",
    )
    .expect("valid input-required regex")
});
static COMPLETED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(\btask (finished|complete)\b|\bcost:\s*\$)").expect("valid completed regex")
});
static ERROR_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(\berror:|context window exceeded|traceback)").expect("valid error regex")
});
static NOTIFY_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(?:\[notify\]|notify(?:ication)?)[\s:：-]+(.+)$")
        .expect("valid notify-line regex")
});
static VIBE_NOTIFY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*vibecode(?:\s+notify)?[\s:：-]+(.+)$").expect("valid vibecode regex")
});
static COMMAND_APPROVAL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(\bdo you want to run\b|\brun (these|the) commands?\b|\bexecute (these|the) commands?\b|\bcommand\b.*\[y/n\])",
    )
    .expect("valid command-approval regex")
});

/// Signatures the auto-reply safety filter refuses to answer, whatever the
/// approval level.
static DANGEROUS_COMMANDS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"rm\s+-[a-z]*r[a-z]*f[a-z]*\s+/(\s|$|\*)",
        r"rm\s+-[a-z]*f[a-z]*r[a-z]*\s+/(\s|$|\*)",
        r"(?i)\bmkfs\b",
        r"(?i)\bdd\s+if=",
        r":\(\)\s*\{\s*:\|:&\s*\};:",
        r"(?i)\bshutdown\b|\breboot\b",
    ]
    .into_iter()
    .map(|pattern| Regex::new(pattern).expect("valid dangerous-command regex"))
    .collect()
});

pub struct OutputWatcher {
    osc_tail: String,
    text_tail: String,
    last_events: HashMap<String, Instant>,
    pending_auto_reply: Option<Vec<u8>>,
}

impl Default for OutputWatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputWatcher {
    pub fn new() -> Self {
        Self {
            osc_tail: String::new(),
            text_tail: String::new(),
            last_events: HashMap::new(),
            pending_auto_reply: None,
        }
    }

    /// Analyzes one batched output frame and returns the deduplicated
    /// notification events it produced.
    pub fn process(&mut self, project: &Project, profile: &Profile, data: &[u8]) -> Vec<Event> {
        if data.is_empty() {
            return Vec::new();
        }
        let mut events = Vec::new();

        let incoming = String::from_utf8_lossy(data);
        let osc_input = format!("{}{}", self.osc_tail, incoming);
        let (osc_events, rest) = extract_osc_notifications(&osc_input);
        self.osc_tail = tail_chars(rest, OSC_TAIL_LIMIT);
        for (title, message) in osc_events {
            self.push_if_new(&mut events, project, EventKind::Notify, title, message);
        }

        let plain = strip_ansi(&incoming).replace('\r', "\n");
        if !plain.is_empty() {
            let combined = format!("{}{}", self.text_tail, plain);
            for line in last_lines(&combined, SCAN_LINES) {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                self.maybe_stage_auto_reply(profile, line);
                if INPUT_REQUIRED.is_match(line) {
                    self.push_if_new(
                        &mut events,
                        project,
                        EventKind::InputRequired,
                        "Input required".to_owned(),
                        line.to_owned(),
                    );
                    continue;
                }
                if ERROR_LINE.is_match(line) {
                    self.push_if_new(
                        &mut events,
                        project,
                        EventKind::Error,
                        "Error".to_owned(),
                        line.to_owned(),
                    );
                    continue;
                }
                if COMPLETED.is_match(line) {
                    self.push_if_new(
                        &mut events,
                        project,
                        EventKind::TaskCompleted,
                        "Task completed".to_owned(),
                        line.to_owned(),
                    );
                    continue;
                }
                if let Some(captures) = VIBE_NOTIFY.captures(line).or_else(|| NOTIFY_LINE.captures(line))
                {
                    let message = captures
                        .get(1)
                        .map(|m| m.as_str().trim().to_owned())
                        .unwrap_or_default();
                    self.push_if_new(
                        &mut events,
                        project,
                        EventKind::Notify,
                        "Notification".to_owned(),
                        message,
                    );
                }
            }
            self.text_tail = tail_chars(&combined, TEXT_TAIL_LIMIT);
        }

        if incoming.contains('\u{7}') {
            self.push_if_new(
                &mut events,
                project,
                EventKind::Notify,
                "Bell".to_owned(),
                "Terminal bell".to_owned(),
            );
        }

        events
    }

    fn maybe_stage_auto_reply(&mut self, profile: &Profile, line: &str) {
        if !profile.auto_approve.allows_command_auto_reply() || self.pending_auto_reply.is_some() {
            return;
        }
        if !INPUT_REQUIRED.is_match(line) || !COMMAND_APPROVAL.is_match(line) {
            return;
        }
        if is_dangerous_command(line) {
            return;
        }
        let key = format!("autoapprove|{line}");
        let now = Instant::now();
        if let Some(last) = self.last_events.get(&key) {
            if now.duration_since(*last) < AUTO_REPLY_COOLDOWN {
                return;
            }
        }
        self.last_events.insert(key, now);
        self.pending_auto_reply = Some(b"y\r".to_vec());
    }

    /// Takes the staged reply, if any. The caller writes it to the session.
    pub fn consume_auto_reply(&mut self) -> Option<Vec<u8>> {
        self.pending_auto_reply.take()
    }

    fn push_if_new(
        &mut self,
        events: &mut Vec<Event>,
        project: &Project,
        kind: EventKind,
        title: String,
        message: String,
    ) {
        let event = Event {
            project_id: project.id.clone(),
            project_name: project.display_name().to_owned(),
            kind,
            title,
            message,
            timestamp: Utc::now(),
        };
        if self.should_fire(&event) {
            events.push(event);
        }
    }

    fn should_fire(&mut self, event: &Event) -> bool {
        let key = event.dedup_key();
        let now = Instant::now();
        if let Some(last) = self.last_events.get(&key) {
            if now.duration_since(*last) < EVENT_COOLDOWN {
                return false;
            }
        }
        self.last_events.insert(key, now);
        if self.last_events.len() > DEDUP_PRUNE_THRESHOLD {
            self.last_events
                .retain(|_, seen| now.duration_since(*seen) <= EVENT_COOLDOWN);
        }
        true
    }
}

pub fn is_dangerous_command(line: &str) -> bool {
    DANGEROUS_COMMANDS.iter().any(|pattern| pattern.is_match(line))
}

/// Scans for `OSC 9` and `OSC 777;notify` sequences terminated by BEL or
/// ST, returning `(title, message)` pairs and the unconsumed suffix
/// (which may hold a sequence still awaiting its terminator).
fn extract_osc_notifications(input: &str) -> (Vec<(String, String)>, &str) {
    let bytes = input.as_bytes();
    let mut events = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != 0x1b || i + 1 >= bytes.len() || bytes[i + 1] != b']' {
            i += 1;
            continue;
        }
        let start = i + 2;
        let Some((end, term_len)) = osc_terminator(bytes, start) else {
            break;
        };
        if let Ok(content) = std::str::from_utf8(&bytes[start..end]) {
            if let Some(event) = decode_osc_notification(content) {
                events.push(event);
            }
        }
        i = end + term_len;
    }
    // `i` always lands on a char boundary: it only advances past complete
    // escape sequences or single ASCII bytes.
    (events, &input[i.min(input.len())..])
}

fn osc_terminator(bytes: &[u8], start: usize) -> Option<(usize, usize)> {
    if start >= bytes.len() {
        return None;
    }
    let mut j = start;
    while j < bytes.len() {
        if bytes[j] == 0x07 {
            return Some((j, 1));
        }
        if bytes[j] == 0x1b && j + 1 < bytes.len() && bytes[j + 1] == b'\\' {
            return Some((j, 2));
        }
        j += 1;
    }
    None
}

fn decode_osc_notification(content: &str) -> Option<(String, String)> {
    let parts: Vec<&str> = content.split(';').collect();
    match parts.first().map(|p| p.trim()) {
        Some("9") => {
            let message = parts[1..].join(";").trim().to_owned();
            if message.is_empty() {
                None
            } else {
                Some(("Notification".to_owned(), message))
            }
        }
        Some("777") if parts.len() >= 3 && parts[1].trim() == "notify" => {
            let title = parts[2].trim().to_owned();
            let message = if parts.len() > 3 {
                parts[3..].join(";").trim().to_owned()
            } else {
                String::new()
            };
            if title.is_empty() && message.is_empty() {
                None
            } else {
                Some((title, message))
            }
        }
        _ => None,
    }
}

fn last_lines(text: &str, max: usize) -> Vec<&str> {
    let lines: Vec<&str> = text.split('\n').collect();
    let skip = lines.len().saturating_sub(max);
    lines[skip..].to_vec()
}

/// Character-boundary-safe trailing slice of at most `limit` bytes.
fn tail_chars(text: &str, limit: usize) -> String {
    if text.len() <= limit {
        return text.to_owned();
    }
    let mut cut = text.len() - limit;
    while !text.is_char_boundary(cut) {
        cut += 1;
    }
    text[cut..].to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentmux_core::AutoApproveLevel;

    fn fixtures(level: AutoApproveLevel) -> (Project, Profile) {
        let project = Project::new("demo", "/tmp/demo");
        let mut profile = Profile::new("test");
        profile.auto_approve = level;
        (project, profile)
    }

    #[test]
    fn osc9_emits_a_notification() {
        let (project, profile) = fixtures(AutoApproveLevel::None);
        let mut watcher = OutputWatcher::new();

        let events = watcher.process(&project, &profile, b"\x1b]9;build finished\x07");
        // The BEL terminator also counts as a bell, per "BEL anywhere".
        assert!(events
            .iter()
            .any(|e| e.kind == EventKind::Notify && e.message == "build finished"));
        assert!(events.iter().any(|e| e.title == "Bell"));
    }

    #[test]
    fn osc777_carries_title_and_message() {
        let (project, profile) = fixtures(AutoApproveLevel::None);
        let mut watcher = OutputWatcher::new();

        let events = watcher.process(&project, &profile, b"\x1b]777;notify;Deploy;all green\x1b\\");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].title, "Deploy");
        assert_eq!(events[0].message, "all green");
    }

    #[test]
    fn osc_split_across_frames_is_reassembled() {
        let (project, profile) = fixtures(AutoApproveLevel::None);
        let mut watcher = OutputWatcher::new();

        assert!(watcher
            .process(&project, &profile, b"\x1b]9;half a noti")
            .is_empty());
        let events = watcher.process(&project, &profile, b"fication\x07");
        assert!(events.iter().any(|e| e.message == "half a notification"));
    }

    #[test]
    fn prompt_line_classifies_as_input_required() {
        let (project, profile) = fixtures(AutoApproveLevel::None);
        let mut watcher = OutputWatcher::new();

        let events = watcher.process(&project, &profile, b"Continue? [y/N]\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::InputRequired);
    }

    #[test]
    fn error_and_completion_lines_classify() {
        let (project, profile) = fixtures(AutoApproveLevel::None);
        let mut watcher = OutputWatcher::new();

        let events = watcher.process(&project, &profile, b"Error: out of cheese\n");
        assert_eq!(events[0].kind, EventKind::Error);

        let events = watcher.process(&project, &profile, b"Task complete. Cost: $0.42\n");
        assert_eq!(events[0].kind, EventKind::TaskCompleted);
    }

    #[test]
    fn bell_byte_emits_a_bell_notification() {
        let (project, profile) = fixtures(AutoApproveLevel::None);
        let mut watcher = OutputWatcher::new();

        let events = watcher.process(&project, &profile, b"ding\x07dong");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].title, "Bell");
    }

    #[test]
    fn repeated_prompts_are_cooled_down() {
        let (project, profile) = fixtures(AutoApproveLevel::None);
        let mut watcher = OutputWatcher::new();

        let mut fired = 0;
        for _ in 0..300 {
            fired += watcher
                .process(&project, &profile, b"Continue? [y/N]\n")
                .len();
        }
        // One initial event; the 12s cooldown swallows the rest of a fast
        // burst.
        assert_eq!(fired, 1);
    }

    #[test]
    fn yolo_profile_stages_a_reply_for_benign_commands() {
        let (project, profile) = fixtures(AutoApproveLevel::Yolo);
        let mut watcher = OutputWatcher::new();

        watcher.process(&project, &profile, b"Do you want to run this? ls -la [y/N]\n");
        assert_eq!(watcher.consume_auto_reply(), Some(b"y\r".to_vec()));
        assert_eq!(watcher.consume_auto_reply(), None);
    }

    #[test]
    fn dangerous_commands_are_never_auto_answered() {
        let (project, profile) = fixtures(AutoApproveLevel::Yolo);
        let mut watcher = OutputWatcher::new();

        let events = watcher.process(
            &project,
            &profile,
            b"Do you want to run this? rm -rf / [y/N]\n",
        );
        // The prompt still surfaces as input-required, but no reply is
        // staged.
        assert!(events.iter().any(|e| e.kind == EventKind::InputRequired));
        assert_eq!(watcher.consume_auto_reply(), None);
    }

    #[test]
    fn safe_profile_never_stages_replies() {
        let (project, profile) = fixtures(AutoApproveLevel::Safe);
        let mut watcher = OutputWatcher::new();

        watcher.process(&project, &profile, b"Do you want to run this? ls [y/N]\n");
        assert_eq!(watcher.consume_auto_reply(), None);
    }

    #[test]
    fn dangerous_signature_detection() {
        assert!(is_dangerous_command("rm -rf / "));
        assert!(is_dangerous_command("sudo rm -rf /*"));
        assert!(is_dangerous_command("dd if=/dev/zero of=/dev/sda"));
        assert!(!is_dangerous_command("rm -rf ./build"));
        assert!(!is_dangerous_command("cargo build"));
    }

    #[test]
    fn structured_notify_lines_extract_their_message() {
        let (project, profile) = fixtures(AutoApproveLevel::None);
        let mut watcher = OutputWatcher::new();

        let events = watcher.process(&project, &profile, b"[notify] lint finished\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].message, "lint finished");

        let events = watcher.process(&project, &profile, b"vibecode notify: tests green\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].message, "tests green");
    }

    #[test]
    fn dedup_map_is_pruned_lazily() {
        let (project, profile) = fixtures(AutoApproveLevel::None);
        let mut watcher = OutputWatcher::new();

        for i in 0..200 {
            let line = format!("Error: distinct failure {i}\n");
            watcher.process(&project, &profile, line.as_bytes());
        }
        // Entries within the cooldown survive pruning, but the map never
        // grows unboundedly past the threshold by more than one batch.
        assert!(watcher.last_events.len() <= 2 * DEDUP_PRUNE_THRESHOLD);
    }
}
