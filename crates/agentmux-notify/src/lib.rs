//! Notification events emitted by the session watcher and their delivery to
//! the desktop and to webhooks. Delivery is fire-and-forget: failures are
//! logged and swallowed, never surfaced to the UI loop.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use agentmux_core::{NotificationPolicy, ProjectId};

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_MESSAGE_LEN: usize = 800;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Notify,
    InputRequired,
    TaskCompleted,
    Error,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Notify => "notify",
            Self::InputRequired => "input_required",
            Self::TaskCompleted => "task_completed",
            Self::Error => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub project_id: ProjectId,
    pub project_name: String,
    pub kind: EventKind,
    pub title: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl Event {
    /// Identity used by the watcher's cooldown deduplication.
    pub fn dedup_key(&self) -> String {
        format!("{}|{}|{}", self.kind.as_str(), self.title, self.message)
    }
}

/// Delivery interface the app core depends on; the engine side never learns
/// how events leave the process.
pub trait Notifier: Send + Sync {
    fn dispatch(&self, policy: &NotificationPolicy, event: Event);
}

/// Default notifier: desktop notifications through the platform's
/// `notify-send`, webhooks through a shared HTTP client.
pub struct Dispatcher {
    client: reqwest::Client,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(WEBHOOK_TIMEOUT)
                .build()
                .unwrap_or_default(),
        }
    }

    fn presentation(event: &Event) -> (String, String) {
        let mut title = event.title.trim().to_owned();
        if title.is_empty() {
            title = if event.project_name.is_empty() {
                "agentmux".to_owned()
            } else {
                event.project_name.clone()
            };
        }
        let mut message = event.message.trim().to_owned();
        if message.is_empty() {
            message = event.kind.as_str().to_owned();
        }
        if message.len() > MAX_MESSAGE_LEN {
            let mut cut = MAX_MESSAGE_LEN;
            while !message.is_char_boundary(cut) {
                cut -= 1;
            }
            message.truncate(cut);
            message.push_str("...");
        }
        (title, message)
    }

    fn send_desktop(title: &str, message: &str) {
        #[cfg(target_os = "macos")]
        let result = std::process::Command::new("osascript")
            .arg("-e")
            .arg(format!(
                "display notification {message:?} with title {title:?}"
            ))
            .spawn();
        #[cfg(not(target_os = "macos"))]
        let result = std::process::Command::new("notify-send")
            .arg(title)
            .arg(message)
            .spawn();

        if let Err(error) = result {
            debug!(%error, "desktop notification failed");
        }
    }

    async fn send_webhook(&self, url: &str, event: &Event, title: &str, message: &str) {
        let payload = serde_json::json!({
            "project": event.project_name,
            "projectId": event.project_id.as_str(),
            "event": event.kind.as_str(),
            "title": title,
            "message": message,
            "timestamp": event.timestamp.timestamp(),
        });
        if let Err(error) = self.client.post(url).json(&payload).send().await {
            debug!(%error, "webhook notification failed");
        }
    }
}

impl Notifier for Dispatcher {
    fn dispatch(&self, policy: &NotificationPolicy, event: Event) {
        let (title, message) = Self::presentation(&event);

        if policy.desktop {
            Self::send_desktop(&title, &message);
        }
        if let Some(url) = policy.webhook_url.clone() {
            let client = self.client.clone();
            let dispatcher = Dispatcher { client };
            tokio::spawn(async move {
                dispatcher
                    .send_webhook(&url, &event, &title, &message)
                    .await;
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_event(kind: EventKind, title: &str, message: &str) -> Event {
        Event {
            project_id: ProjectId::new("p1"),
            project_name: "demo".to_owned(),
            kind,
            title: title.to_owned(),
            message: message.to_owned(),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn dedup_key_combines_kind_title_and_message() {
        let event = sample_event(EventKind::InputRequired, "Input required", "[y/N]");
        assert_eq!(event.dedup_key(), "input_required|Input required|[y/N]");
    }

    #[test]
    fn kind_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&EventKind::TaskCompleted).expect("serialize kind"),
            "\"task_completed\""
        );
    }

    #[test]
    fn presentation_fills_empty_fields_and_truncates() {
        let event = sample_event(EventKind::Error, "  ", &"x".repeat(2000));
        let (title, message) = Dispatcher::presentation(&event);
        assert_eq!(title, "demo");
        assert!(message.len() <= MAX_MESSAGE_LEN + 3);
        assert!(message.ends_with("..."));

        let empty = sample_event(EventKind::Notify, "Bell", "");
        let (_, message) = Dispatcher::presentation(&empty);
        assert_eq!(message, "notify");
    }
}
