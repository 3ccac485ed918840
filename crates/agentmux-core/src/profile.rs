use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ProfileId;

/// Launch strategy for an agent process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriverKind {
    /// Run the agent binary directly (defaults to `claude`).
    Native,
    /// Route through the `ccr` API proxy.
    Ccr,
    /// Arbitrary user-provided command line.
    Custom,
}

/// How eagerly the output watcher answers command-approval prompts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AutoApproveLevel {
    None,
    Safe,
    Vibe,
    Yolo,
}

impl AutoApproveLevel {
    /// Only the two most permissive levels may answer prompts unattended.
    pub fn allows_command_auto_reply(self) -> bool {
        matches!(self, Self::Vibe | Self::Yolo)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationPolicy {
    pub desktop: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,
}

/// A named bundle of launch parameters shareable across projects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub id: ProfileId,
    pub name: String,
    pub driver: DriverKind,
    pub command: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env_vars: BTreeMap<String, String>,
    pub auto_approve: AutoApproveLevel,
    #[serde(default)]
    pub notification: NotificationPolicy,
    #[serde(default)]
    pub is_default: bool,
}

impl Profile {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: ProfileId::new(Uuid::new_v4().to_string()),
            name: name.into(),
            driver: DriverKind::Native,
            command: "claude".to_owned(),
            env_vars: BTreeMap::new(),
            auto_approve: AutoApproveLevel::Vibe,
            notification: NotificationPolicy {
                desktop: true,
                webhook_url: None,
            },
            is_default: false,
        }
    }

    /// The built-in profile used until the user creates their own.
    pub fn default_profile() -> Self {
        Self {
            id: ProfileId::new("default"),
            name: "Default".to_owned(),
            is_default: true,
            ..Self::new("Default")
        }
    }

    pub fn set_env_var(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.env_vars.insert(key.into(), value.into());
    }

    /// Deep copy under a fresh id; the copy never inherits the default marker.
    pub fn clone_as(&self, new_name: impl Into<String>) -> Self {
        Self {
            id: ProfileId::new(Uuid::new_v4().to_string()),
            name: new_name.into(),
            is_default: false,
            ..self.clone()
        }
    }
}
