use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{ProfileId, ProjectId};

/// A managed project directory bound to a launch profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    pub name: String,
    /// Absolute path; must exist as a directory when a session launches.
    pub path: String,
    /// Empty string means "use the default profile".
    #[serde(default)]
    pub profile_id: String,
    pub created_at: i64,
    pub last_used: i64,
}

impl Project {
    pub fn new(name: impl Into<String>, path: impl Into<String>) -> Self {
        let now = Utc::now().timestamp();
        Self {
            id: ProjectId::new(Uuid::new_v4().to_string()),
            name: name.into(),
            path: path.into(),
            profile_id: String::new(),
            created_at: now,
            last_used: now,
        }
    }

    pub fn touch(&mut self) {
        self.last_used = Utc::now().timestamp();
    }

    pub fn set_profile(&mut self, profile_id: &ProfileId) {
        self.profile_id = profile_id.as_str().to_owned();
    }

    /// Display name, falling back to the path basename when unnamed.
    pub fn display_name(&self) -> &str {
        if !self.name.is_empty() {
            return &self.name;
        }
        self.path
            .rsplit(['/', '\\'])
            .next()
            .filter(|tail| !tail.is_empty())
            .unwrap_or(&self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_name_prefers_explicit_name() {
        let project = Project::new("frontend", "/srv/code/frontend");
        assert_eq!(project.display_name(), "frontend");
    }

    #[test]
    fn display_name_falls_back_to_basename() {
        let mut project = Project::new("", "/srv/code/backend");
        assert_eq!(project.display_name(), "backend");

        project.path = "backend".to_owned();
        assert_eq!(project.display_name(), "backend");
    }

    #[test]
    fn touch_advances_last_used() {
        let mut project = Project::new("x", "/tmp/x");
        project.last_used = 0;
        project.touch();
        assert!(project.last_used > 0);
    }
}
