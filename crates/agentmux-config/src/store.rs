use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use agentmux_core::{Profile, ProfileId, Project, ProjectId};

const DATA_FILE: &str = "data.json";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("already exists: {0}")]
    AlreadyExists(String),
    #[error("cannot delete the default profile")]
    DefaultProfileProtected,
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("data file is malformed: {0}")]
    Malformed(#[from] serde_json::Error),
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreData {
    projects: Vec<Project>,
    profiles: Vec<Profile>,
}

/// Project and profile records persisted as two parallel arrays in
/// `<state>/data.json`. Every mutation flushes to disk.
pub struct JsonStore {
    path: PathBuf,
    data: Mutex<StoreData>,
}

impl JsonStore {
    /// Opens (or initializes) the store. A store without any profile is
    /// seeded with the built-in default.
    pub fn open(state_dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let state_dir = state_dir.as_ref();
        std::fs::create_dir_all(state_dir)?;
        let path = state_dir.join(DATA_FILE);

        let mut data = if path.exists() {
            serde_json::from_str(&std::fs::read_to_string(&path)?)?
        } else {
            StoreData::default()
        };
        if data.profiles.is_empty() {
            data.profiles.push(Profile::default_profile());
        }

        let store = Self {
            path,
            data: Mutex::new(data),
        };
        store.flush()?;
        Ok(store)
    }

    fn flush(&self) -> Result<(), StoreError> {
        let serialized = {
            let data = self.data.lock().expect("store lock poisoned");
            serde_json::to_string_pretty(&*data)?
        };
        std::fs::write(&self.path, serialized)?;
        Ok(())
    }

    // ---- projects ----

    pub fn list_projects(&self) -> Vec<Project> {
        self.data
            .lock()
            .expect("store lock poisoned")
            .projects
            .clone()
    }

    pub fn get_project(&self, id: &ProjectId) -> Result<Project, StoreError> {
        self.data
            .lock()
            .expect("store lock poisoned")
            .projects
            .iter()
            .find(|project| &project.id == id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.as_str().to_owned()))
    }

    pub fn add_project(&self, project: Project) -> Result<(), StoreError> {
        {
            let mut data = self.data.lock().expect("store lock poisoned");
            if data.projects.iter().any(|existing| existing.id == project.id) {
                return Err(StoreError::AlreadyExists(project.id.as_str().to_owned()));
            }
            data.projects.push(project);
        }
        self.flush()
    }

    pub fn update_project(&self, project: Project) -> Result<(), StoreError> {
        {
            let mut data = self.data.lock().expect("store lock poisoned");
            let slot = data
                .projects
                .iter_mut()
                .find(|existing| existing.id == project.id)
                .ok_or_else(|| StoreError::NotFound(project.id.as_str().to_owned()))?;
            *slot = project;
        }
        self.flush()
    }

    pub fn delete_project(&self, id: &ProjectId) -> Result<(), StoreError> {
        {
            let mut data = self.data.lock().expect("store lock poisoned");
            let before = data.projects.len();
            data.projects.retain(|project| &project.id != id);
            if data.projects.len() == before {
                return Err(StoreError::NotFound(id.as_str().to_owned()));
            }
        }
        self.flush()
    }

    // ---- profiles ----

    pub fn list_profiles(&self) -> Vec<Profile> {
        self.data
            .lock()
            .expect("store lock poisoned")
            .profiles
            .clone()
    }

    pub fn get_profile(&self, id: &ProfileId) -> Result<Profile, StoreError> {
        self.data
            .lock()
            .expect("store lock poisoned")
            .profiles
            .iter()
            .find(|profile| &profile.id == id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.as_str().to_owned()))
    }

    /// The profile used when a project does not name one.
    pub fn get_default_profile(&self) -> Result<Profile, StoreError> {
        let data = self.data.lock().expect("store lock poisoned");
        data.profiles
            .iter()
            .find(|profile| profile.is_default)
            .or_else(|| data.profiles.first())
            .cloned()
            .ok_or_else(|| StoreError::NotFound("default profile".to_owned()))
    }

    /// Resolves a project's profile reference: empty or dangling references
    /// fall back to the default profile.
    pub fn profile_for_project(&self, project: &Project) -> Result<Profile, StoreError> {
        if !project.profile_id.is_empty() {
            if let Ok(profile) = self.get_profile(&ProfileId::new(project.profile_id.clone())) {
                return Ok(profile);
            }
        }
        self.get_default_profile()
    }

    pub fn add_profile(&self, profile: Profile) -> Result<(), StoreError> {
        {
            let mut data = self.data.lock().expect("store lock poisoned");
            if data.profiles.iter().any(|existing| existing.id == profile.id) {
                return Err(StoreError::AlreadyExists(profile.id.as_str().to_owned()));
            }
            if profile.is_default {
                for existing in &mut data.profiles {
                    existing.is_default = false;
                }
            }
            data.profiles.push(profile);
        }
        self.flush()
    }

    pub fn update_profile(&self, profile: Profile) -> Result<(), StoreError> {
        {
            let mut data = self.data.lock().expect("store lock poisoned");
            if !data.profiles.iter().any(|existing| existing.id == profile.id) {
                return Err(StoreError::NotFound(profile.id.as_str().to_owned()));
            }
            if profile.is_default {
                for existing in &mut data.profiles {
                    existing.is_default = false;
                }
            }
            let slot = data
                .profiles
                .iter_mut()
                .find(|existing| existing.id == profile.id)
                .expect("profile checked above");
            *slot = profile;
        }
        self.flush()
    }

    pub fn delete_profile(&self, id: &ProfileId) -> Result<(), StoreError> {
        {
            let mut data = self.data.lock().expect("store lock poisoned");
            let profile = data
                .profiles
                .iter()
                .find(|profile| &profile.id == id)
                .ok_or_else(|| StoreError::NotFound(id.as_str().to_owned()))?;
            if profile.is_default {
                return Err(StoreError::DefaultProfileProtected);
            }
            data.profiles.retain(|profile| &profile.id != id);
        }
        self.flush()
    }

    /// Moves the at-most-one default marker onto the given profile.
    pub fn set_default_profile(&self, id: &ProfileId) -> Result<(), StoreError> {
        {
            let mut data = self.data.lock().expect("store lock poisoned");
            if !data.profiles.iter().any(|profile| &profile.id == id) {
                return Err(StoreError::NotFound(id.as_str().to_owned()));
            }
            for profile in &mut data.profiles {
                profile.is_default = &profile.id == id;
            }
        }
        self.flush()
    }
}
