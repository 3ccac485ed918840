//! Core data model shared by every agentmux crate: identifiers, projects,
//! profiles, and the policy enums that govern session behavior.

mod error;
mod identifiers;
mod profile;
mod project;
mod status;

pub use error::CoreError;
pub use identifiers::{ChainSessionId, ProfileId, ProjectId};
pub use profile::{AutoApproveLevel, DriverKind, NotificationPolicy, Profile};
pub use project::Project;
pub use status::SessionStatus;
