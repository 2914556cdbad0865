//! Change notifications.
//!
//! Every successful mutating operation emits exactly one [`Event`], after its
//! database commit. A notifier failure is logged and never undoes the change.

use serde::Serialize;
use tracing::{info, warn};

use crate::error::Result;
use crate::types::{AccessLevel, Project};

/// Identifies a project in event payloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProjectRef {
    pub id: i64,
    /// `[forks/<user>/][namespace/]name`
    pub path: String,
    pub private: bool,
}

impl From<&Project> for ProjectRef {
    fn from(project: &Project) -> Self {
        Self {
            id: project.id,
            path: project
                .repo_path
                .strip_suffix(".git")
                .unwrap_or(&project.repo_path)
                .to_string(),
            private: project.private,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "topic", content = "msg")]
pub enum Event {
    #[serde(rename = "project.new")]
    ProjectNew { project: ProjectRef, agent: String },

    #[serde(rename = "project.forked")]
    ProjectForked {
        project: ProjectRef,
        parent: ProjectRef,
        agent: String,
    },

    #[serde(rename = "project.deleted")]
    ProjectDeleted {
        project: ProjectRef,
        agent: String,
        detached_forks: usize,
    },

    #[serde(rename = "project.user.added")]
    ProjectUserAdded {
        project: ProjectRef,
        new_user: String,
        access: AccessLevel,
        agent: String,
    },

    #[serde(rename = "project.user.access.updated")]
    ProjectUserAccessUpdated {
        project: ProjectRef,
        new_user: String,
        new_access: AccessLevel,
        agent: String,
    },

    #[serde(rename = "project.user.removed")]
    ProjectUserRemoved {
        project: ProjectRef,
        removed_user: String,
        agent: String,
    },

    #[serde(rename = "project.group.added")]
    ProjectGroupAdded {
        project: ProjectRef,
        new_group: String,
        access: AccessLevel,
        agent: String,
    },

    #[serde(rename = "project.group.access.updated")]
    ProjectGroupAccessUpdated {
        project: ProjectRef,
        new_group: String,
        new_access: AccessLevel,
        agent: String,
    },

    #[serde(rename = "project.group.removed")]
    ProjectGroupRemoved {
        project: ProjectRef,
        removed_group: String,
        agent: String,
    },

    #[serde(rename = "project.owner.updated")]
    ProjectOwnerUpdated {
        project: ProjectRef,
        new_owner: String,
        old_owner: String,
        agent: String,
    },

    #[serde(rename = "project.edit")]
    ProjectSettingsUpdated {
        project: ProjectRef,
        fields: Vec<String>,
        agent: String,
    },

    #[serde(rename = "project.hook_token.regenerated")]
    HookTokenRegenerated { project: ProjectRef },

    #[serde(rename = "project.deploykey.added")]
    DeployKeyAdded {
        project: ProjectRef,
        ssh_short_key: String,
        agent: String,
    },

    #[serde(rename = "project.deploykey.removed")]
    DeployKeyRemoved {
        project: ProjectRef,
        ssh_short_key: String,
        agent: String,
    },

    #[serde(rename = "group.new")]
    GroupNew { group: String, agent: String },

    #[serde(rename = "group.user.added")]
    GroupUserAdded {
        group: String,
        new_user: String,
        agent: String,
    },

    #[serde(rename = "group.user.removed")]
    GroupUserRemoved {
        group: String,
        removed_user: String,
        agent: String,
    },
}

impl Event {
    pub fn topic(&self) -> &'static str {
        match self {
            Self::ProjectNew { .. } => "project.new",
            Self::ProjectForked { .. } => "project.forked",
            Self::ProjectDeleted { .. } => "project.deleted",
            Self::ProjectUserAdded { .. } => "project.user.added",
            Self::ProjectUserAccessUpdated { .. } => "project.user.access.updated",
            Self::ProjectUserRemoved { .. } => "project.user.removed",
            Self::ProjectGroupAdded { .. } => "project.group.added",
            Self::ProjectGroupAccessUpdated { .. } => "project.group.access.updated",
            Self::ProjectGroupRemoved { .. } => "project.group.removed",
            Self::ProjectOwnerUpdated { .. } => "project.owner.updated",
            Self::ProjectSettingsUpdated { .. } => "project.edit",
            Self::HookTokenRegenerated { .. } => "project.hook_token.regenerated",
            Self::DeployKeyAdded { .. } => "project.deploykey.added",
            Self::DeployKeyRemoved { .. } => "project.deploykey.removed",
            Self::GroupNew { .. } => "group.new",
            Self::GroupUserAdded { .. } => "group.user.added",
            Self::GroupUserRemoved { .. } => "group.user.removed",
        }
    }
}

pub trait Notifier: Send + Sync {
    fn notify(&self, event: &Event) -> Result<()>;
}

/// Writes events to the log as JSON.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, event: &Event) -> Result<()> {
        let payload = serde_json::to_string(event)?;
        info!(topic = event.topic(), %payload, "Notification");
        Ok(())
    }
}

/// Delivers `event`, logging instead of propagating a failure.
pub(crate) fn deliver(notifier: &dyn Notifier, event: Event) {
    if let Err(e) = notifier.notify(&event) {
        warn!(topic = event.topic(), "Failed to send notification: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serializes_with_topic() {
        let event = Event::GroupNew {
            group: "packagers".to_string(),
            agent: "pingou".to_string(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["topic"], "group.new");
        assert_eq!(json["msg"]["group"], "packagers");
        assert_eq!(event.topic(), "group.new");
    }

    #[test]
    fn test_project_ref_strips_suffix() {
        let project = Project {
            id: 3,
            user_id: 2,
            namespace: Some("rpms".to_string()),
            name: "test".to_string(),
            description: None,
            parent_id: Some(1),
            private: false,
            hook_token: String::new(),
            settings: Default::default(),
            repo_path: "forks/foo/rpms/test.git".to_string(),
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        };
        assert_eq!(ProjectRef::from(&project).path, "forks/foo/rpms/test");
    }
}
