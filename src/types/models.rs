use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{AccessLevel, ProjectSettings};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fullname: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_email: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserEmail {
    pub user_id: i64,
    pub email: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Group {
    pub id: i64,
    pub group_name: String,
    pub display_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub group_type: String,
    pub creator_id: i64,
    pub created_at: DateTime<Utc>,
}

/// A user's membership in a group, flattened with the group name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupMembership {
    pub group_id: i64,
    pub group_name: String,
    pub user_id: i64,
    pub is_admin: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: i64,
    pub user_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<i64>,
    pub private: bool,
    #[serde(skip)]
    pub hook_token: String,
    pub settings: ProjectSettings,
    /// Location of the project's repositories relative to each repo folder.
    /// Fixed at creation so a fork keeps its repositories after its parent
    /// is deleted.
    pub repo_path: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Project {
    #[must_use]
    pub fn is_fork(&self) -> bool {
        self.parent_id.is_some()
    }

    #[must_use]
    pub fn effective_owner(&self) -> i64 {
        self.user_id
    }

    /// `namespace/name`, or just `name`.
    #[must_use]
    pub fn fullname(&self) -> String {
        match &self.namespace {
            Some(ns) => format!("{ns}/{}", self.name),
            None => self.name.clone(),
        }
    }
}

/// The row written by the lifecycle engine; id and timestamps come back from
/// the insert.
#[derive(Debug, Clone)]
pub struct NewProject {
    pub user_id: i64,
    pub namespace: Option<String>,
    pub name: String,
    pub description: Option<String>,
    pub parent_id: Option<i64>,
    pub private: bool,
    pub hook_token: String,
    pub settings: ProjectSettings,
    pub repo_path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectUserAcl {
    pub project_id: i64,
    pub user_id: i64,
    pub username: String,
    pub access: AccessLevel,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectGroupAcl {
    pub project_id: i64,
    pub group_id: i64,
    pub group_name: String,
    pub access: AccessLevel,
}

/// Every ACL row of one project, loaded together.
#[derive(Debug, Clone, Default)]
pub struct ProjectAcls {
    pub users: Vec<ProjectUserAcl>,
    pub groups: Vec<ProjectGroupAcl>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployKey {
    pub id: i64,
    pub project_id: i64,
    pub pushaccess: bool,
    pub public_ssh_key: String,
    pub ssh_short_key: String,
    pub ssh_search_key: String,
    pub creator_user_id: i64,
    pub date_created: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiToken {
    pub id: String,
    pub user_id: i64,
    pub project_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}
