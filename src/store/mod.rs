mod schema;
mod sqlite;

pub use sqlite::{DEFAULT_BUSY_TIMEOUT, SqliteSession, SqliteStore};

use crate::error::Result;
use crate::types::*;

/// Store defines the database interface used outside of the project
/// lifecycle: reads and single-statement writes, each committed on its own.
pub trait Store: Send + Sync {
    fn initialize(&self) -> Result<()>;

    // User operations
    fn create_user(
        &self,
        username: &str,
        fullname: Option<&str>,
        default_email: Option<&str>,
    ) -> Result<User>;
    fn get_user(&self, id: i64) -> Result<Option<User>>;
    fn get_user_by_name(&self, username: &str) -> Result<Option<User>>;
    fn add_user_email(&self, user_id: i64, email: &str) -> Result<()>;
    fn list_user_emails(&self, user_id: i64) -> Result<Vec<UserEmail>>;
    fn list_user_groups(&self, user_id: i64) -> Result<Vec<GroupMembership>>;

    // Group operations
    fn group_type_exists(&self, group_type: &str) -> Result<bool>;
    /// Inserts the group and its creator as an admin member.
    fn create_group(
        &self,
        group_name: &str,
        display_name: &str,
        description: Option<&str>,
        group_type: &str,
        creator_id: i64,
    ) -> Result<Group>;
    fn get_group_by_name(&self, group_name: &str) -> Result<Option<Group>>;
    fn get_group_by_display_name(&self, display_name: &str) -> Result<Option<Group>>;
    /// Returns false if the user was already a member.
    fn add_group_member(&self, group_id: i64, user_id: i64, is_admin: bool) -> Result<bool>;
    fn remove_group_member(&self, group_id: i64, user_id: i64) -> Result<bool>;
    fn list_group_members(&self, group_id: i64) -> Result<Vec<GroupMembership>>;

    // Project operations
    fn get_project(&self, id: i64) -> Result<Option<Project>>;
    fn get_project_by_path(&self, repo_path: &str) -> Result<Option<Project>>;
    fn list_forks(&self, parent_id: i64) -> Result<Vec<Project>>;
    fn list_all_projects(&self) -> Result<Vec<Project>>;
    fn update_project(&self, project: &Project) -> Result<()>;
    /// Moves ownership and drops the new owner's ACL row in one transaction.
    fn set_project_owner(&self, project_id: i64, user_id: i64) -> Result<()>;
    fn query_projects(&self, filter: &ProjectFilter) -> Result<Vec<Project>>;
    fn count_projects(&self, filter: &ProjectFilter) -> Result<u64>;

    // ACL operations
    fn list_user_grants(&self, project_id: i64) -> Result<Vec<ProjectUserAcl>>;
    fn list_group_grants(&self, project_id: i64) -> Result<Vec<ProjectGroupAcl>>;
    fn upsert_user_grant(&self, project_id: i64, user_id: i64, access: AccessLevel) -> Result<()>;
    fn delete_user_grant(&self, project_id: i64, user_id: i64) -> Result<bool>;
    fn upsert_group_grant(&self, project_id: i64, group_id: i64, access: AccessLevel)
    -> Result<()>;
    fn delete_group_grant(&self, project_id: i64, group_id: i64) -> Result<bool>;

    // Deploy key operations
    fn create_deploy_key(&self, key: &DeployKey) -> Result<DeployKey>;
    fn list_deploy_keys(&self, project_id: i64) -> Result<Vec<DeployKey>>;
    fn find_deploy_keys(&self, ssh_search_key: &str) -> Result<Vec<DeployKey>>;
    fn delete_deploy_key(&self, id: i64) -> Result<bool>;

    // API token operations
    fn create_token(&self, token: &ApiToken) -> Result<()>;
    fn list_project_tokens(&self, project_id: i64) -> Result<Vec<ApiToken>>;
}

/// Hands out explicit transaction handles.
pub trait Transactional: Send + Sync {
    fn begin(&self) -> Result<Box<dyn Session + '_>>;
}

/// One database transaction. Dropping a session without calling `commit`
/// rolls it back.
pub trait Session {
    fn get_user_by_name(&mut self, username: &str) -> Result<Option<User>>;
    fn list_user_group_names(&mut self, user_id: i64) -> Result<Vec<String>>;
    fn get_project(&mut self, id: i64) -> Result<Option<Project>>;
    /// Inserts without committing. A uniqueness conflict surfaces here.
    fn insert_project(&mut self, project: &NewProject) -> Result<Project>;
    /// Turns the forks of `parent_id` into standalone projects.
    fn detach_forks(&mut self, parent_id: i64) -> Result<usize>;
    /// Deletes the row; tokens, ACLs and deploy keys go by cascade.
    fn delete_project(&mut self, id: i64) -> Result<bool>;
    fn commit(self: Box<Self>) -> Result<()>;
}
