use tracing::info;

use super::resolver::{AccessResolver, Actor};
use crate::config::AccessPolicy;
use crate::error::{Error, Result};
use crate::notify::{Event, Notifier, ProjectRef, deliver};
use crate::store::Store;
use crate::types::{AccessLevel, NamePattern, Project, User};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrantOutcome {
    Added,
    Updated,
}

/// ACL mutations on projects. Every mutation requires the actor to hold at
/// least admin access on the project (or be an instance administrator).
pub struct Grants<'a> {
    store: &'a dyn Store,
    policy: &'a AccessPolicy,
    notifier: &'a dyn Notifier,
}

impl<'a> Grants<'a> {
    pub fn new(store: &'a dyn Store, policy: &'a AccessPolicy, notifier: &'a dyn Notifier) -> Self {
        Self {
            store,
            policy,
            notifier,
        }
    }

    fn require_admin(&self, actor: &Actor, project: &Project) -> Result<()> {
        AccessResolver::new(self.store, self.policy).require(actor, project, AccessLevel::Admin)
    }

    /// Groups one of which a grantee of `project` must belong to, if any
    /// `required_groups` pattern matches its full name.
    fn required_groups(&self, project: &Project) -> Result<Vec<&'a str>> {
        let fullname = project.fullname();
        let policy: &'a AccessPolicy = self.policy;
        let mut required = Vec::new();
        for (key, groups) in &policy.required_groups {
            let pattern = NamePattern::parse(key)
                .map_err(|e| Error::Config(format!("required_groups pattern {key}: {e}")))?;
            if pattern.matches(&fullname) {
                required.extend(groups.iter().map(String::as_str));
            }
        }
        Ok(required)
    }

    fn check_required_groups(&self, project: &Project, user: &User) -> Result<()> {
        let required = self.required_groups(project)?;
        if required.is_empty() {
            return Ok(());
        }
        let memberships = self.store.list_user_groups(user.id)?;
        if memberships
            .iter()
            .any(|m| required.contains(&m.group_name.as_str()))
        {
            return Ok(());
        }
        Err(Error::Forbidden(format!(
            "This user must be in one of the following groups to be allowed to be added to \
             this project: {}",
            required.join(", ")
        )))
    }

    fn find_user(&self, username: &str) -> Result<User> {
        self.store
            .get_user_by_name(username)?
            .ok_or_else(|| Error::NotFound(format!("user {username}")))
    }

    pub fn add_user_to_project(
        &self,
        project: &Project,
        username: &str,
        access: AccessLevel,
        actor: &Actor,
    ) -> Result<GrantOutcome> {
        self.require_admin(actor, project)?;
        if !access.is_grantable() {
            return Err(Error::InvalidAccess(format!("{access} cannot be granted")));
        }

        let user = self.find_user(username)?;
        if user.id == project.user_id {
            return Err(Error::Conflict(
                "The owner of the project cannot be given an access level".to_string(),
            ));
        }
        if access != AccessLevel::Ticket {
            self.check_required_groups(project, &user)?;
        }

        let existing = self
            .store
            .list_user_grants(project.id)?
            .into_iter()
            .find(|acl| acl.user_id == user.id);
        if existing.as_ref().is_some_and(|acl| acl.access == access) {
            return Err(Error::Conflict(
                "This user is already listed on this project with the same access".to_string(),
            ));
        }

        self.store.upsert_user_grant(project.id, user.id, access)?;
        info!(project = %project.fullname(), user = %user.username, %access, "Granted user access");

        let project_ref = ProjectRef::from(project);
        let agent = actor.username().to_string();
        let (outcome, event) = match existing {
            Some(_) => (
                GrantOutcome::Updated,
                Event::ProjectUserAccessUpdated {
                    project: project_ref,
                    new_user: user.username,
                    new_access: access,
                    agent,
                },
            ),
            None => (
                GrantOutcome::Added,
                Event::ProjectUserAdded {
                    project: project_ref,
                    new_user: user.username,
                    access,
                    agent,
                },
            ),
        };
        deliver(self.notifier, event);
        Ok(outcome)
    }

    pub fn add_group_to_project(
        &self,
        project: &Project,
        group_name: &str,
        access: AccessLevel,
        actor: &Actor,
    ) -> Result<GrantOutcome> {
        self.require_admin(actor, project)?;
        if !access.is_grantable() {
            return Err(Error::InvalidAccess(format!("{access} cannot be granted")));
        }

        let group = self
            .store
            .get_group_by_name(group_name)?
            .ok_or_else(|| Error::NotFound(format!("group {group_name}")))?;
        if access != AccessLevel::Ticket {
            let required = self.required_groups(project)?;
            if !required.is_empty() && !required.contains(&group.group_name.as_str()) {
                return Err(Error::Forbidden(format!(
                    "This group must be one of the following groups to be allowed to be \
                     added to this project: {}",
                    required.join(", ")
                )));
            }
        }

        let existing = self
            .store
            .list_group_grants(project.id)?
            .into_iter()
            .find(|acl| acl.group_id == group.id);
        if existing.as_ref().is_some_and(|acl| acl.access == access) {
            return Err(Error::Conflict(
                "This group is already associated to this project with the same access"
                    .to_string(),
            ));
        }

        self.store.upsert_group_grant(project.id, group.id, access)?;
        info!(project = %project.fullname(), group = %group.group_name, %access, "Granted group access");

        let project_ref = ProjectRef::from(project);
        let agent = actor.username().to_string();
        let (outcome, event) = match existing {
            Some(_) => (
                GrantOutcome::Updated,
                Event::ProjectGroupAccessUpdated {
                    project: project_ref,
                    new_group: group.group_name,
                    new_access: access,
                    agent,
                },
            ),
            None => (
                GrantOutcome::Added,
                Event::ProjectGroupAdded {
                    project: project_ref,
                    new_group: group.group_name,
                    access,
                    agent,
                },
            ),
        };
        deliver(self.notifier, event);
        Ok(outcome)
    }

    /// Users may always drop their own access.
    pub fn remove_user_from_project(
        &self,
        project: &Project,
        username: &str,
        actor: &Actor,
    ) -> Result<()> {
        let user = self.find_user(username)?;
        if user.id != actor.id() {
            self.require_admin(actor, project)?;
        }

        if !self.store.delete_user_grant(project.id, user.id)? {
            return Err(Error::NotFound(format!(
                "{username} has no access on {}",
                project.fullname()
            )));
        }
        info!(project = %project.fullname(), user = %username, "Removed user access");

        deliver(
            self.notifier,
            Event::ProjectUserRemoved {
                project: ProjectRef::from(project),
                removed_user: user.username,
                agent: actor.username().to_string(),
            },
        );
        Ok(())
    }

    pub fn remove_group_from_project(
        &self,
        project: &Project,
        group_name: &str,
        actor: &Actor,
    ) -> Result<()> {
        self.require_admin(actor, project)?;
        let group = self
            .store
            .get_group_by_name(group_name)?
            .ok_or_else(|| Error::NotFound(format!("group {group_name}")))?;

        if !self.store.delete_group_grant(project.id, group.id)? {
            return Err(Error::NotFound(format!(
                "{group_name} has no access on {}",
                project.fullname()
            )));
        }
        info!(project = %project.fullname(), group = %group_name, "Removed group access");

        deliver(
            self.notifier,
            Event::ProjectGroupRemoved {
                project: ProjectRef::from(project),
                removed_group: group.group_name,
                agent: actor.username().to_string(),
            },
        );
        Ok(())
    }

    /// Gives `project` to `new_owner`. Only the current owner or an instance
    /// administrator may do so.
    pub fn set_project_owner(
        &self,
        project: &Project,
        new_owner: &str,
        actor: &Actor,
    ) -> Result<Project> {
        if actor.id() != project.user_id && !actor.is_instance_admin {
            return Err(Error::Forbidden(format!(
                "only the owner of {} can give it away",
                project.fullname()
            )));
        }

        let user = self.find_user(new_owner)?;
        if user.id == project.user_id {
            return Err(Error::Conflict(format!(
                "{new_owner} already owns {}",
                project.fullname()
            )));
        }
        self.check_required_groups(project, &user)?;

        let old_owner = self
            .store
            .get_user(project.user_id)?
            .map(|u| u.username)
            .unwrap_or_default();
        self.store.set_project_owner(project.id, user.id)?;
        let updated = self
            .store
            .get_project(project.id)?
            .ok_or_else(|| Error::NotFound(format!("project {}", project.id)))?;
        info!(project = %project.fullname(), owner = %new_owner, "Changed project owner");

        deliver(
            self.notifier,
            Event::ProjectOwnerUpdated {
                project: ProjectRef::from(&updated),
                new_owner: user.username,
                old_owner,
                agent: actor.username().to_string(),
            },
        );
        Ok(updated)
    }
}
