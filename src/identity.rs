use tracing::info;

use crate::access::{Actor, validate_group_name, validate_username};
use crate::config::ForgeConfig;
use crate::error::{Error, Result};
use crate::notify::{Event, Notifier, deliver};
use crate::store::Store;
use crate::types::{Group, User};

/// Group type every user may create.
pub const USER_GROUP_TYPE: &str = "user";

/// User and group management.
pub struct Identity<'a> {
    store: &'a dyn Store,
    config: &'a ForgeConfig,
    notifier: &'a dyn Notifier,
}

impl<'a> Identity<'a> {
    pub fn new(store: &'a dyn Store, config: &'a ForgeConfig, notifier: &'a dyn Notifier) -> Self {
        Self {
            store,
            config,
            notifier,
        }
    }

    pub fn create_user(
        &self,
        username: &str,
        fullname: Option<&str>,
        default_email: Option<&str>,
    ) -> Result<User> {
        validate_username(username)?;
        self.store
            .create_user(username, fullname, default_email)
            .map_err(|e| {
                if e.is_unique_violation() {
                    Error::Conflict(format!("user {username} or its email already exists"))
                } else {
                    e
                }
            })
    }

    pub fn add_user_email(&self, username: &str, email: &str) -> Result<()> {
        let user = self.find_user(username)?;
        self.store.add_user_email(user.id, email).map_err(|e| {
            if e.is_unique_violation() {
                Error::Conflict(format!("email {email} is already in use"))
            } else {
                e
            }
        })
    }

    /// Creates a group with `creator` as its first, admin, member. Only
    /// instance administrators may pick a group type other than `user`.
    pub fn create_group(
        &self,
        group_name: &str,
        display_name: &str,
        description: Option<&str>,
        group_type: &str,
        creator: &Actor,
    ) -> Result<Group> {
        validate_group_name(group_name, &self.config.naming.group_blacklist)?;

        let group_type = if creator.is_instance_admin {
            group_type
        } else {
            USER_GROUP_TYPE
        };
        if !self.store.group_type_exists(group_type)? {
            return Err(Error::Conflict(format!("invalid group type {group_type}")));
        }
        if self.store.get_group_by_name(group_name)?.is_some() {
            return Err(Error::Conflict(format!(
                "There is already a group named {group_name}"
            )));
        }
        if self.store.get_group_by_display_name(display_name)?.is_some() {
            return Err(Error::Conflict(format!(
                "There is already a group with display name `{display_name}` created."
            )));
        }

        let group = self.store.create_group(
            group_name,
            display_name,
            description,
            group_type,
            creator.id(),
        )?;
        info!(group = %group_name, creator = %creator.username(), "Created group");
        deliver(
            self.notifier,
            Event::GroupNew {
                group: group.group_name.clone(),
                agent: creator.username().to_string(),
            },
        );
        Ok(group)
    }

    fn find_user(&self, username: &str) -> Result<User> {
        self.store
            .get_user_by_name(username)?
            .ok_or_else(|| Error::NotFound(format!("user {username}")))
    }

    fn find_group(&self, group_name: &str) -> Result<Group> {
        self.store
            .get_group_by_name(group_name)?
            .ok_or_else(|| Error::NotFound(format!("group {group_name}")))
    }

    /// Group members, the group creator and instance administrators may
    /// manage membership.
    fn require_group_manager(&self, group: &Group, actor: &Actor) -> Result<()> {
        if actor.is_instance_admin
            || actor.id() == group.creator_id
            || actor.groups.contains(&group.group_name)
        {
            return Ok(());
        }
        Err(Error::Forbidden(format!(
            "{} may not manage group {}",
            actor.username(),
            group.group_name
        )))
    }

    /// Returns false when the user already was a member.
    pub fn add_user_to_group(
        &self,
        group_name: &str,
        username: &str,
        is_admin: bool,
        actor: &Actor,
    ) -> Result<bool> {
        let group = self.find_group(group_name)?;
        self.require_group_manager(&group, actor)?;
        let user = self.find_user(username)?;

        if !self.store.add_group_member(group.id, user.id, is_admin)? {
            return Ok(false);
        }
        info!(group = %group_name, user = %username, "Added user to group");
        deliver(
            self.notifier,
            Event::GroupUserAdded {
                group: group.group_name,
                new_user: user.username,
                agent: actor.username().to_string(),
            },
        );
        Ok(true)
    }

    /// The group creator stays unless `force` is set.
    pub fn remove_user_from_group(
        &self,
        group_name: &str,
        username: &str,
        actor: &Actor,
        force: bool,
    ) -> Result<()> {
        let group = self.find_group(group_name)?;
        self.require_group_manager(&group, actor)?;
        let user = self.find_user(username)?;

        if user.id == group.creator_id && !force {
            return Err(Error::Forbidden(format!(
                "The creator of group {group_name} cannot be removed"
            )));
        }
        if !self.store.remove_group_member(group.id, user.id)? {
            return Err(Error::NotFound(format!(
                "{username} is not a member of {group_name}"
            )));
        }
        info!(group = %group_name, user = %username, "Removed user from group");
        deliver(
            self.notifier,
            Event::GroupUserRemoved {
                group: group.group_name,
                removed_user: user.username,
                agent: actor.username().to_string(),
            },
        );
        Ok(())
    }
}
