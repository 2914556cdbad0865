use std::collections::BTreeSet;

use crate::config::AccessPolicy;
use crate::error::{Error, Result};
use crate::store::Store;
use crate::types::{Access, AccessLevel, Project, ProjectAcls, User};

/// An authenticated user together with what access resolution needs to know
/// about them.
#[derive(Debug, Clone)]
pub struct Actor {
    pub user: User,
    pub groups: BTreeSet<String>,
    pub is_instance_admin: bool,
}

impl Actor {
    pub fn new(user: User, groups: impl IntoIterator<Item = String>, policy: &AccessPolicy) -> Self {
        let groups: BTreeSet<String> = groups.into_iter().collect();
        let is_instance_admin = policy.admin_users.iter().any(|u| *u == user.username)
            || policy.admin_groups.iter().any(|g| groups.contains(g));
        Self {
            user,
            groups,
            is_instance_admin,
        }
    }

    pub fn id(&self) -> i64 {
        self.user.id
    }

    pub fn username(&self) -> &str {
        &self.user.username
    }

    /// The same actor with the `exclude` group memberships dropped. Instance
    /// admin status is kept.
    pub fn without_groups(&self, exclude: &BTreeSet<String>) -> Actor {
        Actor {
            user: self.user.clone(),
            groups: self.groups.difference(exclude).cloned().collect(),
            is_instance_admin: self.is_instance_admin,
        }
    }
}

/// Ticket fields a change request may touch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TicketField {
    Title,
    Content,
    Status,
    CloseStatus,
    Tags,
    Assignee,
    Milestone,
    Priority,
    CustomFields,
    Dependencies,
    Private,
}

impl TicketField {
    /// Fields anyone allowed onto the restricted path may edit on their own
    /// tickets. Status changes are never part of it.
    pub const OPEN_METADATA: [TicketField; 6] = [
        TicketField::Tags,
        TicketField::Assignee,
        TicketField::Milestone,
        TicketField::Priority,
        TicketField::CustomFields,
        TicketField::Dependencies,
    ];

    pub fn is_open_metadata(self) -> bool {
        Self::OPEN_METADATA.contains(&self)
    }
}

/// The part of a ticket that ticket permissions depend on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IssueRef {
    pub author_id: i64,
}

/// Computes what `actor` may do on `project` given the project's ACL rows.
///
/// The direct user grant and every group grant are folded with `max`; the
/// owner always gets [`AccessLevel::Owner`]. Without any grant, an
/// authenticated actor gets [`Access::MetadataOnly`] when the project opens
/// its metadata to all, and public projects fall back to
/// [`Access::PublicRead`].
pub fn resolve_access(actor: Option<&Actor>, project: &Project, acls: &ProjectAcls) -> Access {
    let public_floor = if project.private {
        Access::None
    } else {
        Access::PublicRead
    };

    let Some(actor) = actor else {
        return public_floor;
    };

    if actor.id() == project.effective_owner() {
        return Access::Granted(AccessLevel::Owner);
    }

    let direct = acls
        .users
        .iter()
        .filter(|acl| acl.project_id == project.id && acl.user_id == actor.id())
        .map(|acl| acl.access);
    let via_groups = acls
        .groups
        .iter()
        .filter(|acl| acl.project_id == project.id && actor.groups.contains(&acl.group_name))
        .map(|acl| acl.access);
    let candidate = direct.chain(via_groups).max().unwrap_or_default();

    if candidate != AccessLevel::None {
        return Access::Granted(candidate);
    }
    if project.settings.open_metadata_access_to_all {
        return Access::MetadataOnly;
    }
    public_floor
}

/// Whether `actor` may see `project` at all. Open metadata access does not
/// make a private project visible.
pub fn can_view(
    actor: Option<&Actor>,
    project: &Project,
    acls: &ProjectAcls,
    policy: &AccessPolicy,
) -> bool {
    if !project.private {
        return true;
    }
    match actor {
        None => false,
        Some(actor) if actor.is_instance_admin => true,
        Some(actor) => match resolve_access(Some(actor), project, acls) {
            Access::Granted(level) => level >= policy.min_view_level,
            _ => false,
        },
    }
}

/// Whether `actor` may apply a change touching `fields` to `issue`.
///
/// Committers may change anything. Below that, only the ticket's author may
/// edit it, only through the open metadata fields, and only when holding at
/// most collaborator access or the open metadata pseudo-level.
pub fn can_modify_ticket(
    actor: Option<&Actor>,
    project: &Project,
    acls: &ProjectAcls,
    issue: &IssueRef,
    fields: &[TicketField],
) -> bool {
    let Some(actor) = actor else {
        return false;
    };
    let access = resolve_access(Some(actor), project, acls);
    if access.at_least(AccessLevel::Commit) {
        return true;
    }

    let restricted = matches!(
        access,
        Access::MetadataOnly
            | Access::Granted(AccessLevel::Ticket)
            | Access::Granted(AccessLevel::Collaborator)
    );
    restricted
        && issue.author_id == actor.id()
        && fields.iter().all(|field| field.is_open_metadata())
}

/// Access `actor` would have if it were not a member of any group in
/// `exclude`.
pub fn exclude_groups_filter(
    actor: &Actor,
    project: &Project,
    acls: &ProjectAcls,
    exclude: &BTreeSet<String>,
) -> Access {
    resolve_access(Some(&actor.without_groups(exclude)), project, acls)
}

/// Loads actors and ACLs from a [`Store`] and answers access questions
/// against them. Only storage failures are errors.
pub struct AccessResolver<'a> {
    store: &'a dyn Store,
    policy: &'a AccessPolicy,
}

impl<'a> AccessResolver<'a> {
    pub fn new(store: &'a dyn Store, policy: &'a AccessPolicy) -> Self {
        Self { store, policy }
    }

    pub fn policy(&self) -> &AccessPolicy {
        self.policy
    }

    /// Loads `username` as an actor; `None` for unknown users.
    pub fn actor(&self, username: &str) -> Result<Option<Actor>> {
        let Some(user) = self.store.get_user_by_name(username)? else {
            return Ok(None);
        };
        let groups = self
            .store
            .list_user_groups(user.id)?
            .into_iter()
            .map(|m| m.group_name);
        Ok(Some(Actor::new(user, groups, self.policy)))
    }

    pub fn acls(&self, project_id: i64) -> Result<ProjectAcls> {
        Ok(ProjectAcls {
            users: self.store.list_user_grants(project_id)?,
            groups: self.store.list_group_grants(project_id)?,
        })
    }

    pub fn resolve_access(&self, actor: Option<&Actor>, project: &Project) -> Result<Access> {
        Ok(resolve_access(actor, project, &self.acls(project.id)?))
    }

    pub fn can_view(&self, actor: Option<&Actor>, project: &Project) -> Result<bool> {
        if !project.private {
            return Ok(true);
        }
        Ok(can_view(actor, project, &self.acls(project.id)?, self.policy))
    }

    pub fn can_modify_ticket(
        &self,
        actor: Option<&Actor>,
        project: &Project,
        issue: &IssueRef,
        fields: &[TicketField],
    ) -> Result<bool> {
        Ok(can_modify_ticket(
            actor,
            project,
            &self.acls(project.id)?,
            issue,
            fields,
        ))
    }

    /// Fails with `Forbidden` unless `actor` holds at least `level` on
    /// `project` or is an instance administrator.
    pub fn require(&self, actor: &Actor, project: &Project, level: AccessLevel) -> Result<()> {
        if actor.is_instance_admin || self.resolve_access(Some(actor), project)?.at_least(level) {
            return Ok(());
        }
        Err(Error::Forbidden(format!(
            "{} needs {level} access on {}",
            actor.username(),
            project.fullname()
        )))
    }

    pub fn exclude_groups_filter(
        &self,
        actor: &Actor,
        project: &Project,
        exclude: &BTreeSet<String>,
    ) -> Result<Access> {
        Ok(exclude_groups_filter(
            actor,
            project,
            &self.acls(project.id)?,
            exclude,
        ))
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::types::{ProjectGroupAcl, ProjectSettings, ProjectUserAcl};

    const OWNER: i64 = 1;
    const FOO: i64 = 2;

    fn user(id: i64, username: &str) -> User {
        User {
            id,
            username: username.to_string(),
            fullname: None,
            default_email: None,
            created_at: Utc::now(),
        }
    }

    fn actor(id: i64, username: &str, groups: &[&str]) -> Actor {
        Actor::new(
            user(id, username),
            groups.iter().map(|g| g.to_string()),
            &AccessPolicy::default(),
        )
    }

    fn project(private: bool) -> Project {
        Project {
            id: 10,
            user_id: OWNER,
            namespace: None,
            name: "test".to_string(),
            description: None,
            parent_id: None,
            private,
            hook_token: String::new(),
            settings: ProjectSettings::default(),
            repo_path: "test.git".to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn user_acl(user_id: i64, access: AccessLevel) -> ProjectUserAcl {
        ProjectUserAcl {
            project_id: 10,
            user_id,
            username: format!("user{user_id}"),
            access,
        }
    }

    fn group_acl(group_name: &str, access: AccessLevel) -> ProjectGroupAcl {
        ProjectGroupAcl {
            project_id: 10,
            group_id: 100,
            group_name: group_name.to_string(),
            access,
        }
    }

    #[test]
    fn test_anonymous() {
        let acls = ProjectAcls::default();
        assert_eq!(resolve_access(None, &project(false), &acls), Access::PublicRead);
        assert_eq!(resolve_access(None, &project(true), &acls), Access::None);
    }

    #[test]
    fn test_anonymous_never_gets_metadata_access() {
        let mut p = project(true);
        p.settings.open_metadata_access_to_all = true;
        assert_eq!(resolve_access(None, &p, &ProjectAcls::default()), Access::None);
    }

    #[test]
    fn test_owner_supremacy() {
        let owner = actor(OWNER, "pingou", &["packagers"]);
        let acls = ProjectAcls {
            users: vec![user_acl(OWNER, AccessLevel::Ticket)],
            groups: vec![group_acl("packagers", AccessLevel::Commit)],
        };
        for private in [false, true] {
            assert_eq!(
                resolve_access(Some(&owner), &project(private), &acls),
                Access::Granted(AccessLevel::Owner)
            );
        }
    }

    #[test]
    fn test_max_not_override() {
        let foo = actor(FOO, "foo", &["admins"]);
        let acls = ProjectAcls {
            users: vec![user_acl(FOO, AccessLevel::Ticket)],
            groups: vec![group_acl("admins", AccessLevel::Admin)],
        };
        assert_eq!(
            resolve_access(Some(&foo), &project(true), &acls),
            Access::Granted(AccessLevel::Admin)
        );

        let acls = ProjectAcls {
            users: vec![user_acl(FOO, AccessLevel::Commit)],
            groups: vec![group_acl("admins", AccessLevel::Ticket)],
        };
        assert_eq!(
            resolve_access(Some(&foo), &project(true), &acls),
            Access::Granted(AccessLevel::Commit)
        );
    }

    #[test]
    fn test_grants_are_monotonic() {
        let foo = actor(FOO, "foo", &["packagers"]);
        let mut p = project(true);
        for open_metadata in [false, true] {
            p.settings.open_metadata_access_to_all = open_metadata;
            for private in [false, true] {
                p.private = private;
                let mut acls = ProjectAcls::default();
                let mut previous = resolve_access(Some(&foo), &p, &acls);
                for level in AccessLevel::GRANTABLE {
                    acls.groups.push(group_acl("packagers", level));
                    let now = resolve_access(Some(&foo), &p, &acls);
                    assert!(now >= previous, "{now} < {previous}");
                    previous = now;

                    acls.users.push(user_acl(FOO, level));
                    let now = resolve_access(Some(&foo), &p, &acls);
                    assert!(now >= previous, "{now} < {previous}");
                    previous = now;
                }
            }
        }
    }

    #[test]
    fn test_unrelated_grants_are_ignored() {
        let foo = actor(FOO, "foo", &[]);
        let mut other_project = user_acl(FOO, AccessLevel::Admin);
        other_project.project_id = 99;
        let acls = ProjectAcls {
            users: vec![other_project, user_acl(3, AccessLevel::Admin)],
            groups: vec![group_acl("packagers", AccessLevel::Admin)],
        };
        assert_eq!(resolve_access(Some(&foo), &project(true), &acls), Access::None);
    }

    #[test]
    fn test_private_visibility() {
        let policy = AccessPolicy::default();
        let p = project(true);
        let acls = ProjectAcls {
            users: vec![user_acl(FOO, AccessLevel::Ticket)],
            groups: vec![],
        };

        assert!(!can_view(None, &p, &acls, &policy));
        assert!(can_view(Some(&actor(FOO, "foo", &[])), &p, &acls, &policy));
        assert!(!can_view(Some(&actor(3, "bar", &[])), &p, &acls, &policy));
        assert!(can_view(None, &project(false), &acls, &policy));

        let strict = AccessPolicy {
            min_view_level: AccessLevel::Commit,
            ..Default::default()
        };
        assert!(!can_view(Some(&actor(FOO, "foo", &[])), &p, &acls, &strict));
    }

    #[test]
    fn test_instance_admin_sees_everything() {
        let policy = AccessPolicy {
            admin_groups: vec!["sysadmin".to_string()],
            ..Default::default()
        };
        let admin = Actor::new(user(5, "admin"), ["sysadmin".to_string()], &policy);
        assert!(admin.is_instance_admin);
        assert!(can_view(Some(&admin), &project(true), &ProjectAcls::default(), &policy));
    }

    #[test]
    fn test_open_metadata_does_not_grant_view() {
        let mut p = project(true);
        p.settings.open_metadata_access_to_all = true;
        let bar = actor(3, "bar", &[]);
        let acls = ProjectAcls::default();
        assert_eq!(resolve_access(Some(&bar), &p, &acls), Access::MetadataOnly);
        assert!(!can_view(Some(&bar), &p, &acls, &AccessPolicy::default()));
    }

    #[test]
    fn test_open_metadata_ceiling() {
        let mut p = project(false);
        p.settings.open_metadata_access_to_all = true;
        let acls = ProjectAcls::default();
        let bar = actor(3, "bar", &[]);
        let own = IssueRef { author_id: 3 };

        assert!(can_modify_ticket(
            Some(&bar),
            &p,
            &acls,
            &own,
            &[TicketField::Tags, TicketField::Assignee]
        ));
        assert!(!can_modify_ticket(
            Some(&bar),
            &p,
            &acls,
            &own,
            &[TicketField::Status]
        ));
        assert!(!can_modify_ticket(
            Some(&bar),
            &p,
            &acls,
            &own,
            &[TicketField::Tags, TicketField::CloseStatus]
        ));
        assert!(!can_modify_ticket(
            Some(&bar),
            &p,
            &acls,
            &IssueRef { author_id: 4 },
            &[TicketField::Tags]
        ));
        assert!(!can_modify_ticket(None, &p, &acls, &own, &[TicketField::Tags]));
    }

    #[test]
    fn test_committers_modify_anything() {
        let p = project(false);
        let acls = ProjectAcls {
            users: vec![user_acl(FOO, AccessLevel::Commit)],
            groups: vec![],
        };
        assert!(can_modify_ticket(
            Some(&actor(FOO, "foo", &[])),
            &p,
            &acls,
            &IssueRef { author_id: 42 },
            &[TicketField::Status, TicketField::CloseStatus]
        ));
    }

    #[test]
    fn test_exclude_groups_filter() {
        let foo = actor(FOO, "foo", &["provenpackager", "packagers"]);
        let acls = ProjectAcls {
            users: vec![],
            groups: vec![
                group_acl("provenpackager", AccessLevel::Commit),
                group_acl("packagers", AccessLevel::Ticket),
            ],
        };
        let exclude: BTreeSet<String> = ["provenpackager".to_string()].into();
        assert_eq!(
            resolve_access(Some(&foo), &project(true), &acls),
            Access::Granted(AccessLevel::Commit)
        );
        assert_eq!(
            exclude_groups_filter(&foo, &project(true), &acls, &exclude),
            Access::Granted(AccessLevel::Ticket)
        );
    }
}
