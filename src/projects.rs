use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{info, warn};

use crate::access::{AccessResolver, Actor};
use crate::config::AccessPolicy;
use crate::error::{Error, Result};
use crate::lifecycle::repo_relpath;
use crate::notify::{Event, Notifier, ProjectRef, deliver};
use crate::store::Store;
use crate::tokens::generate_token;
use crate::types::{AccessLevel, ApiToken, Project, ProjectSettings};

/// Fork chains longer than this are treated as corrupt.
const MAX_FORK_DEPTH: usize = 64;

/// Settings keys whose values differ between `old` and `new`, in key order.
fn changed_settings(old: &ProjectSettings, new: &ProjectSettings) -> Result<Vec<String>> {
    let (Value::Object(old), Value::Object(new)) =
        (serde_json::to_value(old)?, serde_json::to_value(new)?)
    else {
        return Ok(Vec::new());
    };
    let mut keys: Vec<String> = old
        .iter()
        .filter(|(key, value)| new.get(*key) != Some(*value))
        .map(|(key, _)| key.clone())
        .chain(new.keys().filter(|key| !old.contains_key(*key)).cloned())
        .collect();
    keys.sort();
    Ok(keys)
}

/// Project lookups and the per-project administration that does not touch
/// repositories: settings, hook tokens and API tokens.
pub struct Projects<'a> {
    store: &'a dyn Store,
    policy: &'a AccessPolicy,
    notifier: &'a dyn Notifier,
}

impl<'a> Projects<'a> {
    pub fn new(store: &'a dyn Store, policy: &'a AccessPolicy, notifier: &'a dyn Notifier) -> Self {
        Self {
            store,
            policy,
            notifier,
        }
    }

    fn resolver(&self) -> AccessResolver<'a> {
        AccessResolver::new(self.store, self.policy)
    }

    /// The project at `[forks/<fork_owner>/][namespace/]name`, if it exists
    /// and `viewer` may see it.
    pub fn get_authorized_project(
        &self,
        name: &str,
        namespace: Option<&str>,
        fork_owner: Option<&str>,
        viewer: Option<&Actor>,
    ) -> Result<Option<Project>> {
        let path = repo_relpath(fork_owner, namespace, name);
        let Some(project) = self.store.get_project_by_path(&path)? else {
            return Ok(None);
        };
        if !self.resolver().can_view(viewer, &project)? {
            return Ok(None);
        }
        Ok(Some(project))
    }

    /// The root of `project`'s fork tree, its forks and their forks.
    pub fn get_project_family(&self, project: &Project) -> Result<Vec<Project>> {
        let mut root = project.clone();
        let mut depth = 0;
        while let Some(parent_id) = root.parent_id {
            depth += 1;
            if depth > MAX_FORK_DEPTH {
                return Err(Error::Conflict(format!(
                    "fork chain of {} is deeper than {MAX_FORK_DEPTH}",
                    project.fullname()
                )));
            }
            match self.store.get_project(parent_id)? {
                Some(parent) => root = parent,
                None => break,
            }
        }

        let forks = self.store.list_forks(root.id)?;
        let mut family = vec![root];
        let mut grandchildren = Vec::new();
        for fork in &forks {
            grandchildren.extend(self.store.list_forks(fork.id)?);
        }
        family.extend(forks);
        family.extend(grandchildren);
        Ok(family)
    }

    /// Replaces the project's settings. Returns the project unchanged, and
    /// notifies nobody, when nothing differs.
    pub fn update_project_settings(
        &self,
        project: &Project,
        settings: ProjectSettings,
        actor: &Actor,
    ) -> Result<Project> {
        self.resolver()
            .require(actor, project, AccessLevel::Admin)?;

        let fields = changed_settings(&project.settings, &settings)?;
        if fields.is_empty() {
            return Ok(project.clone());
        }

        let updated = Project {
            settings,
            ..project.clone()
        };
        self.store.update_project(&updated)?;
        info!(project = %project.fullname(), fields = ?fields, "Updated project settings");

        deliver(
            self.notifier,
            Event::ProjectSettingsUpdated {
                project: ProjectRef::from(&updated),
                fields,
                agent: actor.username().to_string(),
            },
        );
        Ok(updated)
    }

    pub fn regenerate_hook_token(&self, project: &Project, actor: &Actor) -> Result<Project> {
        self.resolver()
            .require(actor, project, AccessLevel::Admin)?;
        let updated = self.store_new_hook_token(project)?;
        info!(project = %project.fullname(), "Regenerated hook token");
        deliver(
            self.notifier,
            Event::HookTokenRegenerated {
                project: ProjectRef::from(&updated),
            },
        );
        Ok(updated)
    }

    fn store_new_hook_token(&self, project: &Project) -> Result<Project> {
        let updated = Project {
            hook_token: generate_token(),
            ..project.clone()
        };
        self.store.update_project(&updated)?;
        Ok(updated)
    }

    /// Gives every project a fresh hook token. Returns how many were
    /// regenerated; a project that fails is logged and skipped.
    pub fn generate_hook_tokens(&self) -> Result<usize> {
        let mut regenerated = 0;
        for project in self.store.list_all_projects()? {
            match self.store_new_hook_token(&project) {
                Ok(_) => regenerated += 1,
                Err(e) => warn!(project = %project.fullname(), "Failed to regenerate hook token: {e}"),
            }
        }
        info!(count = regenerated, "Regenerated hook tokens");
        Ok(regenerated)
    }

    pub fn create_api_token(
        &self,
        project: &Project,
        description: Option<&str>,
        expires_at: Option<DateTime<Utc>>,
        actor: &Actor,
    ) -> Result<ApiToken> {
        self.resolver()
            .require(actor, project, AccessLevel::Admin)?;
        let token = ApiToken {
            id: generate_token(),
            user_id: actor.id(),
            project_id: project.id,
            description: description.map(str::to_string),
            created_at: Utc::now(),
            expires_at,
        };
        self.store.create_token(&token)?;
        info!(project = %project.fullname(), user = %actor.username(), "Created API token");
        Ok(token)
    }

    pub fn list_project_tokens(&self, project: &Project, actor: &Actor) -> Result<Vec<ApiToken>> {
        self.resolver()
            .require(actor, project, AccessLevel::Admin)?;
        self.store.list_project_tokens(project.id)
    }
}
