use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, error, info, info_span, warn};
use uuid::Uuid;

use super::folders::{RepoFolders, RepoKind, RepoTarget, repo_relpath};
use super::git::{GitBackend, write_export_ok};
use super::saga::{self, LifecycleState, Saga};
use crate::access::{effective_namespace, validate_project_name};
use crate::config::NamingPolicy;
use crate::error::{Error, Result};
use crate::notify::{Event, Notifier, ProjectRef, deliver};
use crate::store::{Session, Transactional};
use crate::tokens::generate_token;
use crate::types::{NewProject, Project, ProjectSettings};

/// Parameters of [`RepoSetLifecycle::create_project`].
#[derive(Debug, Clone, Default)]
pub struct NewProjectRequest {
    pub owner: String,
    pub name: String,
    pub namespace: Option<String>,
    pub description: Option<String>,
    pub private: bool,
    /// Registers the new project as a fork of this project. Its repositories
    /// are still created empty.
    pub parent_id: Option<i64>,
    pub settings: Option<ProjectSettings>,
}

impl NewProjectRequest {
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    #[must_use]
    pub fn private(mut self, private: bool) -> Self {
        self.private = private;
        self
    }
}

/// Keeps a project row and its repositories consistent through creation,
/// forking and deletion.
///
/// Every operation inserts or deletes the row inside a database session,
/// performs the filesystem work while recording a compensation for each
/// step, then commits. A failure anywhere before the commit returns has
/// unwound every completed filesystem step and rolled the session back. The
/// database uniqueness constraints decide which of two racing operations
/// wins, before either touches the filesystem.
pub struct RepoSetLifecycle<'a> {
    db: &'a dyn Transactional,
    git: &'a dyn GitBackend,
    notifier: &'a dyn Notifier,
    naming: &'a NamingPolicy,
    folders: &'a RepoFolders,
}

impl<'a> RepoSetLifecycle<'a> {
    pub fn new(
        db: &'a dyn Transactional,
        git: &'a dyn GitBackend,
        notifier: &'a dyn Notifier,
        naming: &'a NamingPolicy,
        folders: &'a RepoFolders,
    ) -> Self {
        Self {
            db,
            git,
            notifier,
            naming,
            folders,
        }
    }

    pub fn folders(&self) -> &RepoFolders {
        self.folders
    }

    pub fn create_project(&self, request: &NewProjectRequest) -> Result<Project> {
        let span = info_span!(
            "create_project",
            op = %Uuid::new_v4(),
            owner = %request.owner,
            name = %request.name,
        );
        let _enter = span.enter();

        saga::enter(LifecycleState::Validating);
        let mut session = self.db.begin()?;
        let owner = session
            .get_user_by_name(&request.owner)?
            .ok_or_else(|| Error::NotFound(format!("user {}", request.owner)))?;
        let groups = session.list_user_group_names(owner.id)?;
        let namespace = effective_namespace(
            self.naming,
            &owner.username,
            request.namespace.as_deref(),
            request.private,
        );
        validate_project_name(
            self.naming,
            &owner.username,
            namespace.as_deref(),
            &request.name,
            &groups,
            request.private,
        )?;

        if let Some(parent_id) = request.parent_id {
            if session.get_project(parent_id)?.is_none() {
                return Err(Error::NotFound(format!("project {parent_id}")));
            }
        }
        let fork_owner = request.parent_id.map(|_| owner.username.as_str());
        let repo_path = repo_relpath(fork_owner, namespace.as_deref(), &request.name);
        let targets = self.folders.targets(&repo_path)?;

        let project = session.insert_project(&NewProject {
            user_id: owner.id,
            namespace,
            name: request.name.clone(),
            description: request.description.clone(),
            parent_id: request.parent_id,
            private: request.private,
            hook_token: generate_token(),
            settings: request.settings.clone().unwrap_or_default(),
            repo_path,
        })?;
        ensure_absent(&targets)?;

        saga::enter(LifecycleState::ReposCreating);
        let mut saga = Saga::new();
        for target in &targets {
            provision(&mut saga, target, || self.git.init_bare(&target.path))?;
        }

        commit(session, saga)?;
        self.export(&project);

        deliver(
            self.notifier,
            Event::ProjectNew {
                project: ProjectRef::from(&project),
                agent: owner.username,
            },
        );
        saga::enter(LifecycleState::Done);
        info!(path = %project.repo_path, id = project.id, "Created project");
        Ok(project)
    }

    /// Forks `source` into `forker`'s forks. Code, docs and tickets are
    /// cloned from the source; the requests repository starts empty.
    pub fn fork_project(&self, source: &Project, forker: &str) -> Result<Project> {
        let span = info_span!(
            "fork_project",
            op = %Uuid::new_v4(),
            source = %source.repo_path,
            forker = %forker,
        );
        let _enter = span.enter();

        saga::enter(LifecycleState::Validating);
        let mut session = self.db.begin()?;
        let user = session
            .get_user_by_name(forker)?
            .ok_or_else(|| Error::NotFound(format!("user {forker}")))?;
        let source = session
            .get_project(source.id)?
            .ok_or_else(|| Error::NotFound(format!("project {}", source.fullname())))?;
        if source.user_id == user.id {
            return Err(Error::SelfFork(format!(
                "{forker} already owns {}",
                source.fullname()
            )));
        }

        let repo_path = repo_relpath(Some(forker), source.namespace.as_deref(), &source.name);
        let targets = self.folders.targets(&repo_path)?;

        let project = session.insert_project(&NewProject {
            user_id: user.id,
            namespace: source.namespace.clone(),
            name: source.name.clone(),
            description: source.description.clone(),
            parent_id: Some(source.id),
            private: source.private,
            hook_token: generate_token(),
            settings: ProjectSettings::for_fork(&source.settings),
            repo_path,
        })?;
        ensure_absent(&targets)?;

        saga::enter(LifecycleState::ReposCreating);
        let mut saga = Saga::new();
        for target in &targets {
            let kind = target.kind;
            let dest = &target.path;
            let upstream = match kind {
                RepoKind::Requests => None,
                _ => self
                    .folders
                    .path_for(kind, &source.repo_path)
                    .filter(|p| p.exists()),
            };
            match upstream {
                Some(upstream) => provision(&mut saga, target, || {
                    self.git.clone_bare(&upstream, dest)
                })?,
                None => {
                    if kind != RepoKind::Requests {
                        warn!(%kind, "Source repository missing, initializing an empty one");
                    }
                    provision(&mut saga, target, || self.git.init_bare(dest))?
                }
            }
        }

        commit(session, saga)?;
        self.export(&project);

        deliver(
            self.notifier,
            Event::ProjectForked {
                project: ProjectRef::from(&project),
                parent: ProjectRef::from(&source),
                agent: user.username,
            },
        );
        saga::enter(LifecycleState::Done);
        info!(path = %project.repo_path, id = project.id, "Forked project");
        Ok(project)
    }

    /// Deletes `project` and its repositories. Its forks become standalone
    /// projects and keep their repositories; ACLs, tokens and deploy keys go
    /// with the row.
    pub fn delete_project(&self, project: &Project, agent: &str) -> Result<()> {
        let op = Uuid::new_v4();
        let span = info_span!("delete_project", %op, path = %project.repo_path);
        let _enter = span.enter();

        saga::enter(LifecycleState::Validating);
        let mut session = self.db.begin()?;
        let project = session
            .get_project(project.id)?
            .ok_or_else(|| Error::NotFound(format!("project {}", project.fullname())))?;
        let targets = self.folders.targets(&project.repo_path)?;

        let detached = session.detach_forks(project.id)?;
        session.delete_project(project.id)?;

        saga::enter(LifecycleState::ReposCreating);
        let mut saga = Saga::new();
        let mut trashed = Vec::new();
        for RepoTarget { kind, path, .. } in targets {
            if !path.exists() {
                debug!(%kind, path = %path.display(), "Repository missing, skipping");
                continue;
            }
            let trash = trash_path(&path, &op);
            fs::rename(&path, &trash)?;
            debug!(%kind, path = %path.display(), "Moved repository aside");

            let (from, to) = (trash.clone(), path.clone());
            saga.record(format!("{kind} repository"), move || {
                fs::rename(&from, &to).map_err(Error::from)
            });
            trashed.push(trash);
        }

        commit(session, saga)?;

        for trash in trashed {
            if let Err(e) = fs::remove_dir_all(&trash) {
                warn!(path = %trash.display(), "Failed to remove deleted repository: {e}");
            }
        }

        deliver(
            self.notifier,
            Event::ProjectDeleted {
                project: ProjectRef::from(&project),
                agent: agent.to_string(),
                detached_forks: detached,
            },
        );
        saga::enter(LifecycleState::Done);
        info!(id = project.id, detached_forks = detached, "Deleted project");
        Ok(())
    }

    fn export(&self, project: &Project) {
        if project.private {
            return;
        }
        let code = self.folders.code.join(&project.repo_path);
        if let Err(e) = write_export_ok(&code) {
            warn!(path = %code.display(), "Failed to write git-daemon-export-ok: {e}");
        }
    }
}

fn ensure_absent(targets: &[RepoTarget]) -> Result<()> {
    match targets.iter().find(|t| t.path.exists()) {
        Some(RepoTarget { kind, path, .. }) => {
            warn!(%kind, path = %path.display(), "Repository already exists on disk");
            Err(Error::RepoExists(path.clone()))
        }
        None => Ok(()),
    }
}

/// Runs one repository creation step. On failure the step's own partial
/// directory and the parents it needed are removed; on success their removal
/// is recorded in `saga`. A directory that was already there is never
/// removed.
fn provision<F>(saga: &mut Saga, target: &RepoTarget, step: F) -> Result<()>
where
    F: FnOnce() -> Result<()>,
{
    let RepoTarget { kind, root, path } = target;
    if path.exists() {
        return Err(Error::RepoExists(path.clone()));
    }
    let parents = create_parents(root, path)?;

    if let Err(e) = step() {
        warn!(%kind, path = %path.display(), "Failed to create repository: {e}");
        if path.exists() {
            if let Err(cleanup) = fs::remove_dir_all(path) {
                error!(%kind, path = %path.display(), "Failed to remove partial repository: {cleanup}");
            }
        }
        prune_empty(&parents);
        return Err(e);
    }
    debug!(%kind, path = %path.display(), "Created repository");

    let path = path.clone();
    saga.record(format!("{kind} repository"), move || {
        fs::remove_dir_all(&path)?;
        prune_empty(&parents);
        Ok(())
    });
    Ok(())
}

/// Creates the missing directories between `root` and `path`, returning the
/// ones below `root` deepest first.
fn create_parents(root: &Path, path: &Path) -> Result<Vec<PathBuf>> {
    let mut missing = Vec::new();
    let mut dir = path.parent();
    while let Some(d) = dir {
        if d == root || !d.starts_with(root) || d.exists() {
            break;
        }
        missing.push(d.to_path_buf());
        dir = d.parent();
    }
    if let Some(parent) = path.parent() {
        if let Err(e) = fs::create_dir_all(parent) {
            prune_empty(&missing);
            return Err(e.into());
        }
    }
    Ok(missing)
}

fn prune_empty(dirs: &[PathBuf]) {
    for dir in dirs {
        if let Err(e) = fs::remove_dir(dir) {
            debug!(path = %dir.display(), "Keeping directory: {e}");
            break;
        }
    }
}

/// Commits `session`; on failure the saga is dropped and unwinds.
fn commit(session: Box<dyn Session + '_>, saga: Saga) -> Result<()> {
    saga::enter(LifecycleState::DbCommitting);
    session.commit()?;
    saga.commit();
    Ok(())
}

fn trash_path(path: &Path, op: &Uuid) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{name}.deleting-{op}"))
}
