#![allow(dead_code)]

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use tempfile::TempDir;

use forgeward::access::{AccessResolver, Actor};
use forgeward::config::{AccessPolicy, NamingPolicy};
use forgeward::error::{Error, Result};
use forgeward::lifecycle::{Git2Backend, GitBackend, RepoFolders, RepoKind, RepoSetLifecycle};
use forgeward::notify::{Event, Notifier};
use forgeward::store::{Session, SqliteStore, Store, Transactional};
use forgeward::types::{NewProject, Project, User};

/// A fresh database and set of repository folders in a temp directory.
pub struct TestForge {
    pub temp_dir: TempDir,
    pub store: SqliteStore,
    pub folders: RepoFolders,
    pub naming: NamingPolicy,
    pub policy: AccessPolicy,
    pub notifier: RecordingNotifier,
}

impl TestForge {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("create temp dir");
        let store = SqliteStore::new(temp_dir.path().join("forgeward.db")).expect("open store");
        store.initialize().expect("initialize store");
        let folders = RepoFolders::under(temp_dir.path());
        Self {
            temp_dir,
            store,
            folders,
            naming: NamingPolicy::default(),
            policy: AccessPolicy::default(),
            notifier: RecordingNotifier::default(),
        }
    }

    pub fn lifecycle(&self) -> RepoSetLifecycle<'_> {
        RepoSetLifecycle::new(
            &self.store,
            &Git2Backend,
            &self.notifier,
            &self.naming,
            &self.folders,
        )
    }

    pub fn lifecycle_with<'a>(
        &'a self,
        db: &'a dyn Transactional,
        git: &'a dyn GitBackend,
    ) -> RepoSetLifecycle<'a> {
        RepoSetLifecycle::new(db, git, &self.notifier, &self.naming, &self.folders)
    }

    pub fn user(&self, username: &str) -> User {
        self.store
            .create_user(username, None, Some(&format!("{username}@example.com")))
            .expect("create user")
    }

    pub fn actor(&self, username: &str) -> Actor {
        AccessResolver::new(&self.store, &self.policy)
            .actor(username)
            .expect("load actor")
            .expect("known user")
    }

    pub fn repo(&self, kind: RepoKind, project: &Project) -> PathBuf {
        self.folders
            .path_for(kind, &project.repo_path)
            .expect("enabled repo kind")
    }

    /// Every directory left under the repository folders, relative to the
    /// temp dir.
    pub fn repo_dirs(&self) -> Vec<PathBuf> {
        let mut found = Vec::new();
        for kind in RepoKind::ALL {
            if let Some(root) = self.folders.root(kind) {
                collect_git_dirs(root, self.temp_dir.path(), &mut found);
            }
        }
        found.sort();
        found
    }
}

fn collect_git_dirs(dir: &Path, base: &Path, found: &mut Vec<PathBuf>) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        if path.extension().is_some_and(|ext| ext == "git") {
            found.push(path.strip_prefix(base).expect("under base").to_path_buf());
        } else {
            collect_git_dirs(&path, base, found);
        }
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<Event>>,
}

impl RecordingNotifier {
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().expect("lock").clone()
    }

    pub fn topics(&self) -> Vec<&'static str> {
        self.events().iter().map(Event::topic).collect()
    }

    pub fn clear(&self) {
        self.events.lock().expect("lock").clear();
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, event: &Event) -> Result<()> {
        self.events.lock().expect("lock").push(event.clone());
        Ok(())
    }
}

/// A notifier that always fails.
pub struct BrokenNotifier;

impl Notifier for BrokenNotifier {
    fn notify(&self, _event: &Event) -> Result<()> {
        Err(Error::Io(io::Error::other("message bus down")))
    }
}

/// Delegates to [`Git2Backend`] but fails the `fail_at`-th call (1-based),
/// after leaving a partial directory behind.
pub struct FailingGit {
    fail_at: usize,
    calls: AtomicUsize,
}

impl FailingGit {
    pub fn new(fail_at: usize) -> Self {
        Self {
            fail_at,
            calls: AtomicUsize::new(0),
        }
    }

    fn step(&self, path: &Path, run: impl FnOnce() -> Result<()>) -> Result<()> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call == self.fail_at {
            fs::create_dir_all(path.join("objects"))?;
            return Err(Error::Io(io::Error::other(format!(
                "injected failure at step {call}"
            ))));
        }
        run()
    }
}

impl GitBackend for FailingGit {
    fn init_bare(&self, path: &Path) -> Result<()> {
        self.step(path, || Git2Backend.init_bare(path))
    }

    fn clone_bare(&self, source: &Path, dest: &Path) -> Result<()> {
        self.step(dest, || Git2Backend.clone_bare(source, dest))
    }
}

/// Hands out sessions whose commit always fails.
pub struct FailingCommit<'a>(pub &'a SqliteStore);

impl Transactional for FailingCommit<'_> {
    fn begin(&self) -> Result<Box<dyn Session + '_>> {
        Ok(Box::new(FailingCommitSession {
            inner: self.0.begin()?,
        }))
    }
}

struct FailingCommitSession<'a> {
    inner: Box<dyn Session + 'a>,
}

impl Session for FailingCommitSession<'_> {
    fn get_user_by_name(&mut self, username: &str) -> Result<Option<User>> {
        self.inner.get_user_by_name(username)
    }

    fn list_user_group_names(&mut self, user_id: i64) -> Result<Vec<String>> {
        self.inner.list_user_group_names(user_id)
    }

    fn get_project(&mut self, id: i64) -> Result<Option<Project>> {
        self.inner.get_project(id)
    }

    fn insert_project(&mut self, project: &NewProject) -> Result<Project> {
        self.inner.insert_project(project)
    }

    fn detach_forks(&mut self, parent_id: i64) -> Result<usize> {
        self.inner.detach_forks(parent_id)
    }

    fn delete_project(&mut self, id: i64) -> Result<bool> {
        self.inner.delete_project(id)
    }

    fn commit(self: Box<Self>) -> Result<()> {
        Err(Error::Io(io::Error::other("database went away")))
    }
}
