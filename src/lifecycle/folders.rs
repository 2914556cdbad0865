use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// The four repositories every project owns, in creation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RepoKind {
    Code,
    Docs,
    Tickets,
    Requests,
}

impl RepoKind {
    pub const ALL: [RepoKind; 4] = [
        RepoKind::Code,
        RepoKind::Docs,
        RepoKind::Tickets,
        RepoKind::Requests,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Code => "code",
            Self::Docs => "docs",
            Self::Tickets => "tickets",
            Self::Requests => "requests",
        }
    }
}

impl fmt::Display for RepoKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Root directories of each repository kind. `None` disables the kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoFolders {
    pub code: PathBuf,
    pub docs: Option<PathBuf>,
    pub tickets: Option<PathBuf>,
    pub requests: Option<PathBuf>,
}

impl RepoFolders {
    /// All four kinds under one root, as `<root>/<kind>`.
    pub fn under(root: &Path) -> Self {
        Self {
            code: root.join("repos"),
            docs: Some(root.join("docs")),
            tickets: Some(root.join("tickets")),
            requests: Some(root.join("requests")),
        }
    }

    pub fn root(&self, kind: RepoKind) -> Option<&Path> {
        match kind {
            RepoKind::Code => Some(&self.code),
            RepoKind::Docs => self.docs.as_deref(),
            RepoKind::Tickets => self.tickets.as_deref(),
            RepoKind::Requests => self.requests.as_deref(),
        }
    }

    pub fn path_for(&self, kind: RepoKind, repo_path: &str) -> Option<PathBuf> {
        self.root(kind).map(|root| root.join(repo_path))
    }

    /// Enabled repositories of a project, in creation order. Fails if
    /// `repo_path` could resolve outside the kind roots.
    pub fn targets(&self, repo_path: &str) -> Result<Vec<RepoTarget>> {
        check_relpath(repo_path)?;
        Ok(RepoKind::ALL
            .iter()
            .filter_map(|kind| {
                self.root(*kind).map(|root| RepoTarget {
                    kind: *kind,
                    root: root.to_path_buf(),
                    path: root.join(repo_path),
                })
            })
            .collect())
    }
}

/// One repository of a project and the root it lives under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoTarget {
    pub kind: RepoKind,
    pub root: PathBuf,
    pub path: PathBuf,
}

// Every segment must be a plain, non-hidden name.
fn check_relpath(repo_path: &str) -> Result<()> {
    let safe = repo_path
        .split(['/', '\\'])
        .all(|segment| !segment.is_empty() && !segment.starts_with('.'));
    if safe {
        Ok(())
    } else {
        Err(Error::Naming(format!("unsafe repository path `{repo_path}`")))
    }
}

/// On-disk location of a project relative to each repository root.
pub fn repo_relpath(fork_owner: Option<&str>, namespace: Option<&str>, name: &str) -> String {
    let mut path = String::new();
    if let Some(owner) = fork_owner {
        path.push_str("forks/");
        path.push_str(owner);
        path.push('/');
    }
    if let Some(ns) = namespace {
        path.push_str(ns);
        path.push('/');
    }
    path.push_str(name);
    path.push_str(".git");
    path
}
