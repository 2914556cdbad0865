use std::fs;
use std::io;
use std::path::Path;

use git2::build::RepoBuilder;
use git2::{BranchType, Repository, RepositoryInitOptions};

use crate::error::{Error, Result};

pub const EXPORT_OK_FILE: &str = "git-daemon-export-ok";

/// Creates bare repositories on disk. The lifecycle engine never looks inside
/// the repositories it creates.
pub trait GitBackend: Send + Sync {
    fn init_bare(&self, path: &Path) -> Result<()>;

    /// Clones `source` into a new bare repository at `dest`, with a local
    /// branch for every upstream branch.
    fn clone_bare(&self, source: &Path, dest: &Path) -> Result<()>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Git2Backend;

impl GitBackend for Git2Backend {
    fn init_bare(&self, path: &Path) -> Result<()> {
        let mut opts = RepositoryInitOptions::new();
        opts.bare(true).mkpath(true).no_reinit(true);
        Repository::init_opts(path, &opts)?;
        Ok(())
    }

    fn clone_bare(&self, source: &Path, dest: &Path) -> Result<()> {
        let url = source.to_str().ok_or_else(|| {
            Error::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("non UTF-8 repository path: {}", source.display()),
            ))
        })?;

        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        let repo = RepoBuilder::new().bare(true).clone(url, dest)?;
        create_local_branches(&repo)
    }
}

fn create_local_branches(repo: &Repository) -> Result<()> {
    for branch in repo.branches(Some(BranchType::Remote))? {
        let (branch, _) = branch?;
        let Some(name) = branch.name()? else {
            continue;
        };
        let Some((_, local)) = name.split_once('/') else {
            continue;
        };
        if local == "HEAD" || repo.find_branch(local, BranchType::Local).is_ok() {
            continue;
        }
        let commit = branch.get().peel_to_commit()?;
        repo.branch(local, &commit, false)?;
    }
    Ok(())
}

/// Marks a repository as exportable by git-daemon.
pub fn write_export_ok(code_repo: &Path) -> io::Result<()> {
    fs::File::create(code_repo.join(EXPORT_OK_FILE)).map(|_| ())
}
