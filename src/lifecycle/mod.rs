mod folders;
mod git;
mod project;
mod saga;

pub use folders::{RepoFolders, RepoKind, RepoTarget, repo_relpath};
pub use git::{EXPORT_OK_FILE, Git2Backend, GitBackend, write_export_ok};
pub use project::{NewProjectRequest, RepoSetLifecycle};
pub use saga::LifecycleState;
