use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::lifecycle::RepoFolders;
use crate::store::DEFAULT_BUSY_TIMEOUT;
use crate::types::{AccessLevel, NamePattern};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ForgeConfig {
    pub data_dir: PathBuf,
    pub database: DatabaseConfig,
    pub folders: FolderConfig,
    pub naming: NamingPolicy,
    pub access: AccessPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Seconds a writer waits for the lock held by a running create, fork
    /// or delete.
    pub busy_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            busy_timeout_secs: DEFAULT_BUSY_TIMEOUT.as_secs(),
        }
    }
}

impl DatabaseConfig {
    #[must_use]
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_secs(self.busy_timeout_secs)
    }
}

/// Repository folders. Relative paths are resolved against `data_dir`.
/// A missing `docs`, `tickets` or `requests` entry disables that kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FolderConfig {
    #[serde(default = "default_code_folder")]
    pub code: PathBuf,
    #[serde(default)]
    pub docs: Option<PathBuf>,
    #[serde(default)]
    pub tickets: Option<PathBuf>,
    #[serde(default)]
    pub requests: Option<PathBuf>,
}

fn default_code_folder() -> PathBuf {
    PathBuf::from("repos")
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NamingPolicy {
    /// Glob patterns over `namespace/name` that may not be created.
    pub blacklist: Vec<NamePattern>,
    /// Namespaces anyone may create projects in.
    pub allowed_prefixes: Vec<String>,
    /// Group names that may not be created.
    pub group_blacklist: Vec<NamePattern>,
    /// Reject names of exactly 40 characters (they collide with commit
    /// hashes in old URLs).
    pub prevent_40_chars: bool,
    /// Allow users to create projects in a namespace named after themselves.
    pub user_namespace: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AccessPolicy {
    pub admin_users: Vec<String>,
    pub admin_groups: Vec<String>,
    /// Lowest ACL level that lets a grantee see a private project.
    pub min_view_level: AccessLevel,
    /// Project-name pattern => groups one of which a grantee (other than
    /// ticket level) or new owner must belong to.
    pub required_groups: BTreeMap<String, Vec<String>>,
}

impl Default for AccessPolicy {
    fn default() -> Self {
        Self {
            admin_users: Vec::new(),
            admin_groups: Vec::new(),
            min_view_level: AccessLevel::Ticket,
            required_groups: BTreeMap::new(),
        }
    }
}

impl ForgeConfig {
    /// Reads a TOML config file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: ForgeConfig = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))
    }

    pub fn validate(&self) -> Result<()> {
        if !self.access.min_view_level.is_grantable() {
            return Err(Error::Config(format!(
                "min_view_level must be a grantable level, got {}",
                self.access.min_view_level
            )));
        }
        for pattern in self.access.required_groups.keys() {
            NamePattern::parse(pattern)
                .map_err(|e| Error::Config(format!("required_groups pattern {pattern}: {e}")))?;
        }
        Ok(())
    }

    #[must_use]
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("forgeward.db")
    }

    #[must_use]
    pub fn repo_folders(&self) -> RepoFolders {
        let resolve = |p: &Path| {
            if p.is_absolute() {
                p.to_path_buf()
            } else {
                self.data_dir.join(p)
            }
        };
        RepoFolders {
            code: resolve(&self.folders.code),
            docs: self.folders.docs.as_deref().map(resolve),
            tickets: self.folders.tickets.as_deref().map(resolve),
            requests: self.folders.requests.as_deref().map(resolve),
        }
    }
}

impl Default for ForgeConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            database: DatabaseConfig::default(),
            folders: FolderConfig::default(),
            naming: NamingPolicy::default(),
            access: AccessPolicy::default(),
        }
    }
}

impl Default for FolderConfig {
    fn default() -> Self {
        Self {
            code: default_code_folder(),
            docs: Some(PathBuf::from("docs")),
            tickets: Some(PathBuf::from("tickets")),
            requests: Some(PathBuf::from("requests")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_folders_resolve_under_data_dir() {
        let config = ForgeConfig {
            data_dir: PathBuf::from("/srv/forge"),
            ..Default::default()
        };
        let folders = config.repo_folders();
        assert_eq!(folders.code, Path::new("/srv/forge/repos"));
        assert_eq!(folders.tickets.as_deref(), Some(Path::new("/srv/forge/tickets")));
        assert_eq!(config.db_path(), Path::new("/srv/forge/forgeward.db"));
        assert_eq!(config.database.busy_timeout(), DEFAULT_BUSY_TIMEOUT);
    }

    #[test]
    fn test_parse_toml() {
        let raw = r#"
            data_dir = "/var/lib/forge"

            [database]
            busy_timeout_secs = 300

            [folders]
            code = "/git/repos"
            docs = "docs"

            [naming]
            blacklist = ["static/*", "api"]
            allowed_prefixes = ["rpms"]

            [access]
            admin_groups = ["sysadmin"]
            min_view_level = "commit"

            [access.required_groups]
            "rpms/*" = ["packager"]
        "#;
        let config: ForgeConfig = toml::from_str(raw).unwrap();
        config.validate().unwrap();
        assert_eq!(config.database.busy_timeout(), Duration::from_secs(300));

        let folders = config.repo_folders();
        assert_eq!(folders.code, Path::new("/git/repos"));
        assert_eq!(folders.docs.as_deref(), Some(Path::new("/var/lib/forge/docs")));
        assert!(folders.tickets.is_none());
        assert!(folders.requests.is_none());
        assert_eq!(config.naming.blacklist.len(), 2);
        assert_eq!(config.access.min_view_level, AccessLevel::Commit);
        assert_eq!(config.access.required_groups["rpms/*"], vec!["packager"]);
    }

    #[test]
    fn test_rejects_ungrantable_view_level() {
        let config = ForgeConfig {
            access: AccessPolicy {
                min_view_level: AccessLevel::Owner,
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }
}
