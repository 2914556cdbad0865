use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// AccessLevel is the ordered capability tier a user holds on a project.
/// A higher level implies every read-type capability of the lower ones.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum AccessLevel {
    #[default]
    None,
    Ticket,
    Collaborator,
    Commit,
    Admin,
    /// Implicit from `Project::user_id`, never stored as a grant.
    Owner,
}

impl AccessLevel {
    /// Levels that may be stored in an ACL row, lowest first.
    pub const GRANTABLE: [AccessLevel; 4] = [
        AccessLevel::Ticket,
        AccessLevel::Collaborator,
        AccessLevel::Commit,
        AccessLevel::Admin,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Ticket => "ticket",
            Self::Collaborator => "collaborator",
            Self::Commit => "commit",
            Self::Admin => "admin",
            Self::Owner => "owner",
        }
    }

    #[must_use]
    pub fn is_grantable(self) -> bool {
        Self::GRANTABLE.contains(&self)
    }

    /// Returns the grantable levels at or above `self`, used to build SQL
    /// `IN (...)` lists.
    #[must_use]
    pub fn grantable_at_least(self) -> Vec<AccessLevel> {
        Self::GRANTABLE
            .iter()
            .copied()
            .filter(|level| *level >= self)
            .collect()
    }

    /// Parses a level that can be written to an ACL row.
    pub fn parse_grant(s: &str) -> Result<AccessLevel, Error> {
        let level: AccessLevel = s.parse()?;
        if !level.is_grantable() {
            return Err(Error::InvalidAccess(format!("{s} cannot be granted")));
        }
        Ok(level)
    }
}

impl FromStr for AccessLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(Self::None),
            "ticket" => Ok(Self::Ticket),
            "collaborator" => Ok(Self::Collaborator),
            "commit" => Ok(Self::Commit),
            "admin" => Ok(Self::Admin),
            "owner" => Ok(Self::Owner),
            other => Err(Error::InvalidAccess(other.to_string())),
        }
    }
}

impl fmt::Display for AccessLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl rusqlite::types::ToSql for AccessLevel {
    fn to_sql(&self) -> rusqlite::Result<rusqlite::types::ToSqlOutput<'_>> {
        Ok(self.as_str().into())
    }
}

impl rusqlite::types::FromSql for AccessLevel {
    fn column_result(value: rusqlite::types::ValueRef<'_>) -> rusqlite::types::FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e: Error| rusqlite::types::FromSqlError::Other(Box::new(e)))
    }
}

/// Access is the outcome of resolving an actor against a project.
///
/// Variant order is capability order, so `Ord` can be used for "at least"
/// checks: `None < PublicRead < MetadataOnly < Granted(..)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(tag = "kind", content = "level", rename_all = "snake_case")]
pub enum Access {
    None,
    /// Read floor of a non-private project. Not assignable.
    PublicRead,
    /// Open metadata access: issue metadata edits only.
    MetadataOnly,
    Granted(AccessLevel),
}

impl Access {
    /// The ACL level behind this access, `AccessLevel::None` for the
    /// pseudo-levels.
    #[must_use]
    pub fn level(self) -> AccessLevel {
        match self {
            Access::Granted(level) => level,
            _ => AccessLevel::None,
        }
    }

    #[must_use]
    pub fn at_least(self, required: AccessLevel) -> bool {
        required == AccessLevel::None || self >= Access::Granted(required)
    }

    #[must_use]
    pub fn is_owner(self) -> bool {
        self == Access::Granted(AccessLevel::Owner)
    }
}

impl From<AccessLevel> for Access {
    fn from(level: AccessLevel) -> Self {
        match level {
            AccessLevel::None => Access::None,
            other => Access::Granted(other),
        }
    }
}

impl fmt::Display for Access {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Access::None => f.write_str("none"),
            Access::PublicRead => f.write_str("public read"),
            Access::MetadataOnly => f.write_str("metadata only"),
            Access::Granted(level) => write!(f, "{level}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_ordering() {
        assert!(AccessLevel::None < AccessLevel::Ticket);
        assert!(AccessLevel::Ticket < AccessLevel::Collaborator);
        assert!(AccessLevel::Collaborator < AccessLevel::Commit);
        assert!(AccessLevel::Commit < AccessLevel::Admin);
        assert!(AccessLevel::Admin < AccessLevel::Owner);
    }

    #[test]
    fn test_parse_grant() {
        assert_eq!(
            AccessLevel::parse_grant("commit").unwrap(),
            AccessLevel::Commit
        );
        assert!(AccessLevel::parse_grant("owner").is_err());
        assert!(AccessLevel::parse_grant("none").is_err());
        assert!(AccessLevel::parse_grant("root").is_err());
    }

    #[test]
    fn test_grantable_at_least() {
        assert_eq!(
            AccessLevel::Commit.grantable_at_least(),
            vec![AccessLevel::Commit, AccessLevel::Admin]
        );
        assert_eq!(AccessLevel::None.grantable_at_least().len(), 4);
        assert!(AccessLevel::Owner.grantable_at_least().is_empty());
    }

    #[test]
    fn test_access_ordering() {
        assert!(Access::None < Access::PublicRead);
        assert!(Access::PublicRead < Access::MetadataOnly);
        assert!(Access::MetadataOnly < Access::Granted(AccessLevel::Ticket));
        assert!(Access::Granted(AccessLevel::Admin) < Access::Granted(AccessLevel::Owner));
        assert!(!Access::MetadataOnly.at_least(AccessLevel::Ticket));
        assert!(Access::Granted(AccessLevel::Admin).at_least(AccessLevel::Commit));
    }
}
