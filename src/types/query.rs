use std::collections::BTreeSet;

use super::AccessLevel;

/// Restriction on the owner of listed projects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OwnerFilter {
    Is(String),
    IsNot(String),
}

impl OwnerFilter {
    /// Parses the `name` / `!name` form.
    pub fn parse(raw: &str) -> Self {
        match raw.strip_prefix('!') {
            Some(name) => Self::IsNot(name.to_string()),
            None => Self::Is(raw.to_string()),
        }
    }
}

/// Projects a user owns or holds at least `min_access` on, directly or
/// through a group not in `exclude_groups`.
#[derive(Debug, Clone)]
pub struct MemberFilter {
    pub user_id: i64,
    pub min_access: AccessLevel,
    pub exclude_groups: BTreeSet<String>,
}

/// Which private projects survive the query.
#[derive(Debug, Clone)]
pub enum Visibility {
    /// No private filtering (instance administrators).
    All,
    PublicOnly,
    /// Public projects plus private ones the user can view.
    VisibleTo {
        user_id: i64,
        min_level: AccessLevel,
        exclude_groups: BTreeSet<String>,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortOrder {
    /// `namespace` (NULLs first), then `name`.
    #[default]
    Name,
    Latest,
    Oldest,
}

/// Store-level project query, built by the search layer.
#[derive(Debug, Clone)]
pub struct ProjectFilter {
    pub member: Option<MemberFilter>,
    pub owner: Option<OwnerFilter>,
    pub fork: Option<bool>,
    pub namespace: Option<String>,
    pub name: Option<NameMatch>,
    pub visibility: Visibility,
    pub sort: SortOrder,
    pub offset: Option<u32>,
    pub limit: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NameMatch {
    Exact(String),
    Like(String),
}

impl NameMatch {
    /// `*` becomes a `LIKE` wildcard; a pattern without one matches exactly.
    pub fn from_pattern(pattern: &str) -> Self {
        if pattern.contains('*') || pattern.contains('%') {
            Self::Like(pattern.replace('*', "%"))
        } else {
            Self::Exact(pattern.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_owner_filter_parse() {
        assert_eq!(OwnerFilter::parse("pingou"), OwnerFilter::Is("pingou".into()));
        assert_eq!(OwnerFilter::parse("!pingou"), OwnerFilter::IsNot("pingou".into()));
    }

    #[test]
    fn test_name_match() {
        assert_eq!(NameMatch::from_pattern("test"), NameMatch::Exact("test".into()));
        assert_eq!(NameMatch::from_pattern("te*"), NameMatch::Like("te%".into()));
    }
}
