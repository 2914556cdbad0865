use std::collections::BTreeSet;

use crate::access::AccessResolver;
use crate::config::AccessPolicy;
use crate::error::{Error, Result};
use crate::store::Store;
use crate::types::{
    AccessLevel, MemberFilter, NameMatch, OwnerFilter, Project, ProjectFilter, SortOrder,
    Visibility,
};

/// How private projects are treated by a search.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum PrivateFilter {
    /// Only public projects.
    #[default]
    ExcludeAll,
    /// Public projects plus the private ones this user can view.
    VisibleTo(String),
    /// Every project, regardless of visibility.
    IncludeAll,
}

#[derive(Debug, Clone, Default)]
pub struct SearchCriteria {
    /// Projects this user owns or holds at least `min_access` on.
    pub username: Option<String>,
    /// `name` or `!name`. Cannot be combined with `username`.
    pub owner: Option<String>,
    pub fork: Option<bool>,
    pub namespace: Option<String>,
    /// Project name; `*` is a wildcard.
    pub pattern: Option<String>,
    /// Group memberships ignored for both the `username` filter and
    /// visibility.
    pub exclude_groups: BTreeSet<String>,
    pub private: PrivateFilter,
    /// Defaults to collaborator.
    pub min_access: Option<AccessLevel>,
    pub sort: SortOrder,
    pub start: Option<i64>,
    pub limit: Option<i64>,
    /// Return the number of matches instead of the rows.
    pub count: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SearchOutput {
    Rows(Vec<Project>),
    Count(u64),
}

impl SearchOutput {
    pub fn len(&self) -> usize {
        match self {
            Self::Rows(rows) => rows.len(),
            Self::Count(count) => *count as usize,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn into_rows(self) -> Vec<Project> {
        match self {
            Self::Rows(rows) => rows,
            Self::Count(_) => Vec::new(),
        }
    }
}

fn to_u32(name: &str, value: Option<i64>) -> Result<Option<u32>> {
    value
        .map(|v| {
            u32::try_from(v).map_err(|_| {
                Error::InvalidQuery(format!("{name} must be a non-negative integer, got {v}"))
            })
        })
        .transpose()
}

/// Lists projects under filter criteria. Private projects are filtered with
/// the same rule as [`crate::access::can_view`], evaluated in SQL.
pub struct ProjectSearch<'a> {
    store: &'a dyn Store,
    policy: &'a AccessPolicy,
}

impl<'a> ProjectSearch<'a> {
    pub fn new(store: &'a dyn Store, policy: &'a AccessPolicy) -> Self {
        Self { store, policy }
    }

    pub fn search_projects(&self, criteria: &SearchCriteria) -> Result<SearchOutput> {
        let offset = to_u32("start", criteria.start)?;
        let limit = to_u32("limit", criteria.limit)?;
        if criteria.username.is_some() && criteria.owner.is_some() {
            return Err(Error::InvalidQuery(
                "username and owner cannot be combined".to_string(),
            ));
        }

        let empty = || -> Result<SearchOutput> {
            Ok(if criteria.count {
                SearchOutput::Count(0)
            } else {
                SearchOutput::Rows(Vec::new())
            })
        };

        let member = match &criteria.username {
            Some(username) => match self.store.get_user_by_name(username)? {
                Some(user) => Some(MemberFilter {
                    user_id: user.id,
                    min_access: criteria.min_access.unwrap_or(AccessLevel::Collaborator),
                    exclude_groups: criteria.exclude_groups.clone(),
                }),
                None => return empty(),
            },
            None => None,
        };

        let visibility = match &criteria.private {
            PrivateFilter::ExcludeAll => Visibility::PublicOnly,
            PrivateFilter::IncludeAll => Visibility::All,
            PrivateFilter::VisibleTo(username) => {
                match AccessResolver::new(self.store, self.policy).actor(username)? {
                    Some(actor) if actor.is_instance_admin => Visibility::All,
                    Some(actor) => Visibility::VisibleTo {
                        user_id: actor.id(),
                        min_level: self.policy.min_view_level,
                        exclude_groups: criteria.exclude_groups.clone(),
                    },
                    None => Visibility::PublicOnly,
                }
            }
        };

        let filter = ProjectFilter {
            member,
            owner: criteria.owner.as_deref().map(OwnerFilter::parse),
            fork: criteria.fork,
            namespace: criteria.namespace.clone(),
            name: criteria.pattern.as_deref().map(NameMatch::from_pattern),
            visibility,
            sort: criteria.sort,
            offset,
            limit,
        };

        if criteria.count {
            Ok(SearchOutput::Count(self.store.count_projects(&filter)?))
        } else {
            Ok(SearchOutput::Rows(self.store.query_projects(&filter)?))
        }
    }

    /// Shorthand for a row search, ignoring `criteria.count`.
    pub fn list(&self, criteria: &SearchCriteria) -> Result<Vec<Project>> {
        let criteria = SearchCriteria {
            count: false,
            ..criteria.clone()
        };
        Ok(self.search_projects(&criteria)?.into_rows())
    }

    pub fn count(&self, criteria: &SearchCriteria) -> Result<u64> {
        let criteria = SearchCriteria {
            count: true,
            ..criteria.clone()
        };
        match self.search_projects(&criteria)? {
            SearchOutput::Count(count) => Ok(count),
            SearchOutput::Rows(rows) => Ok(rows.len() as u64),
        }
    }
}
