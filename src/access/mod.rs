//! Who may do what on a project.
//!
//! [`resolver`] holds the pure access computation and a store-backed wrapper,
//! [`naming`] the write-time validation of project and group names, and
//! [`grants`] the ACL mutations.

pub mod grants;
pub mod naming;
pub mod resolver;

pub use grants::{GrantOutcome, Grants};
pub use naming::{
    FORKS_NAMESPACE, effective_namespace, effective_owner, is_fork, validate_group_name,
    validate_project_name, validate_username,
};
pub use resolver::{
    AccessResolver, Actor, IssueRef, TicketField, can_modify_ticket, can_view,
    exclude_groups_filter, resolve_access,
};
