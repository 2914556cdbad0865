mod access;
mod models;
mod pattern;
mod query;
mod settings;

pub use access::{Access, AccessLevel};
pub use models::*;
pub use pattern::{NamePattern, matches_any};
pub use query::{MemberFilter, NameMatch, OwnerFilter, ProjectFilter, SortOrder, Visibility};
pub use settings::ProjectSettings;
