use crate::config::NamingPolicy;
use crate::error::{Error, Result};
use crate::types::{NamePattern, Project, matches_any};

/// Namespace holding every fork; no project may be created in it.
pub const FORKS_NAMESPACE: &str = "forks";

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '+')
}

fn check_segment(kind: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(Error::Naming(format!("{kind} cannot be empty")));
    }
    if value.starts_with(['.', '+']) {
        return Err(Error::Naming(format!(
            "{kind} `{value}` cannot start with `.` or `+`"
        )));
    }
    if let Some(c) = value.chars().find(|c| !is_name_char(*c)) {
        return Err(Error::Naming(format!(
            "{kind} `{value}` contains the invalid character {c:?}"
        )));
    }
    if value.ends_with(".git") {
        return Err(Error::Naming(format!("{kind} `{value}` cannot end with .git")));
    }
    Ok(())
}

/// Usernames become a path segment of their forks, so they follow the same
/// character rules as project names.
pub fn validate_username(name: &str) -> Result<()> {
    check_segment("username", name)
}

pub fn validate_group_name(name: &str, blacklist: &[NamePattern]) -> Result<()> {
    if name.contains(char::is_whitespace) {
        return Err(Error::Naming(format!(
            "Spaces are not allowed in group names: {name}"
        )));
    }
    check_segment("group name", name)?;
    if matches_any(blacklist, name) {
        return Err(Error::Naming(
            "This group name has been blacklisted, please choose another one".to_string(),
        ));
    }
    Ok(())
}

/// Resolves the namespace a new project lands in: private projects and user
/// namespaces default to the owner's name.
pub fn effective_namespace(
    policy: &NamingPolicy,
    owner: &str,
    namespace: Option<&str>,
    private: bool,
) -> Option<String> {
    if private {
        return Some(owner.to_string());
    }
    match namespace {
        Some(ns) => Some(ns.to_string()),
        None if policy.user_namespace => Some(owner.to_string()),
        None => None,
    }
}

/// Checks a project about to be created by `owner`, a member of
/// `actor_groups`. The namespace must already be resolved with
/// [`effective_namespace`].
pub fn validate_project_name(
    policy: &NamingPolicy,
    owner: &str,
    namespace: Option<&str>,
    name: &str,
    actor_groups: &[String],
    private: bool,
) -> Result<()> {
    check_segment("project name", name)?;

    if let Some(ns) = namespace {
        check_segment("namespace", ns)?;
        if ns == FORKS_NAMESPACE {
            return Err(Error::Naming(format!("the `{ns}` namespace is reserved")));
        }
        let owns_namespace = (policy.user_namespace || private) && ns == owner;
        let allowed = owns_namespace
            || policy.allowed_prefixes.iter().any(|p| p == ns)
            || actor_groups.iter().any(|g| g == ns);
        if !allowed {
            return Err(Error::Naming(
                "The namespace of your project must be in the list of allowed namespaces \
                 set by the admins of this instance, or the name of a group of which you \
                 are a member."
                    .to_string(),
            ));
        }
    }

    let path = match namespace {
        Some(ns) => format!("{ns}/{name}"),
        None => name.to_string(),
    };
    if matches_any(&policy.blacklist, &path) {
        return Err(Error::Naming(format!(
            "No project \"{path}\" are allowed to be created due to potential conflicts in URLs"
        )));
    }

    // A 40 character name would shadow the old `<project>/<commit hash>` URLs.
    if policy.prevent_40_chars && name.chars().count() == 40 {
        return Err(Error::Naming(
            "Your project name cannot have exactly 40 characters after the `/`".to_string(),
        ));
    }

    Ok(())
}

pub fn is_fork(project: &Project) -> bool {
    project.is_fork()
}

pub fn effective_owner(project: &Project) -> i64 {
    project.effective_owner()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> NamingPolicy {
        NamingPolicy {
            blacklist: vec![
                NamePattern::parse("static").unwrap(),
                NamePattern::parse("pv/*").unwrap(),
            ],
            allowed_prefixes: vec!["rpms".to_string()],
            group_blacklist: vec![],
            prevent_40_chars: true,
            user_namespace: false,
        }
    }

    #[test]
    fn test_valid_project_names() {
        let p = policy();
        validate_project_name(&p, "pingou", None, "test", &[], false).unwrap();
        validate_project_name(&p, "pingou", None, "test_1.2+x-y", &[], false).unwrap();
        validate_project_name(&p, "pingou", Some("rpms"), "test", &[], false).unwrap();
    }

    #[test]
    fn test_invalid_characters() {
        let p = policy();
        for name in ["", ".hidden", "+plus", "a b", "a/b", "test.git", "é"] {
            assert!(
                matches!(
                    validate_project_name(&p, "pingou", None, name, &[], false),
                    Err(Error::Naming(_))
                ),
                "{name:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_blacklist_matches_full_path() {
        let p = policy();
        assert!(validate_project_name(&p, "pingou", None, "static", &[], false).is_err());
        let groups = vec!["pv".to_string()];
        assert!(validate_project_name(&p, "pingou", Some("pv"), "test", &groups, false).is_err());
    }

    #[test]
    fn test_namespace_requires_prefix_or_group() {
        let p = policy();
        assert!(validate_project_name(&p, "pingou", Some("infra"), "test", &[], false).is_err());
        let groups = vec!["infra".to_string()];
        validate_project_name(&p, "pingou", Some("infra"), "test", &groups, false).unwrap();
    }

    #[test]
    fn test_forks_namespace_is_reserved() {
        let p = NamingPolicy {
            allowed_prefixes: vec!["forks".to_string()],
            ..policy()
        };
        assert!(validate_project_name(&p, "pingou", Some("forks"), "test", &[], false).is_err());
    }

    #[test]
    fn test_forty_chars() {
        let name = "a".repeat(40);
        assert!(validate_project_name(&policy(), "pingou", None, &name, &[], false).is_err());
        let lenient = NamingPolicy {
            prevent_40_chars: false,
            ..policy()
        };
        validate_project_name(&lenient, "pingou", None, &name, &[], false).unwrap();
    }

    #[test]
    fn test_user_and_private_namespaces() {
        let p = NamingPolicy {
            user_namespace: true,
            ..policy()
        };
        assert_eq!(
            effective_namespace(&p, "pingou", None, false).as_deref(),
            Some("pingou")
        );
        validate_project_name(&p, "pingou", Some("pingou"), "test", &[], false).unwrap();

        let p = policy();
        assert_eq!(effective_namespace(&p, "pingou", None, false), None);
        assert_eq!(
            effective_namespace(&p, "pingou", Some("rpms"), true).as_deref(),
            Some("pingou")
        );
        validate_project_name(&p, "pingou", Some("pingou"), "test", &[], true).unwrap();
        assert!(validate_project_name(&p, "foo", Some("pingou"), "test", &[], true).is_err());
    }

    #[test]
    fn test_group_names() {
        let blacklist = vec![NamePattern::parse("admin").unwrap()];
        validate_group_name("packagers", &blacklist).unwrap();
        assert!(validate_group_name("my group", &blacklist).is_err());
        assert!(validate_group_name("admin", &blacklist).is_err());
        assert!(validate_group_name("bad/name", &blacklist).is_err());
    }
}
