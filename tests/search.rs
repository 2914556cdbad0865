mod common;

use std::collections::BTreeSet;

use common::TestForge;
use forgeward::access::Grants;
use forgeward::lifecycle::NewProjectRequest;
use forgeward::search::{PrivateFilter, ProjectSearch, SearchCriteria};
use forgeward::store::Store;
use forgeward::types::{AccessLevel, Project, SortOrder};

fn names(projects: &[Project]) -> Vec<String> {
    projects.iter().map(Project::fullname).collect()
}

/// pingou owns test, test2, test3 and rpms/tool; foo owns foo-tools and a
/// fork of test; pingou/secret is private.
fn populated() -> TestForge {
    let mut forge = TestForge::new();
    forge.naming.allowed_prefixes = vec!["rpms".to_string()];
    forge.policy.admin_users = vec!["admin".to_string()];
    forge.user("pingou");
    forge.user("foo");
    forge.user("admin");

    let lifecycle = forge.lifecycle();
    let test = lifecycle
        .create_project(&NewProjectRequest::new("pingou", "test"))
        .unwrap();
    for request in [
        NewProjectRequest::new("pingou", "test2"),
        NewProjectRequest::new("pingou", "test3"),
        NewProjectRequest::new("pingou", "tool").namespace("rpms"),
        NewProjectRequest::new("foo", "foo-tools"),
        NewProjectRequest::new("pingou", "secret").private(true),
    ] {
        lifecycle.create_project(&request).unwrap();
    }
    lifecycle.fork_project(&test, "foo").unwrap();
    forge
}

#[test]
fn test_owner_listing_order_and_count() {
    let forge = populated();
    let search = ProjectSearch::new(&forge.store, &forge.policy);
    let criteria = SearchCriteria {
        username: Some("pingou".to_string()),
        fork: Some(false),
        ..Default::default()
    };

    let rows = search.list(&criteria).unwrap();
    assert_eq!(names(&rows), vec!["test", "test2", "test3", "rpms/tool"]);
    assert_eq!(search.count(&criteria).unwrap(), 4);

    let criteria = SearchCriteria {
        pattern: Some("test*".to_string()),
        ..criteria
    };
    assert_eq!(names(&search.list(&criteria).unwrap()), vec!["test", "test2", "test3"]);
    assert_eq!(search.count(&criteria).unwrap(), 3);
}

#[test]
fn test_owner_filter_and_negation() {
    let forge = populated();
    let search = ProjectSearch::new(&forge.store, &forge.policy);

    let owned_by_foo = SearchCriteria {
        owner: Some("foo".to_string()),
        ..Default::default()
    };
    assert_eq!(
        names(&search.list(&owned_by_foo).unwrap()),
        vec!["foo-tools", "test"]
    );

    let not_pingou = SearchCriteria {
        owner: Some("!pingou".to_string()),
        fork: Some(false),
        ..Default::default()
    };
    assert_eq!(names(&search.list(&not_pingou).unwrap()), vec!["foo-tools"]);
}

#[test]
fn test_fork_namespace_and_exact_name() {
    let forge = populated();
    let search = ProjectSearch::new(&forge.store, &forge.policy);

    let forks = search
        .list(&SearchCriteria {
            fork: Some(true),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(forks.len(), 1);
    assert_eq!(forks[0].repo_path, "forks/foo/test.git");

    let rpms = search
        .list(&SearchCriteria {
            namespace: Some("rpms".to_string()),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(names(&rpms), vec!["rpms/tool"]);

    let exact = search
        .list(&SearchCriteria {
            pattern: Some("test2".to_string()),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(names(&exact), vec!["test2"]);

    let insensitive = search
        .list(&SearchCriteria {
            pattern: Some("TEST*".to_string()),
            fork: Some(false),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(insensitive.len(), 3);
}

#[test]
fn test_private_projects_follow_can_view() {
    let forge = populated();
    let search = ProjectSearch::new(&forge.store, &forge.policy);
    let with_secret = |private: PrivateFilter| {
        let criteria = SearchCriteria {
            pattern: Some("secret".to_string()),
            private,
            ..Default::default()
        };
        search.count(&criteria).unwrap()
    };

    assert_eq!(with_secret(PrivateFilter::ExcludeAll), 0);
    assert_eq!(with_secret(PrivateFilter::VisibleTo("pingou".into())), 1);
    assert_eq!(with_secret(PrivateFilter::VisibleTo("foo".into())), 0);
    assert_eq!(with_secret(PrivateFilter::VisibleTo("nobody".into())), 0);
    assert_eq!(with_secret(PrivateFilter::VisibleTo("admin".into())), 1);
    assert_eq!(with_secret(PrivateFilter::IncludeAll), 1);

    let secret = forge
        .store
        .get_project_by_path("pingou/secret.git")
        .unwrap()
        .unwrap();
    Grants::new(&forge.store, &forge.policy, &forge.notifier)
        .add_user_to_project(&secret, "foo", AccessLevel::Ticket, &forge.actor("pingou"))
        .unwrap();
    assert_eq!(with_secret(PrivateFilter::VisibleTo("foo".into())), 1);
}

#[test]
fn test_username_filter_respects_min_access_and_excluded_groups() {
    let forge = populated();
    let search = ProjectSearch::new(&forge.store, &forge.policy);
    let pingou = forge.store.get_user_by_name("pingou").unwrap().unwrap();
    let foo = forge.store.get_user_by_name("foo").unwrap().unwrap();
    let owner = forge.actor("pingou");
    let grants = Grants::new(&forge.store, &forge.policy, &forge.notifier);

    let test2 = forge.store.get_project_by_path("test2.git").unwrap().unwrap();
    let test3 = forge.store.get_project_by_path("test3.git").unwrap().unwrap();
    grants
        .add_user_to_project(&test2, "foo", AccessLevel::Ticket, &owner)
        .unwrap();

    let group = forge
        .store
        .create_group("packagers", "Packagers", None, "user", pingou.id)
        .unwrap();
    forge.store.add_group_member(group.id, foo.id, false).unwrap();
    grants
        .add_group_to_project(&test3, "packagers", AccessLevel::Commit, &owner)
        .unwrap();

    let foo_projects = |min_access: Option<AccessLevel>, exclude: &[&str]| {
        let criteria = SearchCriteria {
            username: Some("foo".to_string()),
            min_access,
            exclude_groups: exclude.iter().map(|g| g.to_string()).collect::<BTreeSet<_>>(),
            ..Default::default()
        };
        names(&search.list(&criteria).unwrap())
    };

    assert_eq!(foo_projects(None, &[]), vec!["foo-tools", "test", "test3"]);
    assert_eq!(
        foo_projects(Some(AccessLevel::Ticket), &[]),
        vec!["foo-tools", "test", "test2", "test3"]
    );
    assert_eq!(foo_projects(None, &["packagers"]), vec!["foo-tools", "test"]);
}

#[test]
fn test_sort_and_pagination() {
    let forge = populated();
    let search = ProjectSearch::new(&forge.store, &forge.policy);
    let base = SearchCriteria {
        pattern: Some("test*".to_string()),
        fork: Some(false),
        ..Default::default()
    };

    let latest = search
        .list(&SearchCriteria {
            sort: SortOrder::Latest,
            ..base.clone()
        })
        .unwrap();
    assert_eq!(names(&latest), vec!["test3", "test2", "test"]);

    let oldest = search
        .list(&SearchCriteria {
            sort: SortOrder::Oldest,
            ..base.clone()
        })
        .unwrap();
    assert_eq!(names(&oldest), vec!["test", "test2", "test3"]);

    let page = SearchCriteria {
        start: Some(1),
        limit: Some(1),
        ..base
    };
    assert_eq!(names(&search.list(&page).unwrap()), vec!["test2"]);
    assert_eq!(search.count(&page).unwrap(), 1);
}

#[test]
fn test_legacy_blank_score_does_not_break_listing() {
    let forge = populated();
    forge
        .store
        .connection()
        .execute(
            "UPDATE projects SET settings = ?1 WHERE repo_path = 'test2.git'",
            [r#"{"issue_tracker": true, "Minimum_score_to_merge_pull-request": ""}"#],
        )
        .unwrap();

    let test2 = forge.store.get_project_by_path("test2.git").unwrap().unwrap();
    assert_eq!(test2.settings.minimum_score_to_merge, -1);

    let search = ProjectSearch::new(&forge.store, &forge.policy);
    let all = search.list(&SearchCriteria::default()).unwrap();
    assert!(names(&all).contains(&"test2".to_string()));
}
