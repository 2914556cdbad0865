mod common;

use common::TestForge;
use forgeward::access::{AccessResolver, Grants};
use forgeward::lifecycle::{NewProjectRequest, RepoKind};
use forgeward::store::Store;
use forgeward::types::{Access, AccessLevel};

#[test]
fn test_create_grant_fork_delete() {
    let forge = TestForge::new();
    forge.user("pingou");
    let foo = forge.user("foo");
    let lifecycle = forge.lifecycle();
    let resolver = AccessResolver::new(&forge.store, &forge.policy);

    let test = lifecycle
        .create_project(&NewProjectRequest::new("pingou", "test"))
        .unwrap();
    for kind in RepoKind::ALL {
        assert!(forge.repo(kind, &test).exists(), "{kind} missing");
    }

    Grants::new(&forge.store, &forge.policy, &forge.notifier)
        .add_user_to_project(&test, "foo", AccessLevel::Commit, &forge.actor("pingou"))
        .unwrap();
    let foo_actor = forge.actor("foo");
    assert_eq!(
        resolver.resolve_access(Some(&foo_actor), &test).unwrap(),
        Access::Granted(AccessLevel::Commit)
    );

    let fork = lifecycle.fork_project(&test, "foo").unwrap();
    assert_eq!(fork.parent_id, Some(test.id));
    assert_eq!(fork.user_id, foo.id);
    assert_eq!(
        resolver.resolve_access(Some(&foo_actor), &fork).unwrap(),
        Access::Granted(AccessLevel::Owner)
    );

    lifecycle.delete_project(&test, "pingou").unwrap();

    let fork = forge
        .store
        .get_project_by_path("forks/foo/test.git")
        .unwrap()
        .unwrap();
    assert_eq!(fork.parent_id, None);
    assert!(forge.store.get_project(test.id).unwrap().is_none());
    assert!(forge.repo(RepoKind::Code, &fork).exists());

    assert_eq!(
        forge.notifier.topics(),
        vec![
            "project.new",
            "project.user.added",
            "project.forked",
            "project.deleted"
        ]
    );
}
