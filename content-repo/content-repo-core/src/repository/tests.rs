use super::*;
use crate::auth::roles::{Role, StaticPrincipalManager};
use crate::auth::token::SessionTokenManager;
use crate::maintenance::MaintenanceTask;
use crate::resource::lock::Depth;
use crate::resource::revision::RevisionType;
use crate::storage::memory::{InMemoryContentStore, InMemoryDataAccessor, InMemoryRevisionStore};
use chrono::Duration;

struct Harness {
    repo: Repository,
    root: String,
    alice: String,
    bob: String,
    carol: String,
}

fn harness_with(config: RepositoryConfig) -> Harness {
    let principals = Arc::new(StaticPrincipalManager::new());
    for user in ["root", "alice", "bob", "carol"] {
        principals.add_user(user);
    }
    principals.grant_role("root", Role::Root);

    let root_acl = Acl::new()
        .with(Privilege::All, Principal::user("alice"))
        .with(Privilege::ReadWrite, Principal::user("bob"))
        .with(Privilege::Read, Principal::everyone());
    let dao = Arc::new(InMemoryDataAccessor::new(root_acl, &Principal::user("root")));
    let tokens = Arc::new(SessionTokenManager::new());
    let repo = Repository::new(
        dao,
        Arc::new(InMemoryContentStore::new()),
        Arc::new(InMemoryRevisionStore::new()),
        tokens.clone(),
        principals,
        config,
    )
    .unwrap();

    Harness {
        repo,
        root: tokens.issue(Principal::user("root")),
        alice: tokens.issue(Principal::user("alice")),
        bob: tokens.issue(Principal::user("bob")),
        carol: tokens.issue(Principal::user("carol")),
    }
}

fn harness() -> Harness {
    harness_with(RepositoryConfig::default())
}

fn p(s: &str) -> Path {
    Path::from_string(s).unwrap()
}

async fn doc_with(h: &Harness, uri: &str, body: &str) -> Resource {
    h.repo.create_document(Some(h.alice.as_str()), &p(uri), true).await.unwrap();
    h.repo
        .store_content(Some(h.alice.as_str()), &p(uri), body.as_bytes())
        .await
        .unwrap()
}

#[tokio::test]
async fn create_inherits_parent_acl_and_announces() {
    let h = harness();
    let mut events = h.repo.events().subscribe();

    let docs = h.repo.create_collection(Some(h.alice.as_str()), &p("/docs")).await.unwrap();
    assert!(docs.is_inherited_acl());
    assert_eq!(docs.owner(), &Principal::user("alice"));

    let root = h.repo.retrieve(None, &Path::root(), false).await.unwrap();
    assert_eq!(docs.acl_inherited_from(), root.id());
    assert_eq!(root.child_uris(), &[p("/docs")]);

    match events.recv().await.unwrap() {
        RepositoryEvent::PropertiesModified { after, .. } => assert!(after.uri().is_root()),
        other => panic!("unexpected event {:?}", other),
    }
    match events.recv().await.unwrap() {
        RepositoryEvent::Created { resource, .. } => assert_eq!(resource.uri(), &p("/docs")),
        other => panic!("unexpected event {:?}", other),
    }
}

#[tokio::test]
async fn create_rejects_bad_targets() {
    let h = harness();
    doc_with(&h, "/file", "x").await;

    let err = h.repo.create_document(Some(h.alice.as_str()), &p("/file"), true).await.unwrap_err();
    assert!(matches!(err, RepositoryError::IllegalOperation(_)));
    let err = h.repo.create_document(Some(h.alice.as_str()), &p("/missing/doc"), true).await.unwrap_err();
    assert!(matches!(err, RepositoryError::NotFound(_)));
    let err = h.repo.create_document(Some(h.alice.as_str()), &p("/file/doc"), true).await.unwrap_err();
    assert!(matches!(err, RepositoryError::IllegalOperation(_)));
}

#[tokio::test]
async fn create_requires_identity_and_privilege() {
    let h = harness();
    let err = h.repo.create_collection(None, &p("/a")).await.unwrap_err();
    assert!(matches!(err, RepositoryError::Unauthenticated));
    let err = h.repo.create_collection(Some(h.carol.as_str()), &p("/a")).await.unwrap_err();
    assert!(matches!(err, RepositoryError::Forbidden));
    h.repo.create_collection(Some(h.bob.as_str()), &p("/a")).await.unwrap();
}

#[tokio::test]
async fn fan_out_is_bounded() {
    let h = harness_with(RepositoryConfig {
        max_children: 2,
        ..RepositoryConfig::default()
    });
    h.repo.create_collection(Some(h.alice.as_str()), &p("/a")).await.unwrap();
    h.repo.create_collection(Some(h.alice.as_str()), &p("/b")).await.unwrap();
    let err = h.repo.create_collection(Some(h.alice.as_str()), &p("/c")).await.unwrap_err();
    assert!(matches!(err, RepositoryError::IllegalOperation(_)));
}

#[tokio::test]
async fn store_content_records_checksum() {
    let h = harness();
    let doc = doc_with(&h, "/hello.txt", "hello world").await;
    assert_eq!(doc.content_length(), 11);
    assert_eq!(
        doc.content_checksum(),
        Some("b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9")
    );
    let body = h.repo.get_content(None, &p("/hello.txt"), false).await.unwrap();
    assert_eq!(body, Bytes::from_static(b"hello world"));

    let err = h
        .repo
        .store_content(Some(h.alice.as_str()), &Path::root(), &b"no"[..])
        .await
        .unwrap_err();
    assert!(matches!(err, RepositoryError::IllegalOperation(_)));
}

#[tokio::test]
async fn store_keeps_system_attributes() {
    let h = harness();
    let doc = doc_with(&h, "/doc", "x").await;
    let mut edited = doc.clone();
    edited.set_property(crate::resource::property::Property::new("dc", "title", "Doc"));
    edited.set_published(false);
    let stored = h.repo.store(Some(h.bob.as_str()), &edited).await.unwrap();
    assert_eq!(stored.property("dc", "title").and_then(|v| v.as_str()), Some("Doc"));
    assert!(stored.is_published());
    assert_eq!(stored.modified_by(), &Principal::user("bob"));
    assert_eq!(stored.owner(), &Principal::user("alice"));
}

#[tokio::test]
async fn copy_into_own_subtree_fails_before_authorization() {
    let h = harness();
    h.repo.create_collection(Some(h.alice.as_str()), &p("/a")).await.unwrap();
    let err = h.repo.copy(None, &p("/a"), &p("/a/b"), false, false).await.unwrap_err();
    assert!(matches!(err, RepositoryError::IllegalOperation(_)));
}

#[tokio::test]
async fn copy_duplicates_subtree_with_fresh_system_properties() {
    let h = harness();
    h.repo.create_collection(Some(h.alice.as_str()), &p("/src")).await.unwrap();
    doc_with(&h, "/src/a.txt", "alpha").await;

    let copy = h.repo.copy(Some(h.bob.as_str()), &p("/src"), &p("/dst"), false, false).await.unwrap();
    assert_eq!(copy.owner(), &Principal::user("bob"));
    assert!(copy.is_inherited_acl());
    assert_eq!(
        h.repo.get_content(None, &p("/dst/a.txt"), false).await.unwrap(),
        Bytes::from_static(b"alpha")
    );
    let root = h.repo.retrieve(None, &Path::root(), false).await.unwrap();
    assert!(root.child_uris().contains(&p("/dst")));

    let err = h.repo.copy(Some(h.bob.as_str()), &p("/src"), &p("/dst"), false, false).await.unwrap_err();
    assert!(matches!(err, RepositoryError::Overwrite(_)));
    h.repo.copy(Some(h.alice.as_str()), &p("/src"), &p("/dst"), true, false).await.unwrap();
}

#[tokio::test]
async fn copy_with_preserve_keeps_owned_acl() {
    let h = harness();
    doc_with(&h, "/private", "secret").await;
    let own = Acl::new()
        .with(Privilege::All, Principal::user("alice"))
        .with(Privilege::Read, Principal::user("bob"));
    h.repo.store_acl(Some(h.alice.as_str()), &p("/private"), own.clone()).await.unwrap();

    let kept = h.repo.copy(Some(h.alice.as_str()), &p("/private"), &p("/kept"), false, true).await.unwrap();
    assert!(!kept.is_inherited_acl());
    assert_eq!(kept.acl(), &own);

    let fresh = h.repo.copy(Some(h.alice.as_str()), &p("/private"), &p("/fresh"), false, false).await.unwrap();
    assert!(fresh.is_inherited_acl());
}

#[tokio::test]
async fn move_reparents_and_emits_creation_and_deletion() {
    let h = harness();
    h.repo.create_collection(Some(h.alice.as_str()), &p("/a")).await.unwrap();
    h.repo.create_collection(Some(h.alice.as_str()), &p("/b")).await.unwrap();
    let doc = doc_with(&h, "/a/doc", "body").await;
    let mut events = h.repo.events().subscribe();

    let moved = h.repo.move_resource(Some(h.alice.as_str()), &p("/a/doc"), &p("/b/doc"), false).await.unwrap();
    assert_eq!(moved.id(), doc.id());
    assert_eq!(moved.acl_inherited_from(), doc.acl_inherited_from());
    assert!(!h.repo.exists(&p("/a/doc")).await.unwrap());
    assert!(h.repo.retrieve(None, &p("/a"), false).await.unwrap().child_uris().is_empty());
    assert_eq!(h.repo.retrieve(None, &p("/b"), false).await.unwrap().child_uris(), &[p("/b/doc")]);

    let mut created = false;
    let mut deleted = false;
    while let Ok(event) = events.try_recv() {
        match event {
            RepositoryEvent::Created { resource, .. } => created |= resource.uri() == &p("/b/doc"),
            RepositoryEvent::Deleted { uri, .. } => deleted |= uri == p("/a/doc"),
            _ => {}
        }
    }
    assert!(created && deleted);
}

#[tokio::test]
async fn move_within_one_collection_renames() {
    let h = harness();
    doc_with(&h, "/old", "x").await;
    h.repo.move_resource(Some(h.alice.as_str()), &p("/old"), &p("/new"), false).await.unwrap();
    let root = h.repo.retrieve(None, &Path::root(), false).await.unwrap();
    assert_eq!(root.child_uris(), &[p("/new")]);
}

#[tokio::test]
async fn move_with_overwrite_replaces_destination() {
    let h = harness();
    let src = doc_with(&h, "/src", "new").await;
    let old = doc_with(&h, "/dst", "old").await;

    let err = h
        .repo
        .move_resource(Some(h.alice.as_str()), &p("/src"), &p("/dst"), false)
        .await
        .unwrap_err();
    assert!(matches!(err, RepositoryError::Overwrite(_)));
    let err = h
        .repo
        .move_resource(Some(h.carol.as_str()), &p("/src"), &p("/dst"), true)
        .await
        .unwrap_err();
    assert!(matches!(err, RepositoryError::Forbidden));
    assert_eq!(h.repo.retrieve(None, &p("/dst"), false).await.unwrap().id(), old.id());

    let mut events = h.repo.events().subscribe();
    let moved = h
        .repo
        .move_resource(Some(h.alice.as_str()), &p("/src"), &p("/dst"), true)
        .await
        .unwrap();
    assert_eq!(moved.id(), src.id());
    assert!(!h.repo.exists(&p("/src")).await.unwrap());
    assert_eq!(
        h.repo.get_content(None, &p("/dst"), false).await.unwrap(),
        Bytes::from_static(b"new")
    );
    let root = h.repo.retrieve(None, &Path::root(), false).await.unwrap();
    assert_eq!(root.child_uris(), &[p("/dst")]);

    let mut replaced = false;
    while let Ok(event) = events.try_recv() {
        if let RepositoryEvent::Deleted { resource, .. } = event {
            replaced |= resource.id() == old.id();
        }
    }
    assert!(replaced);
}

#[tokio::test]
async fn locks_block_other_principals_until_expired() {
    let h = harness();
    doc_with(&h, "/doc", "x").await;
    h.repo
        .lock(Some(h.alice.as_str()), &p("/doc"), "alice", Depth::Zero, Some(60), None)
        .await
        .unwrap();
    let err = h
        .repo
        .store_content(Some(h.bob.as_str()), &p("/doc"), &b"y"[..])
        .await
        .unwrap_err();
    assert!(matches!(err, RepositoryError::Locked(_)));
    let err = h.repo.delete(Some(h.bob.as_str()), &p("/doc"), false).await.unwrap_err();
    assert!(matches!(err, RepositoryError::Locked(_)));

    h.repo.unlock(Some(h.alice.as_str()), &p("/doc"), None).await.unwrap();
    h.repo
        .lock(Some(h.alice.as_str()), &p("/doc"), "alice", Depth::Zero, Some(0), None)
        .await
        .unwrap();
    h.repo.store_content(Some(h.bob.as_str()), &p("/doc"), &b"y"[..]).await.unwrap();
}

#[tokio::test]
async fn lock_timeout_above_maximum_uses_default() {
    let h = harness();
    doc_with(&h, "/doc", "x").await;
    let before = Utc::now();
    let lock = h
        .repo
        .lock(Some(h.alice.as_str()), &p("/doc"), "", Depth::Zero, Some(100_000), None)
        .await
        .unwrap();
    let secs = (lock.timeout() - before).num_seconds();
    assert!((1799..=1801).contains(&secs), "timeout was {}s", secs);
}

#[tokio::test]
async fn lock_timeout_near_integer_limits_falls_back() {
    let h = harness_with(RepositoryConfig {
        lock_max_timeout_secs: crate::config::MAX_LOCK_TIMEOUT_SECS,
        ..RepositoryConfig::default()
    });
    doc_with(&h, "/doc", "x").await;
    let before = Utc::now();
    let lock = h
        .repo
        .lock(Some(h.alice.as_str()), &p("/doc"), "", Depth::Zero, Some(u64::MAX), None)
        .await
        .unwrap();
    let secs = (lock.timeout() - before).num_seconds();
    assert!((1799..=1801).contains(&secs), "timeout was {}s", secs);

    let lock = h
        .repo
        .lock(
            Some(h.alice.as_str()),
            &p("/doc"),
            "",
            Depth::Zero,
            Some(crate::config::MAX_LOCK_TIMEOUT_SECS),
            Some(lock.token()),
        )
        .await
        .unwrap();
    assert!(lock.timeout() > before + Duration::days(364));
}

#[tokio::test]
async fn lock_and_unlock_announce_property_changes() {
    let h = harness();
    doc_with(&h, "/doc", "x").await;
    let mut events = h.repo.events().subscribe();

    h.repo
        .lock(Some(h.alice.as_str()), &p("/doc"), "", Depth::Zero, None, None)
        .await
        .unwrap();
    match events.recv().await.unwrap() {
        RepositoryEvent::PropertiesModified { before, after, by } => {
            assert_eq!(after.uri(), &p("/doc"));
            assert!(before.lock().is_none());
            assert!(after.lock().is_some());
            assert_eq!(by, Some(Principal::user("alice")));
        }
        other => panic!("unexpected event {:?}", other),
    }

    h.repo.unlock(Some(h.alice.as_str()), &p("/doc"), None).await.unwrap();
    match events.recv().await.unwrap() {
        RepositoryEvent::PropertiesModified { before, after, .. } => {
            assert!(before.lock().is_some());
            assert!(after.lock().is_none());
        }
        other => panic!("unexpected event {:?}", other),
    }
}

#[tokio::test]
async fn lock_refresh_requires_matching_token() {
    let h = harness();
    doc_with(&h, "/doc", "x").await;
    let lock = h
        .repo
        .lock(Some(h.alice.as_str()), &p("/doc"), "", Depth::Zero, None, None)
        .await
        .unwrap();

    let err = h
        .repo
        .lock(Some(h.alice.as_str()), &p("/doc"), "", Depth::Zero, None, Some("opaquelocktoken:nope"))
        .await
        .unwrap_err();
    assert!(matches!(err, RepositoryError::IllegalOperation(_)));

    let refreshed = h
        .repo
        .lock(Some(h.alice.as_str()), &p("/doc"), "new info", Depth::Zero, Some(120), Some(lock.token()))
        .await
        .unwrap();
    assert_eq!(refreshed.token(), lock.token());
    assert_eq!(refreshed.owner_info(), "new info");

    let err = h
        .repo
        .lock(Some(h.alice.as_str()), &p("/doc"), "", Depth::Infinity, None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, RepositoryError::IllegalOperation(_)));
}

#[tokio::test]
async fn unlock_by_other_principal_needs_all() {
    let h = harness();
    doc_with(&h, "/doc", "x").await;
    h.repo
        .lock(Some(h.bob.as_str()), &p("/doc"), "", Depth::Zero, None, None)
        .await
        .unwrap();
    let err = h.repo.unlock(Some(h.carol.as_str()), &p("/doc"), None).await.unwrap_err();
    assert!(matches!(err, RepositoryError::Forbidden));
    h.repo.unlock(Some(h.alice.as_str()), &p("/doc"), None).await.unwrap();
}

#[tokio::test]
async fn root_is_never_deleted() {
    let h = harness();
    for token in [h.root.as_str(), h.alice.as_str()] {
        let err = h.repo.delete(Some(token), &Path::root(), false).await.unwrap_err();
        assert!(matches!(err, RepositoryError::IllegalOperation(_)));
    }
}

#[tokio::test]
async fn restorable_delete_and_recover() {
    let h = harness();
    h.repo.create_collection(Some(h.alice.as_str()), &p("/dir")).await.unwrap();
    let doc = doc_with(&h, "/dir/doc", "kept").await;

    h.repo.delete(Some(h.alice.as_str()), &p("/dir/doc"), true).await.unwrap();
    assert!(!h.repo.exists(&p("/dir/doc")).await.unwrap());
    let trash = h.repo.get_recoverable_resources(None, &p("/dir")).await.unwrap();
    assert_eq!(trash.len(), 1);
    assert_eq!(trash[0].id, format!("trash-{}", doc.id().unwrap()));
    assert!(trash[0].was_inherited_acl);

    let recovered = h.repo.recover(Some(h.alice.as_str()), &p("/dir"), &trash[0]).await.unwrap();
    assert_eq!(recovered.id(), doc.id());
    assert!(recovered.is_inherited_acl());
    assert_eq!(
        h.repo.get_content(None, &p("/dir/doc"), false).await.unwrap(),
        Bytes::from_static(b"kept")
    );
    assert!(h.repo.get_recoverable_resources(None, &p("/dir")).await.unwrap().is_empty());
}

#[tokio::test]
async fn recover_onto_existing_path_is_overwrite() {
    let h = harness();
    doc_with(&h, "/doc", "one").await;
    h.repo.delete(Some(h.alice.as_str()), &p("/doc"), true).await.unwrap();
    doc_with(&h, "/doc", "two").await;
    let trash = h.repo.get_recoverable_resources(None, &Path::root()).await.unwrap();
    let err = h.repo.recover(Some(h.alice.as_str()), &Path::root(), &trash[0]).await.unwrap_err();
    assert!(matches!(err, RepositoryError::Overwrite(_)));

    h.repo.delete_recoverable(Some(h.alice.as_str()), &Path::root(), &trash[0]).await.unwrap();
    assert!(h.repo.get_recoverable_resources(None, &Path::root()).await.unwrap().is_empty());
}

#[tokio::test]
async fn comments_stay_with_trashed_resources() {
    let h = harness();
    doc_with(&h, "/doc", "one").await;
    h.repo
        .add_comment(Some(h.bob.as_str()), &p("/doc"), None, "on the first one")
        .await
        .unwrap();
    h.repo.delete(Some(h.alice.as_str()), &p("/doc"), true).await.unwrap();

    doc_with(&h, "/doc", "two").await;
    assert!(h.repo.get_comments(None, &p("/doc")).await.unwrap().is_empty());

    h.repo.delete(Some(h.alice.as_str()), &p("/doc"), false).await.unwrap();
    let trash = h.repo.get_recoverable_resources(None, &Path::root()).await.unwrap();
    h.repo.recover(Some(h.alice.as_str()), &Path::root(), &trash[0]).await.unwrap();
    let comments = h.repo.get_comments(None, &p("/doc")).await.unwrap();
    assert_eq!(comments.len(), 1);
    assert_eq!(comments[0].content, "on the first one");
}

#[tokio::test]
async fn nested_trash_survives_while_its_parent_is_trashed() {
    let h = harness();
    h.repo.create_collection(Some(h.alice.as_str()), &p("/dir")).await.unwrap();
    doc_with(&h, "/dir/doc", "inner").await;
    h.repo.delete(Some(h.alice.as_str()), &p("/dir/doc"), true).await.unwrap();
    h.repo.delete(Some(h.alice.as_str()), &p("/dir"), true).await.unwrap();

    assert_eq!(h.repo.purge_trash(Utc::now()).await.unwrap(), 0);

    let trash = h.repo.get_recoverable_resources(None, &Path::root()).await.unwrap();
    h.repo.recover(Some(h.alice.as_str()), &Path::root(), &trash[0]).await.unwrap();
    let inner = h.repo.get_recoverable_resources(None, &p("/dir")).await.unwrap();
    assert_eq!(inner.len(), 1);
    h.repo.recover(Some(h.alice.as_str()), &p("/dir"), &inner[0]).await.unwrap();
    assert_eq!(
        h.repo.get_content(None, &p("/dir/doc"), false).await.unwrap(),
        Bytes::from_static(b"inner")
    );
}

#[tokio::test]
async fn purged_trash_drops_subtree_revisions() {
    let h = harness();
    h.repo.create_collection(Some(h.alice.as_str()), &p("/dir")).await.unwrap();
    let doc = doc_with(&h, "/dir/doc", "v1").await;
    h.repo
        .create_revision(Some(h.bob.as_str()), &p("/dir/doc"), RevisionType::Regular)
        .await
        .unwrap();
    let doc_id = doc.id().unwrap();
    assert_eq!(h.repo.revisions.list(doc_id).await.unwrap().len(), 1);

    h.repo.delete(Some(h.alice.as_str()), &p("/dir"), true).await.unwrap();
    assert_eq!(h.repo.purge_trash(Utc::now() + Duration::days(61)).await.unwrap(), 1);
    assert!(h.repo.revisions.list(doc_id).await.unwrap().is_empty());
}

#[tokio::test]
async fn acl_store_validates_new_entries_only() {
    let mut config = RepositoryConfig::default();
    config
        .permission_blacklist
        .insert(Privilege::ReadWrite, vec!["user:car*".to_string()]);
    let h = harness_with(config);
    doc_with(&h, "/doc", "x").await;

    let mut acl = Acl::new().with(Privilege::All, Principal::user("alice"));
    acl.add_entry(Privilege::ReadWrite, Principal::user("carol"));
    let err = h.repo.store_acl(Some(h.alice.as_str()), &p("/doc"), acl).await.unwrap_err();
    assert!(matches!(err, RepositoryError::IllegalOperation(_)));

    let acl = Acl::new().with(Privilege::ReadWrite, Principal::everyone());
    assert!(h.repo.store_acl(Some(h.alice.as_str()), &p("/doc"), acl).await.is_err());
    let acl = Acl::new().with(Privilege::Read, Principal::user("nobody"));
    assert!(h.repo.store_acl(Some(h.alice.as_str()), &p("/doc"), acl).await.is_err());

    let stored = h
        .repo
        .store_acl(
            Some(h.alice.as_str()),
            &p("/doc"),
            Acl::new()
                .with(Privilege::All, Principal::user("alice"))
                .with(Privilege::ReadWrite, Principal::user("bob")),
        )
        .await
        .unwrap();
    assert!(!stored.is_inherited_acl());

    let err = h
        .repo
        .store_acl(Some(h.carol.as_str()), &p("/doc"), Acl::new())
        .await
        .unwrap_err();
    assert!(matches!(err, RepositoryError::Forbidden));
}

#[tokio::test]
async fn delete_acl_reverts_to_inheritance() {
    let h = harness();
    doc_with(&h, "/doc", "x").await;
    h.repo
        .store_acl(Some(h.alice.as_str()), &p("/doc"), Acl::new().with(Privilege::All, Principal::user("alice")))
        .await
        .unwrap();
    assert!(h.repo.retrieve(None, &p("/doc"), false).await.is_err());

    let reverted = h.repo.delete_acl(Some(h.alice.as_str()), &p("/doc")).await.unwrap();
    assert!(reverted.is_inherited_acl());
    h.repo.retrieve(None, &p("/doc"), false).await.unwrap();

    let err = h.repo.delete_acl(Some(h.root.as_str()), &Path::root()).await.unwrap_err();
    assert!(matches!(err, RepositoryError::IllegalOperation(_)));
}

#[tokio::test]
async fn unpublished_documents_are_hidden_from_readers() {
    let h = harness();
    h.repo.create_document(Some(h.alice.as_str()), &p("/draft"), false).await.unwrap();
    let err = h.repo.retrieve(None, &p("/draft"), false).await.unwrap_err();
    assert!(matches!(err, RepositoryError::Unauthenticated));
    h.repo.retrieve(Some(h.bob.as_str()), &p("/draft"), false).await.unwrap();

    let children = h.repo.list_children(Some(h.carol.as_str()), &Path::root(), false).await.unwrap();
    assert!(children.is_empty());

    h.repo.set_published(Some(h.bob.as_str()), &p("/draft"), true).await.unwrap();
    h.repo.retrieve(None, &p("/draft"), false).await.unwrap();
}

#[tokio::test]
async fn read_only_mode_blocks_non_root_mutation() {
    let h = harness();
    let err = h.repo.set_read_only(Some(h.alice.as_str()), true).await.unwrap_err();
    assert!(matches!(err, RepositoryError::Forbidden));
    h.repo.set_read_only(Some(h.root.as_str()), true).await.unwrap();
    assert!(h.repo.is_read_only());

    let err = h.repo.create_collection(Some(h.alice.as_str()), &p("/a")).await.unwrap_err();
    assert!(matches!(err, RepositoryError::ReadOnly));
    h.repo.create_collection(Some(h.root.as_str()), &p("/a")).await.unwrap();
    h.repo.retrieve(Some(h.alice.as_str()), &p("/a"), false).await.unwrap();
}

#[tokio::test]
async fn regular_revisions_track_change_amount() {
    let h = harness();
    doc_with(&h, "/doc", "a\nb\nc").await;
    let r1 = h.repo.create_revision(Some(h.bob.as_str()), &p("/doc"), RevisionType::Regular).await.unwrap();
    assert_eq!(r1.name, "1");
    assert_eq!(r1.change_amount, None);

    h.repo.store_content(Some(h.bob.as_str()), &p("/doc"), &b"a\nx\nc"[..]).await.unwrap();
    let r2 = h.repo.create_revision(Some(h.bob.as_str()), &p("/doc"), RevisionType::Regular).await.unwrap();
    assert_eq!(r2.name, "2");
    assert_eq!(r2.change_amount, Some(2));

    h.repo.store_content(Some(h.bob.as_str()), &p("/doc"), &b"a\nx\nc\nd"[..]).await.unwrap();
    let r3 = h.repo.create_revision(Some(h.bob.as_str()), &p("/doc"), RevisionType::Regular).await.unwrap();
    assert_eq!(r3.change_amount, Some(1));

    let listed = h.repo.get_revisions(None, &p("/doc")).await.unwrap();
    assert_eq!(listed.iter().map(|r| r.name.as_str()).collect::<Vec<_>>(), ["3", "2", "1"]);

    let err = h.repo.delete_revision(Some(h.bob.as_str()), &p("/doc"), r2.id).await.unwrap_err();
    assert!(matches!(err, RepositoryError::Forbidden));
    h.repo.delete_revision(Some(h.alice.as_str()), &p("/doc"), r2.id).await.unwrap();
    let listed = h.repo.get_revisions(None, &p("/doc")).await.unwrap();
    assert_eq!(listed[0].change_amount, Some(3));

    h.repo.delete_revision(Some(h.alice.as_str()), &p("/doc"), r1.id).await.unwrap();
    let listed = h.repo.get_revisions(None, &p("/doc")).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].change_amount, None);
    assert_eq!(
        h.repo.get_revision_content(None, &p("/doc"), r3.id).await.unwrap(),
        Bytes::from_static(b"a\nx\nc\nd")
    );
}

#[tokio::test]
async fn single_working_copy() {
    let h = harness();
    doc_with(&h, "/doc", "v1").await;
    let wc = h
        .repo
        .create_revision(Some(h.bob.as_str()), &p("/doc"), RevisionType::WorkingCopy)
        .await
        .unwrap();
    assert_eq!(wc.name, WORKING_COPY);
    let err = h
        .repo
        .create_revision(Some(h.bob.as_str()), &p("/doc"), RevisionType::WorkingCopy)
        .await
        .unwrap_err();
    assert!(matches!(err, RepositoryError::IllegalOperation(_)));

    let updated = h
        .repo
        .store_revision_content(Some(h.bob.as_str()), &p("/doc"), wc.id, &b"v2"[..])
        .await
        .unwrap();
    assert_ne!(updated.checksum, wc.checksum);
    assert_eq!(
        h.repo.get_revision_content(None, &p("/doc"), wc.id).await.unwrap(),
        Bytes::from_static(b"v2")
    );
    h.repo.delete_revision(Some(h.bob.as_str()), &p("/doc"), wc.id).await.unwrap();

    let err = h
        .repo
        .create_revision(Some(h.alice.as_str()), &Path::root(), RevisionType::Regular)
        .await
        .unwrap_err();
    assert!(matches!(err, RepositoryError::IllegalOperation(_)));
}

const WORKING_COPY: &str = crate::resource::revision::WORKING_COPY_NAME;

#[tokio::test]
async fn comments_are_bounded_and_editable() {
    let h = harness_with(RepositoryConfig {
        max_comments: 1,
        ..RepositoryConfig::default()
    });
    doc_with(&h, "/doc", "x").await;
    let err = h.repo.add_comment(None, &p("/doc"), None, "hi").await.unwrap_err();
    assert!(matches!(err, RepositoryError::Unauthenticated));

    let mut comment = h
        .repo
        .add_comment(Some(h.bob.as_str()), &p("/doc"), Some("Title".into()), "first")
        .await
        .unwrap();
    let err = h.repo.add_comment(Some(h.bob.as_str()), &p("/doc"), None, "second").await.unwrap_err();
    assert!(matches!(err, RepositoryError::IllegalOperation(_)));

    comment.content = "edited".to_string();
    let err = h.repo.update_comment(Some(h.bob.as_str()), &p("/doc"), &comment).await.unwrap_err();
    assert!(matches!(err, RepositoryError::Forbidden));
    h.repo.update_comment(Some(h.alice.as_str()), &p("/doc"), &comment).await.unwrap();
    let comments = h.repo.get_comments(None, &p("/doc")).await.unwrap();
    assert_eq!(comments[0].content, "edited");

    h.repo.delete_comment(Some(h.alice.as_str()), &p("/doc"), comment.id).await.unwrap();
    assert!(h.repo.get_comments(None, &p("/doc")).await.unwrap().is_empty());
    h.repo.add_comment(Some(h.bob.as_str()), &p("/doc"), None, "again").await.unwrap();
    h.repo.delete_all_comments(Some(h.alice.as_str()), &p("/doc")).await.unwrap();
    assert!(h.repo.get_comments(None, &p("/doc")).await.unwrap().is_empty());
}

#[tokio::test]
async fn maintenance_expires_locks_and_purges_trash() {
    let h = harness();
    doc_with(&h, "/locked", "x").await;
    doc_with(&h, "/trashed", "y").await;
    h.repo
        .lock(Some(h.alice.as_str()), &p("/locked"), "", Depth::Zero, Some(0), None)
        .await
        .unwrap();
    h.repo.delete(Some(h.alice.as_str()), &p("/trashed"), true).await.unwrap();

    let report = MaintenanceTask::run_once(&h.repo).await;
    assert_eq!(report.locks_expired, 1);
    assert_eq!(report.trash_purged, 0);

    assert_eq!(h.repo.purge_trash(Utc::now() + Duration::days(61)).await.unwrap(), 1);
    assert!(h.repo.get_recoverable_resources(None, &Path::root()).await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn maintenance_task_runs_until_stopped() {
    let h = harness();
    doc_with(&h, "/doc", "x").await;
    h.repo
        .lock(Some(h.alice.as_str()), &p("/doc"), "", Depth::Zero, Some(0), None)
        .await
        .unwrap();
    let Harness { repo, alice, .. } = h;
    let repo = Arc::new(repo);

    let task = MaintenanceTask::spawn(repo.clone(), std::time::Duration::from_secs(60));
    tokio::time::sleep(std::time::Duration::from_secs(1)).await;
    assert!(repo.retrieve(None, &p("/doc"), false).await.unwrap().lock().is_none());

    task.stop().await.unwrap();
    repo.lock(Some(alice.as_str()), &p("/doc"), "", Depth::Zero, Some(0), None)
        .await
        .unwrap();
    tokio::time::sleep(std::time::Duration::from_secs(120)).await;
    assert!(repo.retrieve(None, &p("/doc"), false).await.unwrap().lock().is_some());
}

#[tokio::test]
async fn is_authorized_reports_without_failing() {
    let h = harness();
    doc_with(&h, "/doc", "x").await;
    assert!(h.repo.is_authorized(None, &p("/doc"), RepositoryAction::Read).await.unwrap());
    assert!(!h.repo.is_authorized(None, &p("/doc"), RepositoryAction::Write).await.unwrap());
    assert!(h.repo.is_authorized(Some(h.bob.as_str()), &p("/doc"), RepositoryAction::Write).await.unwrap());
    assert!(!h.repo.is_authorized(Some(h.bob.as_str()), &p("/doc"), RepositoryAction::WriteAcl).await.unwrap());
    assert!(h.repo.is_valid_acl_entry(Privilege::Read, &Principal::user("carol")).await);
}
