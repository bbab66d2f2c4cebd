use ketone_core::{
    AdapterConfig, Codec, MemoryTransport, Method, Record, RecordId, RecordState, Relationship,
    RestAdapter, SchemaError, Settlement, Store, StoreError, TypeDescriptor, TypeRegistry,
};
use serde_json::json;
use std::sync::Arc;

fn registry() -> TypeRegistry {
    let mut registry = TypeRegistry::new();
    registry
        .register(
            TypeDescriptor::new("person")
                .attr("name", Codec::String)
                .belongs_to("group", "group")
                .has_many("roles", "role"),
        )
        .register(
            TypeDescriptor::new("group")
                .attr("name", Codec::String)
                .has_many("people", "person"),
        )
        .register(TypeDescriptor::new("role").attr("name", Codec::String))
        .register(
            TypeDescriptor::new("comment")
                .attr("body", Codec::String)
                .relationship(Relationship::belongs_to("commentable", "commentable").polymorphic())
                .relationship(Relationship::has_many("attachments", "attachment").polymorphic()),
        )
        .register(TypeDescriptor::new("photo").attr("url", Codec::String))
        .register(TypeDescriptor::new("document").attr("title", Codec::String));
    registry
}

fn setup(config: AdapterConfig) -> (Arc<MemoryTransport>, Store) {
    let transport = Arc::new(MemoryTransport::new());
    let adapter = RestAdapter::new(
        Arc::clone(&transport),
        config.with_plural("person", "people"),
    );
    (transport, Store::new(registry(), adapter).unwrap())
}

#[test]
fn belongs_to_returns_a_loading_stub() {
    let (transport, store) = setup(AdapterConfig::new());
    let person = store
        .load("person", json!({"id": 1, "name": "Tom", "group_id": 4}))
        .unwrap();
    assert_eq!(transport.request_count(), 0);

    let group = person.belongs_to("group").unwrap().unwrap();
    assert_eq!(group.state(), RecordState::Loading);
    assert_eq!(transport.last_request().unwrap().url, "/groups/4");

    // Resolution is cached.
    assert_eq!(person.belongs_to("group").unwrap(), Some(group.clone()));
    assert_eq!(transport.request_count(), 1);

    transport.respond(json!({"group": {"id": 4, "name": "Core"}}));
    assert!(group.is_loaded());
    assert_eq!(group.decode::<String>("name").unwrap(), "Core");
}

#[test]
fn a_new_foreign_key_invalidates_the_cached_target() {
    let (_, store) = setup(AdapterConfig::new());
    store
        .load_many("group", vec![json!({"id": 1}), json!({"id": 2})])
        .unwrap();
    let person = store.load("person", json!({"id": 1, "group_id": 1})).unwrap();
    assert_eq!(person.belongs_to("group").unwrap().unwrap().id(), Some(RecordId::from(1)));

    store.load("person", json!({"id": 1, "group_id": 2})).unwrap();
    assert_eq!(person.belongs_to("group").unwrap().unwrap().id(), Some(RecordId::from(2)));

    store.load("person", json!({"id": 1, "group_id": null})).unwrap();
    assert_eq!(person.belongs_to("group").unwrap(), None);
}

#[test]
fn relationship_kind_is_checked() {
    let (_, store) = setup(AdapterConfig::new());
    let person = store.load("person", json!({"id": 1})).unwrap();
    assert!(matches!(person.has_many("group"), Err(StoreError::Schema(_))));
    assert!(matches!(person.belongs_to("roles"), Err(StoreError::Schema(_))));
    assert!(matches!(person.belongs_to("boss"), Err(StoreError::Schema(_))));
}

#[test]
fn polymorphic_belongs_to_uses_the_type_key() {
    let (transport, store) = setup(AdapterConfig::new());
    let comment = store
        .load(
            "comment",
            json!({"id": 1, "commentable_id": 3, "commentable_type": "photo"}),
        )
        .unwrap();
    let target = comment.belongs_to("commentable").unwrap().unwrap();
    assert_eq!(target.type_name(), "photo");
    assert_eq!(transport.last_request().unwrap().url, "/photos/3");
}

#[test]
fn polymorphic_has_many_fetches_each_type() {
    let (transport, store) = setup(AdapterConfig::new());
    let comment = store
        .load(
            "comment",
            json!({"id": 1, "attachment_ids": [
                {"id": 1, "type": "photo"},
                {"id": 2, "type": "document"},
                {"id": 3, "type": "photo"}
            ]}),
        )
        .unwrap();

    let attachments = comment.has_many("attachments").unwrap();
    assert!(attachments.is_polymorphic());
    let types: Vec<String> = attachments
        .to_vec()
        .iter()
        .map(|r| r.type_name().to_string())
        .collect();
    assert_eq!(types, ["photo", "document", "photo"]);

    let requests = transport.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].url, "/photos");
    assert_eq!(requests[0].data, Some(json!({"ids": [1, 3]})));
    assert_eq!(requests[1].url, "/documents");
    assert_eq!(requests[1].data, Some(json!({"ids": [2]})));

    transport.respond(json!({"photos": [{"id": 3, "url": "b.png"}, {"id": 1, "url": "a.png"}]}));
    assert!(attachments.settlement().is_pending());
    transport.respond(json!({"documents": [{"id": 2, "title": "Notes"}]}));
    assert_eq!(attachments.settlement(), Settlement::Resolved);
    assert_eq!(
        attachments.first().unwrap().decode::<String>("url").unwrap(),
        "a.png"
    );
}

#[test]
fn an_unknown_polymorphic_type_leaves_no_loading_shells() {
    let (transport, store) = setup(AdapterConfig::new());
    let comment = store
        .load(
            "comment",
            json!({"id": 1, "attachment_ids": [
                {"id": 7, "type": "photo"},
                {"id": 8, "type": "video"}
            ]}),
        )
        .unwrap();

    let err = comment.has_many("attachments").unwrap_err();
    assert!(matches!(
        err,
        StoreError::Schema(SchemaError::UnknownType(ref name)) if name == "video"
    ));
    assert!(store.peek("photo", 7).is_none());
    assert_eq!(transport.request_count(), 0);

    let photo = store.find("photo", 7).unwrap();
    assert_eq!(photo.state(), RecordState::Loading);
    assert_eq!(transport.request_count(), 1);
    assert_eq!(transport.last_request().unwrap().url, "/photos/7");
}

#[test]
fn has_many_tokens_with_a_url_are_fetched_from_it() {
    let (transport, store) = setup(AdapterConfig::new().with_url("http://api.test"));
    let person = store
        .load(
            "person",
            json!({"id": 1, "role_ids": {"url": "/people/1/roles"}}),
        )
        .unwrap();
    let roles = person.has_many("roles").unwrap();
    let request = transport.last_request().unwrap();
    assert_eq!(request.method, Method::Get);
    assert_eq!(request.url, "http://api.test/people/1/roles");
    assert_eq!(request.data, None);

    transport.respond(json!({"roles": [{"id": 5, "name": "admin"}]}));
    assert_eq!(roles.len(), 1);
    assert_eq!(roles.owner(), Some(person));
    assert_eq!(store.peek("role", 5), roles.first());
}

#[test]
fn other_has_many_tokens_are_sent_as_data() {
    let (transport, store) = setup(AdapterConfig::new());
    let person = store
        .load("person", json!({"id": 1, "role_ids": {"owner": 1}}))
        .unwrap();
    person.has_many("roles").unwrap();
    let request = transport.last_request().unwrap();
    assert_eq!(request.url, "/roles");
    assert_eq!(request.data, Some(json!({"owner": 1})));
}

#[test]
fn reassigning_belongs_to_dirties_and_serializes() {
    let (transport, store) = setup(AdapterConfig::new());
    let group = store.load("group", json!({"id": 2, "name": "Ops"})).unwrap();
    let person = store
        .load("person", json!({"id": 1, "name": "Tom", "group_id": 1}))
        .unwrap();

    person.set_belongs_to("group", Some(&group)).unwrap();
    assert!(person.is_dirty());
    assert_eq!(person.belongs_to("group").unwrap(), Some(group));
    assert_eq!(person.belongs_to_id("group").unwrap(), Some(RecordId::from(2)));

    store.commit();
    assert_eq!(
        transport.last_request().unwrap().data,
        Some(json!({"person": {"name": "Tom", "group_id": 2}}))
    );
    transport.respond_empty();

    person.set_belongs_to("group", None).unwrap();
    store.commit();
    assert_eq!(
        transport.last_request().unwrap().data,
        Some(json!({"person": {"name": "Tom", "group_id": null}}))
    );

    let role = store.load("role", json!({"id": 1})).unwrap();
    assert!(matches!(
        person.set_belongs_to("group", Some(&role)),
        Err(StoreError::Unsupported(_))
    ));
}

#[test]
fn a_target_created_in_the_same_session_serializes_once_saved() {
    let (transport, store) = setup(AdapterConfig::new());
    let group = store.create_record("group", json!({"name": "New"})).unwrap();
    let person = store.create_record("person", json!({"name": "Tom"})).unwrap();
    person.set_belongs_to("group", Some(&group)).unwrap();
    assert_eq!(person.belongs_to_id("group").unwrap(), None);

    let commit = store.commit();
    assert_eq!(commit.batch_count(), 2);
    transport.respond(json!({"group": {"id": 10, "name": "New"}}));
    assert_eq!(person.belongs_to_id("group").unwrap(), Some(RecordId::from(10)));
}

#[test]
fn adding_to_has_many_dirties_the_owner() {
    let (transport, store) = setup(AdapterConfig::new());
    let group = store
        .load("group", json!({"id": 1, "name": "Core", "person_ids": []}))
        .unwrap();
    let person = store.load("person", json!({"id": 7, "name": "Tom"})).unwrap();

    group.add_to_has_many("people", &person).unwrap();
    assert!(group.is_dirty());
    assert_eq!(group.has_many("people").unwrap().to_vec(), vec![person]);
    assert_eq!(group.has_many_ids("people").unwrap(), vec![RecordId::from(7)]);

    store.commit();
    assert_eq!(
        transport.last_request().unwrap().data,
        Some(json!({"group": {"name": "Core", "person_ids": [7]}}))
    );
}

#[test]
fn filters_follow_local_changes_and_loads() {
    let (_, store) = setup(AdapterConfig::new());
    let toms = store
        .filter("person", |person| {
            person
                .decode::<Option<String>>("name")
                .ok()
                .flatten()
                .is_some_and(|name| name.starts_with("Tom"))
        })
        .unwrap();
    assert!(toms.is_loaded());

    let dale = store
        .load("person", json!({"id": 1, "name": "Tom Dale"}))
        .unwrap();
    store.load("person", json!({"id": 2, "name": "Yehuda"})).unwrap();
    assert_eq!(toms.to_vec(), vec![dale.clone()]);

    let created = store.create_record("person", json!({"name": "Tomster"})).unwrap();
    assert_eq!(toms.len(), 2);

    dale.set("name", "Dale").unwrap();
    assert_eq!(toms.to_vec(), vec![created.clone()]);

    created.delete_record().unwrap();
    assert!(toms.is_empty());
}

#[test]
fn all_excludes_loading_records() {
    let (transport, store) = setup(AdapterConfig::new());
    let everyone = store.all("person").unwrap();
    let shell = store.find("person", 1).unwrap();
    assert!(everyone.is_empty());
    transport.respond(json!({"person": {"id": 1}}));
    assert_eq!(everyone.to_vec(), vec![shell]);
}

#[test]
fn only_query_and_find_all_collections_update() {
    let (_, store) = setup(AdapterConfig::new());
    let people = store.find_many("person", [1]).unwrap();
    assert!(matches!(people.update(), Err(StoreError::Unsupported(_))));
    let everyone = store.all("person").unwrap();
    assert!(matches!(everyone.update(), Err(StoreError::Unsupported(_))));
}

#[test]
fn saving_records_are_not_sent_twice() {
    let (transport, store) = setup(AdapterConfig::new());
    let person = store.create_record("person", json!({"name": "Tom"})).unwrap();
    assert_eq!(store.commit().batch_count(), 1);
    assert_eq!(store.commit().batch_count(), 0);
    assert_eq!(transport.request_count(), 1);

    assert!(matches!(
        person.set("name", "Tomster"),
        Err(StoreError::InvalidTransition { state: RecordState::Saving, .. })
    ));
    assert!(person.delete_record().is_err());
}

#[test]
fn commit_reports_the_first_failure() {
    let (transport, store) = setup(AdapterConfig::new());
    store.create_record("person", json!({"name": "A"})).unwrap();
    store.create_record("group", json!({"name": "B"})).unwrap();
    let commit = store.commit();
    assert_eq!(commit.batch_count(), 2);

    transport.fail(500, "boom");
    assert!(!commit.is_settled());
    transport.respond(json!({"group": {"id": 1, "name": "B"}}));
    assert_eq!(
        commit.settlement(),
        Settlement::Rejected(StoreError::Transport {
            status: Some(500),
            body: "boom".into()
        })
    );
}

#[test]
fn a_created_record_replaces_a_loading_shell_with_its_id() {
    let (transport, store) = setup(AdapterConfig::new());
    let shell = store.find("person", 7).unwrap();
    let created = store.create_record("person", json!({"name": "Tom"})).unwrap();
    store.commit();

    let requests = transport.requests();
    assert_eq!(requests[1].method, Method::Post);
    transport.respond(json!({"person": {"id": 7, "name": "Tom"}}));
    assert!(shell.is_loaded());
    assert_eq!(store.peek("person", 7), Some(shell));

    transport.respond(json!({"person": {"id": 7, "name": "Tom"}}));
    assert_eq!(created.state(), RecordState::Loaded);
    assert_eq!(store.peek("person", 7), Some(created));
}

#[tokio::test]
async fn records_can_be_awaited() {
    let (transport, store) = setup(AdapterConfig::new());
    let person = store.find("person", 1).unwrap();
    let (outcome, _) = tokio::join!(person.settled(), async {
        transport.respond(json!({"person": {"id": 1, "name": "Tom"}}));
    });
    assert_eq!(outcome, Ok(()));
    assert_eq!(person.decode::<String>("name").unwrap(), "Tom");

    let missing = store.find("person", 2).unwrap();
    transport.fail(404, "not found");
    assert_eq!(
        missing.settled().await,
        Err(StoreError::Transport {
            status: Some(404),
            body: "not found".into()
        })
    );
    assert!(missing.is_error());
}

#[tokio::test]
async fn commits_and_collections_can_be_awaited() {
    let (transport, store) = setup(AdapterConfig::new());
    let people = store.find_query("person", json!({"name": "Tom"})).unwrap();
    transport.respond(json!({"people": [{"id": 1, "name": "Tom"}]}));
    people.settled().await.unwrap();
    assert_eq!(people.len(), 1);

    let person: Record = people.first().unwrap();
    person.set("name", "Thomas").unwrap();
    let commit = store.commit();
    transport.respond_empty();
    commit.settled().await.unwrap();
    assert_eq!(person.state(), RecordState::Loaded);
}
