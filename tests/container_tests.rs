use rest_model::{
    default_container, AppEvents, Container, GenericModel, ModelArgs, RestError, RestModel,
    SiteSettings, Store, APP_EVENTS_SERVICE, SITE_SETTINGS_SERVICE, STORE_SERVICE,
};
use serde_json::json;
use std::sync::Arc;
use tokio_test::assert_ok;


use mock_store::{props, MockStore, PostModel};

fn container_with(store: Arc<MockStore>) -> Container {
    let container = Container::new();
    container.register(STORE_SERVICE, store as Arc<dyn Store>);
    container.register(SITE_SETTINGS_SERVICE, Arc::new(SiteSettings::default().with("title", "Forum")));
    container.register(APP_EVENTS_SERVICE, Arc::new(AppEvents::new()));
    container
}

#[tokio::test]
async fn test_create_fills_collaborators_from_container() {
    let store = MockStore::new();
    let container = container_with(store.clone());

    let post = RestModel::create_in(
        &container,
        PostModel::new(),
        ModelArgs::new("post").with_property("id", json!(2)),
    )
    .unwrap();

    assert_eq!(post.site_settings().get_str("title"), Some("Forum"));
    assert_ok!(post.save(Some(props(json!({"raw": "via container"})))).await);
    assert_eq!(store.update_calls().len(), 1);
}

#[test]
fn test_explicit_collaborators_win_over_container() {
    let container = container_with(MockStore::new());
    let settings = Arc::new(SiteSettings::default().with("title", "Explicit"));

    let post = RestModel::create_in(
        &container,
        Arc::new(GenericModel),
        ModelArgs::new("post").with_site_settings(settings.clone()),
    )
    .unwrap();

    assert!(Arc::ptr_eq(post.site_settings(), &settings));
}

#[test]
fn test_missing_collaborator_is_an_error() {
    let container = Container::new();
    container.register(STORE_SERVICE, MockStore::new() as Arc<dyn Store>);

    let result = RestModel::create_in(&container, Arc::new(GenericModel), ModelArgs::new("post"));

    match result {
        Err(RestError::MissingService { name }) => assert_eq!(name, SITE_SETTINGS_SERVICE),
        other => panic!("expected MissingService, got {:?}", other),
    }
}

#[test]
fn test_create_munges_initial_properties() {
    let container = container_with(MockStore::new());

    let post = RestModel::create_in(
        &container,
        PostModel::new(),
        ModelArgs::new("post").with_properties(props(json!({"cooked": "<p>x</p>"}))),
    )
    .unwrap();

    assert_eq!(post.get("html"), Some(json!("<p>x</p>")));
    assert!(post.is_new());
}

// The only test in this binary that touches the process-wide container
#[tokio::test]
async fn test_create_uses_the_default_container() {
    let store = MockStore::new();
    let container = default_container();
    container.register(STORE_SERVICE, store.clone() as Arc<dyn Store>);
    container.register(SITE_SETTINGS_SERVICE, Arc::new(SiteSettings::default()));
    container.register(APP_EVENTS_SERVICE, Arc::new(AppEvents::new()));

    let post = RestModel::create(PostModel::new(), ModelArgs::new("post")).unwrap();
    assert_ok!(post.save(Some(props(json!({"raw": "ambient"})))).await);
    assert_eq!(store.adapter.calls().len(), 1);

    container.unregister(STORE_SERVICE);
    let err = RestModel::create(PostModel::new(), ModelArgs::new("post")).unwrap_err();
    assert!(matches!(err, RestError::MissingService { .. }));
}
