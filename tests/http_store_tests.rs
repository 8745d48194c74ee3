use mockito::Matcher;
use rest_model::{
    Container, GenericModel, HttpStore, ModelArgs, RecordState, RestError, RestModel, SaveBody,
    SiteSettings, Store, StoreConfig,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};


use mock_store::{props, MockAdapter, PostModel};

fn store_for(server: &mockito::ServerGuard) -> Arc<HttpStore> {
    let config = StoreConfig::new(server.url())
        .with_api_key("test_api_key")
        .with_api_username("system");
    Arc::new(HttpStore::new(config).unwrap())
}

#[tokio::test]
async fn test_create_posts_wrapped_props_and_merges_reply() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/posts")
        .match_header("api-key", "test_api_key")
        .match_header("api-username", "system")
        .match_body(Matcher::Json(json!({"post": {"raw": "hello", "topic_id": 3}})))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"post": {"id": 17, "raw": "hello", "cooked": "<p>hello</p>"}}"#)
        .create_async()
        .await;

    let store = store_for(&server);
    let post = store
        .create_record(PostModel::new(), "post", props(json!({"raw": "hello", "topic_id": 3})))
        .unwrap();
    assert!(post.is_new());

    let saved = assert_ok!(post.save(None).await);

    mock.assert_async().await;
    assert_eq!(post.state(), RecordState::Created);
    assert_eq!(post.id(), Some(json!(17)));
    assert_eq!(post.get("html"), Some(json!("<p>hello</p>")));
    let response = saved.body.response().unwrap();
    assert!(response.response_json.is_some());
}

#[tokio::test]
async fn test_update_puts_to_member_route() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("PUT", "/posts/17")
        .match_body(Matcher::Json(json!({"post": {"raw": "edited", "edit_reason": "edited"}})))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"post": {"id": 17, "raw": "edited", "version": 2}}"#)
        .create_async()
        .await;

    let store = store_for(&server);
    let post = store
        .create_record(PostModel::new(), "post", props(json!({"id": 17, "raw": "original"})))
        .unwrap();

    assert_ok!(post.save(Some(props(json!({"raw": "edited"})))).await);

    mock.assert_async().await;
    assert_eq!(post.get("raw"), Some(json!("edited")));
    assert_eq!(post.get("version"), Some(json!(2)));
}

#[tokio::test]
async fn test_ok_only_update_reply_uses_submitted_props() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("PUT", "/user_fields/4")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"success": "OK"}"#)
        .create_async()
        .await;

    let store = store_for(&server);
    let field = store
        .create_record(Arc::new(GenericModel), "user-field", props(json!({"id": 4, "name": "Old"})))
        .unwrap();
    let mut warnings = store.app_events().subscribe();

    let saved = assert_ok!(field.save(Some(props(json!({"name": "New"})))).await);

    mock.assert_async().await;
    assert_eq!(saved.body, SaveBody::Submitted(props(json!({"name": "New"}))));
    assert_eq!(field.get("name"), Some(json!("New")));
    assert_eq!(field.get("success"), None);
    assert!(warnings.try_recv().is_ok());
}

#[tokio::test]
async fn test_destroy_sends_delete() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("DELETE", "/posts/17")
        .with_status(204)
        .create_async()
        .await;

    let store = store_for(&server);
    let post = store
        .create_record(PostModel::new(), "post", props(json!({"id": 17})))
        .unwrap();

    assert_ok!(post.destroy_record().await);

    mock.assert_async().await;
    assert!(post.is_created());
}

#[tokio::test]
async fn test_empty_create_reply_is_no_response() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("POST", "/posts")
        .with_status(200)
        .with_body("")
        .create_async()
        .await;

    let store = store_for(&server);
    let post = store.create_record(PostModel::new(), "post", props(json!({}))).unwrap();

    let err = assert_err!(post.save(Some(props(json!({"raw": "hi"})))).await);

    assert!(matches!(err, RestError::NoResponse { .. }));
    assert!(!post.is_saving());
}

#[tokio::test]
async fn test_empty_update_reply_is_missing_payload() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("PUT", "/posts/17")
        .with_status(200)
        .with_body("")
        .create_async()
        .await;

    let store = store_for(&server);
    let post = store
        .create_record(PostModel::new(), "post", props(json!({"id": 17, "raw": "original"})))
        .unwrap();

    let err = assert_err!(post.save(Some(props(json!({"raw": "edited"})))).await);

    mock.assert_async().await;
    assert!(matches!(err, RestError::MissingPayload { ref kind } if kind == "post"));
    assert_eq!(post.get("raw"), Some(json!("original")));
    assert!(!post.is_saving());
}

#[tokio::test]
async fn test_string_id_is_sent_as_one_segment() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("DELETE", "/tags/c++%2Frust%3Fx=1")
        .with_status(204)
        .create_async()
        .await;

    let store = store_for(&server);
    let tag = store
        .create_record(Arc::new(GenericModel), "tag", props(json!({"id": "c++/rust?x=1"})))
        .unwrap();

    assert_ok!(tag.destroy_record().await);
    mock.assert_async().await;
}

#[tokio::test]
async fn test_error_status_becomes_api_error() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("POST", "/posts")
        .with_status(422)
        .with_header("content-type", "application/json")
        .with_body(r#"{"errors": ["Body is too short"]}"#)
        .create_async()
        .await;

    let store = store_for(&server);
    let post = store.create_record(PostModel::new(), "post", props(json!({}))).unwrap();

    let err = assert_err!(post.save(Some(props(json!({"raw": "x"})))).await);

    match err {
        RestError::ApiError { status, message, response_body, .. } => {
            assert_eq!(status, 422);
            assert_eq!(message, "Body is too short");
            assert!(response_body.unwrap().contains("errors"));
        }
        other => panic!("Expected ApiError, got {:?}", other),
    }
    assert!(post.is_new());
}

#[tokio::test]
async fn test_rate_limit_reads_retry_after() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("PUT", "/posts/1")
        .with_status(429)
        .with_header("retry-after", "3")
        .create_async()
        .await;

    let store = store_for(&server);
    let post = store.create_record(PostModel::new(), "post", props(json!({"id": 1}))).unwrap();

    let err = assert_err!(post.save(Some(props(json!({"raw": "x"})))).await);

    assert!(matches!(
        err,
        RestError::RateLimited { retry_after: Some(d), .. } if d == Duration::from_secs(3)
    ));
}

#[tokio::test]
async fn test_registered_adapter_overrides_default() {
    let server = mockito::Server::new_async().await;
    let store = store_for(&server);
    store.register_adapter("draft", MockAdapter::default());

    let draft = store
        .create_record(Arc::new(GenericModel), "draft", props(json!({})))
        .unwrap();
    assert_ok!(draft.save_new(Some(props(json!({"data": "x"})))).await);
    assert_eq!(draft.id(), Some(json!(1)));

    // The mock adapter does not implement update
    let err = assert_err!(store.update("draft", &json!(1), props(json!({}))).await);
    assert!(matches!(err, RestError::ContractViolation(_)));
}

#[tokio::test]
async fn test_register_services_feeds_direct_construction() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("PUT", "/posts/8")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"post": {"id": 8, "raw": "direct"}}"#)
        .create_async()
        .await;

    let store = Arc::new(
        HttpStore::new(StoreConfig::new(server.url()))
            .unwrap()
            .with_site_settings(SiteSettings::default().with("title", "Forum")),
    );
    let container = Container::new();
    store.register_services(&container);

    let post = RestModel::create_in(
        &container,
        PostModel::new(),
        ModelArgs::new("post").with_property("id", json!(8)),
    )
    .unwrap();
    assert_eq!(post.site_settings().get_str("title"), Some("Forum"));

    assert_ok!(post.save(Some(props(json!({"raw": "direct"})))).await);
    mock.assert_async().await;
}
