//! HTTP remote client and probe against a mock server

use fieldsync::client::offline::{ErrorCode, FailureClassifier};
use fieldsync::client::remote::{Filter, HttpRemote, RemoteService};
use fieldsync::client::sync::{ConnectivityMonitor, HttpProbe, ReachabilityProbe};
use fieldsync::client::Config;
use fieldsync::shared::{AppConfig, Document, RemoteError};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{body_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn remote_for(server: &MockServer) -> HttpRemote {
    let config = Config::with_builder(AppConfig::builder().remote_url(server.uri())).unwrap();
    HttpRemote::new(config)
}

#[tokio::test]
async fn test_create_puts_document_by_id() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/collections/agencies/documents/a1"))
        .and(body_json(json!({"id": "a1", "name": "North"})))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let payload = json!({"id": "a1", "name": "North"}).as_object().cloned().unwrap();
    remote_for(&server).create("agencies", "a1", &payload).await.unwrap();
}

#[tokio::test]
async fn test_error_body_is_structured() {
    let server = MockServer::start().await;
    Mock::given(method("PATCH"))
        .and(path("/collections/agencies/documents/a1"))
        .respond_with(
            ResponseTemplate::new(403).set_body_json(json!({"code": "permission-denied", "message": "not yours"})),
        )
        .mount(&server)
        .await;

    let payload = json!({"id": "a1"}).as_object().cloned().unwrap();
    let error = remote_for(&server).update("agencies", "a1", &payload).await.unwrap_err();

    assert_eq!(error.code.as_deref(), Some("permission-denied"));
    assert_eq!(error.status, Some(403));
    assert_eq!(error.message, "not yours");
    assert_eq!(FailureClassifier::new().classify_remote(&error), ErrorCode::Permission);
}

#[tokio::test]
async fn test_plain_server_error_uses_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/collections/agencies/documents"))
        .respond_with(ResponseTemplate::new(502).set_body_string("upstream down"))
        .mount(&server)
        .await;

    let error = remote_for(&server).query("agencies", &[]).await.unwrap_err();
    assert_eq!(error.status, Some(502));
    assert_eq!(FailureClassifier::new().classify_remote(&error), ErrorCode::Server);
}

#[tokio::test]
async fn test_delete_of_missing_document_succeeds() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/collections/agencies/documents/gone"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    remote_for(&server).delete("agencies", "gone").await.unwrap();
}

#[tokio::test]
async fn test_query_sends_filters() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/collections/agencies/documents"))
        .and(query_param("name", "North"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"id": "n1", "name": "North"}])))
        .mount(&server)
        .await;

    let documents = remote_for(&server)
        .query("agencies", &[Filter::eq("name", "North")])
        .await
        .unwrap();
    assert_eq!(documents.len(), 1);
    assert_eq!(documents[0]["id"], "n1");
}

#[tokio::test]
async fn test_subscription_polls_for_changes() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/collections/agencies/documents"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"id": "a", "name": "Alpha"}])))
        .mount(&server)
        .await;

    let remote = remote_for(&server).with_poll_interval(Duration::from_millis(20));
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let subscription = remote.subscribe(
        "agencies",
        Vec::new(),
        Box::new(move |documents: Vec<Document>| {
            let _ = tx.send(documents.len());
        }),
        Box::new(|_: RemoteError| {}),
    );

    let first = tokio::time::timeout(Duration::from_secs(2), rx.recv()).await.unwrap();
    assert_eq!(first, Some(1));

    // Unchanged result sets are not re-emitted
    assert!(tokio::time::timeout(Duration::from_millis(150), rx.recv()).await.is_err());
    subscription.unsubscribe();
}

#[tokio::test]
async fn test_http_probe_reports_reachability() {
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;

    let probe = HttpProbe::new(server.uri(), Duration::from_secs(1));
    assert!(probe.probe().await.is_ok());

    let monitor = ConnectivityMonitor::new(Arc::new(probe), Duration::from_secs(1), Duration::from_millis(1500));
    assert!(monitor.check_connection().await);
    assert!(!monitor.is_slow_connection());
}

#[tokio::test]
async fn test_http_probe_unreachable() {
    let probe = HttpProbe::new("http://127.0.0.1:9", Duration::from_millis(300));
    let monitor = ConnectivityMonitor::new(Arc::new(probe), Duration::from_millis(500), Duration::from_millis(1500));
    assert!(!monitor.check_connection().await);
}
