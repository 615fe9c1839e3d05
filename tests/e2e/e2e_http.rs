use std::collections::HashMap;

use axum::Router;
use axum::body::Bytes;
use axum::extract::Path;
use axum::http::{HeaderMap, StatusCode, header::CONTENT_TYPE};
use axum::routing::{get, put};
use restapi_client::{Client, Payload, RestErrorKind};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;

const TOKEN_HEADER: &str = "X-Auth-Token";
const TOKEN: &str = "abc123";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Device {
    name: String,
    enabled: bool,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    error: String,
}

#[derive(Debug, Deserialize)]
struct Deleted {
    deleted: u32,
}

#[tokio::test]
async fn e2e_get_carries_custom_token_header() {
    let server = TestServer::start().await;
    let client = Client::new(&server.url("/v1"), [(TOKEN_HEADER, TOKEN)]).expect("client");

    let response = client.get("devices").await.expect("get should reach the server");
    assert_eq!(response.status(), 200);

    let devices: Vec<Device> = response.decode().await.expect("device list should decode");
    assert_eq!(
        devices,
        vec![Device {
            name: "dev1".to_string(),
            enabled: true,
        }]
    );
}

#[tokio::test]
async fn e2e_missing_token_is_rejected_by_server() {
    let server = TestServer::start().await;
    let client = Client::new(&server.url("/v1/"), HashMap::<String, String>::new()).expect("client");

    let response = client.get("/devices").await.expect("401 is still a response");
    assert_eq!(response.status(), 401);

    let body: ApiError = response.decode().await.expect("error body should decode");
    assert_eq!(body.error, "missing or wrong token");
}

#[tokio::test]
async fn e2e_post_and_put_round_trip_json() {
    let server = TestServer::start().await;
    let client = Client::new(&server.url("/v1"), [(TOKEN_HEADER, TOKEN)]).expect("client");
    let device = Device {
        name: "dev1".to_string(),
        enabled: false,
    };

    let response = client
        .post("devices", Payload::value(&device))
        .await
        .expect("post should reach the server");
    assert_eq!(response.status(), 201);
    let created: Device = response.decode().await.expect("created device should decode");
    assert_eq!(created, device);

    let response = client
        .put("devices/7", Payload::encoded(r#"{"name":"dev7","enabled":true}"#))
        .await
        .expect("put should reach the server");
    assert_eq!(response.status(), 200);
    let replaced: Device = response.decode().await.expect("replaced device should decode");
    assert_eq!(replaced.name, "dev7");
    assert!(replaced.enabled);
}

#[tokio::test]
async fn e2e_delete_hits_nested_path() {
    let server = TestServer::start().await;
    let client = Client::new(&server.url("/v1"), [(TOKEN_HEADER, TOKEN)]).expect("client");

    let deleted: Deleted = client
        .delete("devices/42")
        .await
        .expect("delete should reach the server")
        .decode()
        .await
        .expect("delete body should decode");
    assert_eq!(deleted.deleted, 42);
}

#[tokio::test]
async fn e2e_connection_refused_is_a_transport_error() {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind test listener");
    let addr = listener.local_addr().expect("local addr");
    drop(listener);

    let client = Client::new(&format!("http://{addr}/v1"), [(TOKEN_HEADER, TOKEN)]).expect("client");
    let err = client
        .get("devices")
        .await
        .expect_err("closed port should fail to connect");
    assert_eq!(err.kind(), RestErrorKind::Transport);
}

struct TestServer {
    base_url: String,
    task: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn start() -> Self {
        let app = Router::new()
            .route("/v1/devices", get(list_devices).post(create_device))
            .route("/v1/devices/{id}", put(replace_device).delete(delete_device));

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind test listener");
        let addr = listener.local_addr().expect("local addr");
        let base_url = format!("http://{}", addr);

        let task = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Self { base_url, task }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn authorized(headers: &HeaderMap) -> bool {
    headers
        .get(TOKEN_HEADER)
        .is_some_and(|value| value == TOKEN)
}

fn is_json(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_TYPE)
        .is_some_and(|value| value == "application/json")
}

fn unauthorized() -> (StatusCode, Bytes) {
    (
        StatusCode::UNAUTHORIZED,
        Bytes::from_static(br#"{"error":"missing or wrong token"}"#),
    )
}

async fn list_devices(headers: HeaderMap) -> (StatusCode, Bytes) {
    if !authorized(&headers) {
        return unauthorized();
    }
    (
        StatusCode::OK,
        Bytes::from_static(br#"[{"name":"dev1","enabled":true}]"#),
    )
}

async fn create_device(headers: HeaderMap, body: Bytes) -> (StatusCode, Bytes) {
    if !authorized(&headers) {
        return unauthorized();
    }
    if !is_json(&headers) {
        return (StatusCode::UNSUPPORTED_MEDIA_TYPE, Bytes::new());
    }
    (StatusCode::CREATED, body)
}

async fn replace_device(headers: HeaderMap, Path(_id): Path<u32>, body: Bytes) -> (StatusCode, Bytes) {
    if !authorized(&headers) {
        return unauthorized();
    }
    if !is_json(&headers) {
        return (StatusCode::UNSUPPORTED_MEDIA_TYPE, Bytes::new());
    }
    (StatusCode::OK, body)
}

async fn delete_device(headers: HeaderMap, Path(id): Path<u32>) -> (StatusCode, Bytes) {
    if !authorized(&headers) {
        return unauthorized();
    }
    (StatusCode::OK, Bytes::from(format!(r#"{{"deleted":{id}}}"#)))
}
