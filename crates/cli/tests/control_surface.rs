use std::io::Write as _;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode, header};
use http_body_util::BodyExt;
use otpgate::browser::FakeBrowser;
use otpgate::{Orchestrator, OrchestratorSettings, ServiceContract};
use otpgate_cli::config::Config;
use otpgate_cli::server::router;
use serde_json::{Value, json};
use tower::ServiceExt;

const BOUNDARY: &str = "otpgate-test-boundary";

fn app(browser: &FakeBrowser) -> (Router, Orchestrator) {
	let settings = OrchestratorSettings {
		acquisition_timeout: Duration::from_millis(200),
		url_poll_interval: Duration::from_millis(10),
		snapshot_interval: Duration::from_millis(50),
		..OrchestratorSettings::default()
	};
	let orchestrator = Orchestrator::new(ServiceContract::default(), settings, Arc::new(browser.clone()));
	(router(orchestrator.clone(), 1024 * 1024), orchestrator)
}

async fn call(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
	let response = app.clone().oneshot(request).await.unwrap();
	let status = response.status();
	let bytes = response.into_body().collect().await.unwrap().to_bytes();
	(status, serde_json::from_slice(&bytes).unwrap())
}

fn json_request(method: Method, uri: &str, body: Value) -> Request<Body> {
	Request::builder()
		.method(method)
		.uri(uri)
		.header(header::CONTENT_TYPE, "application/json")
		.body(Body::from(body.to_string()))
		.unwrap()
}

fn get(uri: &str) -> Request<Body> {
	Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn multipart_request(uri: &str, field: &str, filename: &str, content: &[u8]) -> Request<Body> {
	let mut body = Vec::new();
	write!(
		body,
		"--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"{filename}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
	)
	.unwrap();
	body.extend_from_slice(content);
	write!(body, "\r\n--{BOUNDARY}--\r\n").unwrap();
	Request::builder()
		.method(Method::POST)
		.uri(uri)
		.header(header::CONTENT_TYPE, format!("multipart/form-data; boundary={BOUNDARY}"))
		.body(Body::from(body))
		.unwrap()
}

async fn poll_state(app: &Router, key: &str, want: &str) -> Value {
	for _ in 0..300 {
		let (_, body) = call(app, get(&format!("/attempts/{key}"))).await;
		if body["data"]["state"] == want {
			return body;
		}
		tokio::time::sleep(Duration::from_millis(10)).await;
	}
	panic!("session {key} never reached {want}");
}

#[tokio::test]
async fn health_reports_ok() {
	let (app, _) = app(&FakeBrowser::never_landing());
	let (status, body) = call(&app, get("/health")).await;
	assert_eq!(status, StatusCode::OK);
	assert_eq!(body["ok"], true);
	assert_eq!(body["data"]["status"], "ok");
	assert_eq!(body["data"]["sessions"], 0);
}

#[tokio::test]
async fn unknown_key_status_is_defined() {
	let (app, _) = app(&FakeBrowser::never_landing());
	let (status, body) = call(&app, get("/attempts/nobody-here")).await;
	assert_eq!(status, StatusCode::OK);
	assert_eq!(body["ok"], true);
	assert_eq!(body["data"]["found"], false);
	assert_eq!(body["data"]["state"], "unknown");
}

#[tokio::test]
async fn invalid_phone_is_rejected() {
	let (app, orchestrator) = app(&FakeBrowser::never_landing());
	let (status, body) = call(&app, json_request(Method::POST, "/attempts", json!({ "phone": "12ab" }))).await;
	assert_eq!(status, StatusCode::BAD_REQUEST);
	assert_eq!(body["ok"], false);
	assert_eq!(body["error"]["code"], "INVALID_INPUT");
	assert!(orchestrator.store().is_empty());
}

#[tokio::test]
async fn attempt_times_out_and_reports_failure() {
	let browser = FakeBrowser::never_landing();
	let (app, _) = app(&browser);

	let (status, body) = call(&app, json_request(Method::POST, "/attempts", json!({ "phone": "03001234567", "sessionKey": "web-1" }))).await;
	assert_eq!(status, StatusCode::ACCEPTED);
	assert_eq!(body["data"]["sessionKey"], "web-1");

	let body = poll_state(&app, "web-1", "failed").await;
	assert_eq!(body["data"]["found"], true);
	assert_eq!(body["data"]["error"]["kind"], "ACQUISITION_TIMEOUT");
	assert!(body["data"].get("remoteIdentifier").is_none());
	assert_eq!(browser.open_contexts(), 0);
}

#[tokio::test]
async fn code_in_wrong_state_conflicts() {
	let (app, _) = app(&FakeBrowser::never_landing());
	call(&app, json_request(Method::POST, "/attempts", json!({ "phone": "03001234567", "sessionKey": "early" }))).await;

	let (status, body) = call(&app, json_request(Method::POST, "/attempts/early/code", json!({ "code": "123456" }))).await;
	assert_eq!(status, StatusCode::CONFLICT);
	assert_eq!(body["error"]["code"], "INVALID_STATE");
}

#[tokio::test]
async fn duplicate_key_conflicts() {
	let (app, _) = app(&FakeBrowser::never_landing());
	let start = || json_request(Method::POST, "/attempts", json!({ "phone": "03001234567", "sessionKey": "twice" }));
	let (first, _) = call(&app, start()).await;
	let (second, body) = call(&app, start()).await;
	assert_eq!(first, StatusCode::ACCEPTED);
	assert_eq!(second, StatusCode::CONFLICT);
	assert_eq!(body["error"]["code"], "DUPLICATE_SESSION");
}

#[tokio::test]
async fn code_for_unknown_session_is_not_found() {
	let (app, _) = app(&FakeBrowser::never_landing());
	let (status, body) = call(&app, json_request(Method::POST, "/attempts/ghost/code", json!({ "code": "123456" }))).await;
	assert_eq!(status, StatusCode::NOT_FOUND);
	assert_eq!(body["error"]["code"], "UNKNOWN_SESSION");
}

#[tokio::test]
async fn malformed_code_is_invalid_input() {
	let (app, _) = app(&FakeBrowser::never_landing());
	let (status, body) = call(&app, json_request(Method::POST, "/attempts/ghost/code", json!({ "code": "12" }))).await;
	assert_eq!(status, StatusCode::BAD_REQUEST);
	assert_eq!(body["error"]["code"], "INVALID_INPUT");
}

#[tokio::test]
async fn upload_requires_file_field() {
	let (app, _) = app(&FakeBrowser::never_landing());
	let (status, body) = call(&app, multipart_request("/attempts/ghost/upload", "attachment", "a.txt", b"hello")).await;
	assert_eq!(status, StatusCode::BAD_REQUEST);
	assert_eq!(body["error"]["code"], "INVALID_INPUT");
}

#[tokio::test]
async fn upload_before_authentication_is_refused() {
	let (app, _) = app(&FakeBrowser::never_landing());
	call(&app, json_request(Method::POST, "/attempts", json!({ "phone": "03001234567", "sessionKey": "not-yet" }))).await;
	poll_state(&app, "not-yet", "failed").await;

	let (status, body) = call(&app, multipart_request("/attempts/not-yet/upload", "file", "clip.mp4", b"0123456789")).await;
	assert_eq!(status, StatusCode::CONFLICT);
	assert_eq!(body["error"]["code"], "INVALID_STATE");

	let (status, body) = call(&app, multipart_request("/attempts/missing/upload", "file", "clip.mp4", b"0123456789")).await;
	assert_eq!(status, StatusCode::NOT_FOUND);
	assert_eq!(body["error"]["code"], "UNKNOWN_SESSION");
}

#[tokio::test]
async fn discard_removes_the_record() {
	let (app, _) = app(&FakeBrowser::never_landing());
	call(&app, json_request(Method::POST, "/attempts", json!({ "phone": "03001234567", "sessionKey": "gone" }))).await;

	let (status, body) = call(&app, Request::builder().method(Method::DELETE).uri("/attempts/gone").body(Body::empty()).unwrap()).await;
	assert_eq!(status, StatusCode::OK);
	assert_eq!(body["data"]["discarded"], true);

	let (_, body) = call(&app, get("/attempts/gone")).await;
	assert_eq!(body["data"]["found"], false);

	let (_, body) = call(&app, Request::builder().method(Method::DELETE).uri("/attempts/gone").body(Body::empty()).unwrap()).await;
	assert_eq!(body["data"]["discarded"], false);
}

#[test]
fn config_file_merges_with_defaults() {
	let mut file = tempfile::NamedTempFile::new().unwrap();
	write!(
		file,
		r#"{{
			"server": {{ "port": 9191 }},
			"settings": {{ "acquisition_timeout": 5000 }},
			"contract": {{ "destination_pattern": {{ "kind": "regex", "value": "id=\\w+" }} }}
		}}"#
	)
	.unwrap();

	let config = Config::load(Some(file.path())).unwrap();
	assert_eq!(config.server.port, 9191);
	assert_eq!(config.server.host, "127.0.0.1");
	assert_eq!(config.settings.acquisition_timeout, Duration::from_millis(5000));
	assert_eq!(config.settings.url_poll_interval, Duration::from_millis(250));
	config.validate().unwrap();
}

#[test]
fn unreadable_config_is_an_error() {
	let dir = tempfile::tempdir().unwrap();
	let missing = dir.path().join("absent.json");
	let err = Config::load(Some(&missing)).unwrap_err();
	assert!(format!("{err:#}").contains("absent.json"));
}
