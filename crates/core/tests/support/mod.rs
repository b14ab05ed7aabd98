//! In-process fake of the remote service plus helpers shared by the flow tests.
//!
//! Every session-scoped request checks that the cookies it carries belong to
//! the identifier it addresses; a mismatch is counted and answered with 400,
//! so cookie cross-contamination between sessions shows up in assertions.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use axum::extract::{DefaultBodyLimit, Multipart, Query, State};
use axum::http::header::{COOKIE, LOCATION, SET_COOKIE, USER_AGENT};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use otpgate::browser::FakeBrowser;
use otpgate::{Orchestrator, OrchestratorSettings, ServiceContract, SessionKey, SessionRecord, UrlPattern};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::time::{Instant, sleep};

pub const PHONE: &str = "03001234567";
pub const BLOCKED_PHONE: &str = "03009999999";
pub const CORRECT_CODE: &str = "123456";

/// What the fake saw in one upload request.
#[derive(Debug, Clone)]
pub struct SeenUpload {
	pub metadata: Value,
	pub file_len: usize,
	pub file_name: Option<String>,
	pub file_content_type: Option<String>,
}

#[derive(Debug, Default)]
pub struct FakeRemote {
	pub omit_validation_key: AtomicBool,
	pub verify_explodes: AtomicBool,
	pub upload_omits_id: AtomicBool,
	pub publish_explodes: AtomicBool,
	pub mismatches: AtomicUsize,
	pub dispatched: Mutex<Vec<String>>,
	pub uploads: Mutex<Vec<SeenUpload>>,
}

impl FakeRemote {
	pub fn mismatches(&self) -> usize {
		self.mismatches.load(Ordering::SeqCst)
	}

	fn mismatch(&self, what: &str) -> Response {
		self.mismatches.fetch_add(1, Ordering::SeqCst);
		(StatusCode::BAD_REQUEST, format!("cookie mismatch: {what}")).into_response()
	}
}

/// A running fake service.
pub struct Harness {
	pub base: String,
	pub remote: Arc<FakeRemote>,
}

impl Harness {
	pub async fn start() -> Self {
		init_tracing();
		let remote = Arc::new(FakeRemote::default());
		let app = Router::new()
			.route("/oauth2/signup.php", post(dispatch))
			.route("/verify.php", post(verify))
			.route("/reject.php", post(reject))
			.route("/forward.php", post(forward))
			.route("/welcome", get(welcome))
			.route("/sapi/login/oauth", get(token))
			.route("/sapi/upload/file", post(upload))
			.route("/sapi/link", post(publish))
			.layer(DefaultBodyLimit::max(64 * 1024 * 1024))
			.with_state(Arc::clone(&remote));

		let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
		let addr = listener.local_addr().unwrap();
		tokio::spawn(async move {
			axum::serve(listener, app).await.unwrap();
		});

		Self {
			base: format!("http://{addr}"),
			remote,
		}
	}

	pub fn contract(&self) -> ServiceContract {
		let base = &self.base;
		ServiceContract {
			entry_url: format!("{base}/start"),
			destination_pattern: UrlPattern::Contains("id=".into()),
			dispatch_url: format!("{base}/oauth2/signup.php?id={{id}}"),
			verify_url: format!("{base}/verify.php?id={{id}}"),
			fallback_verify_url: None,
			token_url: format!("{base}/sapi/login/oauth?action=login&platform=web&keyticket={{code}}"),
			upload_url: format!("{base}/sapi/upload/file?action=save&validationkey={{validation_key}}"),
			publish_url: format!("{base}/sapi/link?action=save&validationkey={{validation_key}}"),
			origin: Some(base.clone()),
			referer: Some(base.clone()),
			..ServiceContract::default()
		}
	}

	/// Browser that lands on the dispatch page with identifier `ID{n}`.
	pub fn browser(&self) -> FakeBrowser {
		FakeBrowser::landing_on(format!("{}/oauth2/signup.php?id=ID{{n}}", self.base)).with_cookie("sid", "S{n}")
	}
}

pub fn settings() -> OrchestratorSettings {
	OrchestratorSettings {
		acquisition_timeout: Duration::from_secs(2),
		url_poll_interval: Duration::from_millis(10),
		snapshot_interval: Duration::from_millis(20),
		request_timeout: Duration::from_secs(10),
		..OrchestratorSettings::default()
	}
}

pub fn orchestrator(contract: ServiceContract, settings: OrchestratorSettings, browser: &FakeBrowser) -> Orchestrator {
	Orchestrator::new(contract, settings, Arc::new(browser.clone()))
}

/// Polls until `done` holds for the record, panicking after ten seconds.
pub async fn wait_for(orchestrator: &Orchestrator, key: &SessionKey, done: impl Fn(&SessionRecord) -> bool) -> Arc<SessionRecord> {
	let deadline = Instant::now() + Duration::from_secs(10);
	loop {
		if let Some(record) = orchestrator.record(key) {
			if done(&*record) {
				return record;
			}
		}
		assert!(Instant::now() < deadline, "timed out waiting; last status: {:?}", orchestrator.status(key.as_str()));
		sleep(Duration::from_millis(10)).await;
	}
}

/// Waits until the session sits idle in `state`.
pub async fn settled(orchestrator: &Orchestrator, key: &SessionKey, state: otpgate::SessionState) -> Arc<SessionRecord> {
	wait_for(orchestrator, key, |record| record.state == state && !record.in_flight).await
}

fn init_tracing() {
	let _ = tracing_subscriber::fmt().with_max_level(tracing::Level::DEBUG).with_test_writer().try_init();
}

fn cookies(headers: &HeaderMap) -> HashMap<String, String> {
	headers
		.get_all(COOKIE)
		.iter()
		.filter_map(|value| value.to_str().ok())
		.flat_map(|value| value.split(';'))
		.filter_map(|pair| pair.trim().split_once('='))
		.map(|(name, value)| (name.to_string(), value.to_string()))
		.collect()
}

/// `ID7` -> `7`.
fn index_of(id: &str) -> &str {
	id.strip_prefix("ID").unwrap_or(id)
}

async fn dispatch(
	State(remote): State<Arc<FakeRemote>>,
	Query(query): Query<HashMap<String, String>>,
	headers: HeaderMap,
	Form(form): Form<HashMap<String, String>>,
) -> Response {
	let id = query.get("id").cloned().unwrap_or_default();
	let jar = cookies(&headers);
	if jar.get("sid").map(String::as_str) != Some(format!("S{}", index_of(&id)).as_str()) {
		return remote.mismatch("sid on dispatch");
	}
	if !headers.get(USER_AGENT).and_then(|ua| ua.to_str().ok()).is_some_and(|ua| ua.contains("Mozilla")) {
		return (StatusCode::BAD_REQUEST, "missing browser user agent").into_response();
	}
	if form.get("msisdn").map(String::as_str) == Some(BLOCKED_PHONE) {
		return (StatusCode::FORBIDDEN, "number blocked").into_response();
	}
	remote.dispatched.lock().push(id.clone());
	(
		StatusCode::FOUND,
		[(LOCATION, format!("/verify.php?id={id}")), (SET_COOKIE, format!("trail={id}; Path=/"))],
	)
		.into_response()
}

async fn verify(
	State(remote): State<Arc<FakeRemote>>,
	Query(query): Query<HashMap<String, String>>,
	headers: HeaderMap,
	Form(form): Form<HashMap<String, String>>,
) -> Response {
	let id = query.get("id").cloned().unwrap_or_default();
	let jar = cookies(&headers);
	if jar.get("trail") != Some(&id) || jar.get("sid").map(String::as_str) != Some(format!("S{}", index_of(&id)).as_str()) {
		return remote.mismatch("trail on verify");
	}
	if remote.verify_explodes.load(Ordering::SeqCst) {
		return (StatusCode::INTERNAL_SERVER_ERROR, "upstream exploded").into_response();
	}
	let location = if form.get("otp").map(String::as_str) == Some(CORRECT_CODE) {
		format!("/callback?code=AUTH-{id}")
	} else {
		format!("/verify.php?id={id}&error=invalid")
	};
	(StatusCode::FOUND, [(LOCATION, location)]).into_response()
}

async fn reject() -> Response {
	(StatusCode::OK, "Invalid code, please try again").into_response()
}

/// Redirects forward without ever handing out an authorization code.
async fn forward() -> Response {
	(StatusCode::FOUND, [(LOCATION, "/welcome")]).into_response()
}

async fn welcome() -> Response {
	(StatusCode::OK, "welcome back").into_response()
}

async fn token(State(remote): State<Arc<FakeRemote>>, Query(query): Query<HashMap<String, String>>, headers: HeaderMap) -> Response {
	let ticket = query.get("keyticket").cloned().unwrap_or_default();
	let Some(id) = ticket.strip_prefix("AUTH-") else {
		return (StatusCode::UNAUTHORIZED, "bad ticket").into_response();
	};
	if cookies(&headers).get("trail").map(String::as_str) != Some(id) {
		return remote.mismatch("trail on token");
	}
	let cookie = format!("JSESSIONID=js-{id}; Path=/; HttpOnly");
	let body = if remote.omit_validation_key.load(Ordering::SeqCst) {
		json!({ "data": {} })
	} else {
		json!({ "data": { "validationkey": format!("VK-{id}") } })
	};
	([(SET_COOKIE, cookie)], Json(body)).into_response()
}

async fn upload(
	State(remote): State<Arc<FakeRemote>>,
	Query(query): Query<HashMap<String, String>>,
	headers: HeaderMap,
	mut multipart: Multipart,
) -> Response {
	let key = query.get("validationkey").cloned().unwrap_or_default();
	let id = key.strip_prefix("VK-").unwrap_or_default().to_string();
	if cookies(&headers).get("JSESSIONID") != Some(&format!("js-{id}")) {
		return remote.mismatch("JSESSIONID on upload");
	}

	let mut metadata = Value::Null;
	let mut seen = SeenUpload {
		metadata: Value::Null,
		file_len: 0,
		file_name: None,
		file_content_type: None,
	};
	while let Ok(Some(field)) = multipart.next_field().await {
		let name = field.name().map(str::to_owned);
		match name.as_deref() {
			Some("data") => {
				let text = field.text().await.unwrap();
				metadata = serde_json::from_str(&text).unwrap();
			}
			Some("file") => {
				seen.file_name = field.file_name().map(str::to_owned);
				seen.file_content_type = field.content_type().map(str::to_owned);
				seen.file_len = field.bytes().await.unwrap().len();
			}
			_ => {}
		}
	}
	seen.metadata = metadata;
	remote.uploads.lock().push(seen);
	if remote.upload_omits_id.load(Ordering::SeqCst) {
		return Json(json!({ "success": "ok" })).into_response();
	}
	Json(json!({ "success": "ok", "id": format!("F-{id}") })).into_response()
}

async fn publish(State(remote): State<Arc<FakeRemote>>, Query(query): Query<HashMap<String, String>>, Json(body): Json<Value>) -> Response {
	if remote.publish_explodes.load(Ordering::SeqCst) {
		return (StatusCode::INTERNAL_SERVER_ERROR, "publish backend down").into_response();
	}
	if query.get("validationkey").is_none() {
		return (StatusCode::UNAUTHORIZED, "no key").into_response();
	}
	match body.pointer("/data/items/0/id").and_then(Value::as_str) {
		Some(file) => Json(json!({ "data": { "url": format!("https://share.test/{file}") } })).into_response(),
		None => (StatusCode::BAD_REQUEST, "no item").into_response(),
	}
}
