use axum::Json;
use axum::extract::{Multipart, Path, State};
use axum::http::StatusCode;
use otpgate::{OtpCode, PhoneNumber, SessionKey, UploadRequest};
use otpgate_protocol::{Ack, DiscardResponse, Envelope, StartAttemptRequest, StartAttemptResponse, StatusResponse, SubmitCodeRequest};
use serde_json::{Value, json};
use tracing::info;

use super::AppState;
use super::error::{ApiError, ApiResult};

type Reply<T> = (StatusCode, Json<Envelope<T>>);

fn accepted<T>(data: T) -> Reply<T> {
	(StatusCode::ACCEPTED, Json(Envelope::success(data)))
}

fn ok<T>(data: T) -> Reply<T> {
	(StatusCode::OK, Json(Envelope::success(data)))
}

fn ack(state: &AppState, key: &SessionKey) -> Ack {
	Ack {
		session_key: key.to_string(),
		accepted: true,
		state: state.orchestrator.status(key.as_str()).state,
	}
}

pub async fn health(State(state): State<AppState>) -> Reply<Value> {
	ok(json!({
		"status": "ok",
		"sessions": state.orchestrator.store().len(),
		"workers": state.orchestrator.active_workers(),
	}))
}

pub async fn start_attempt(State(state): State<AppState>, Json(body): Json<StartAttemptRequest>) -> ApiResult<Reply<StartAttemptResponse>> {
	let phone: PhoneNumber = body.phone.parse()?;
	let key = body.session_key.map(|key| key.parse::<SessionKey>()).transpose()?;
	info!(target: "otpgate.http", phone = %phone.masked(), "start attempt");

	let key = state.orchestrator.start_attempt(phone, key)?;
	let status = state.orchestrator.status(key.as_str());
	Ok(accepted(StartAttemptResponse {
		session_key: key.to_string(),
		state: status.state,
	}))
}

pub async fn submit_code(
	State(state): State<AppState>,
	Path(key): Path<String>,
	Json(body): Json<SubmitCodeRequest>,
) -> ApiResult<Reply<Ack>> {
	let key: SessionKey = key.parse()?;
	let code: OtpCode = body.code.parse()?;
	state.orchestrator.submit_code(&key, code)?;
	Ok(accepted(ack(&state, &key)))
}

pub async fn status(State(state): State<AppState>, Path(key): Path<String>) -> Reply<StatusResponse> {
	ok(state.orchestrator.status(&key))
}

pub async fn submit_upload(State(state): State<AppState>, Path(key): Path<String>, mut multipart: Multipart) -> ApiResult<Reply<Ack>> {
	let key: SessionKey = key.parse()?;

	let mut request = None;
	while let Some(field) = multipart.next_field().await.map_err(|e| ApiError::invalid_input(e.body_text()))? {
		if field.name() != Some("file") {
			continue;
		}
		let filename = field.file_name().unwrap_or("upload.bin").to_string();
		let content_type = field.content_type().map(str::to_owned);
		let content = field.bytes().await.map_err(|e| ApiError::invalid_input(e.body_text()))?;
		request = Some(UploadRequest {
			content: content.to_vec(),
			filename,
			content_type,
		});
	}
	let request = request.ok_or_else(|| ApiError::invalid_input("multipart field `file` is required"))?;
	if request.content.is_empty() {
		return Err(ApiError::invalid_input("uploaded file is empty"));
	}

	info!(target: "otpgate.http", session = %key, file = %request.filename, size = request.content.len(), "upload received");
	state.orchestrator.submit_upload(&key, request)?;
	Ok(accepted(ack(&state, &key)))
}

pub async fn discard(State(state): State<AppState>, Path(key): Path<String>) -> ApiResult<Reply<DiscardResponse>> {
	let key: SessionKey = key.parse()?;
	let discarded = state.orchestrator.discard(&key);
	Ok(ok(DiscardResponse {
		session_key: key.to_string(),
		discarded,
	}))
}
