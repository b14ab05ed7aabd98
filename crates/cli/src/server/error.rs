use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use otpgate_protocol::{Envelope, ErrorCode};
use tracing::{debug, error};

/// A rejected control-surface call.
#[derive(Debug)]
pub struct ApiError {
	pub status: StatusCode,
	pub code: ErrorCode,
	pub message: String,
}

impl ApiError {
	pub fn invalid_input(message: impl Into<String>) -> Self {
		Self {
			status: StatusCode::BAD_REQUEST,
			code: ErrorCode::InvalidInput,
			message: message.into(),
		}
	}
}

impl From<otpgate::Error> for ApiError {
	fn from(err: otpgate::Error) -> Self {
		use otpgate::Error as E;

		let (status, code) = match &err {
			E::UnknownSession(_) => (StatusCode::NOT_FOUND, ErrorCode::UnknownSession),
			E::DuplicateSession(_) => (StatusCode::CONFLICT, ErrorCode::DuplicateSession),
			E::InvalidState { .. } => (StatusCode::CONFLICT, ErrorCode::InvalidState),
			E::InvalidPhone(_) | E::InvalidCode | E::InvalidSessionKey(_) => (StatusCode::BAD_REQUEST, ErrorCode::InvalidInput),
			_ => (StatusCode::INTERNAL_SERVER_ERROR, ErrorCode::InternalError),
		};
		Self {
			status,
			code,
			message: err.to_string(),
		}
	}
}

impl IntoResponse for ApiError {
	fn into_response(self) -> Response {
		if self.status.is_server_error() {
			error!(target: "otpgate.http", code = %self.code, message = %self.message, "request failed");
		} else {
			debug!(target: "otpgate.http", code = %self.code, message = %self.message, "request rejected");
		}
		(self.status, Json(Envelope::<()>::failure(self.code, self.message))).into_response()
	}
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn core_errors_map_to_status_codes() {
		let cases = [
			(otpgate::Error::UnknownSession("k".into()), StatusCode::NOT_FOUND, ErrorCode::UnknownSession),
			(otpgate::Error::InvalidCode, StatusCode::BAD_REQUEST, ErrorCode::InvalidInput),
			(otpgate::Error::Template("{x}".into()), StatusCode::INTERNAL_SERVER_ERROR, ErrorCode::InternalError),
		];
		for (err, status, code) in cases {
			let api = ApiError::from(err);
			assert_eq!(api.status, status);
			assert_eq!(api.code, code);
		}
	}
}
