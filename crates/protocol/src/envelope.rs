use serde::{Deserialize, Serialize};

use crate::types::ErrorCode;

/// The result envelope returned by every control-surface call.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope<T> {
	pub ok: bool,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub data: Option<T>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub error: Option<EnvelopeError>,
}

/// Error information for rejected calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvelopeError {
	pub code: ErrorCode,
	pub message: String,
}

impl<T> Envelope<T> {
	pub fn success(data: T) -> Self {
		Self {
			ok: true,
			data: Some(data),
			error: None,
		}
	}

	pub fn failure(code: ErrorCode, message: impl Into<String>) -> Self {
		Self {
			ok: false,
			data: None,
			error: Some(EnvelopeError {
				code,
				message: message.into(),
			}),
		}
	}
}
