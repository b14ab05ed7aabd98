//! Multipart upload and "make public" requests.

use std::fmt;

use reqwest::multipart::{Form, Part};
use serde::Serialize;
use thiserror::Error;
use tracing::info;

use crate::contract::{ServiceContract, render_url};
use crate::redirect;
use crate::remote::{Exchange, RemoteClient};
use crate::session::{Credential, excerpt, now_ms};

const FALLBACK_CONTENT_TYPE: &str = "application/octet-stream";

/// A file the caller wants published.
#[derive(Clone)]
pub struct UploadRequest {
	pub content: Vec<u8>,
	pub filename: String,
	/// Content type declared by the caller; only used when the extension is unknown.
	pub content_type: Option<String>,
}

impl fmt::Debug for UploadRequest {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("UploadRequest")
			.field("filename", &self.filename)
			.field("size", &self.content.len())
			.field("content_type", &self.content_type)
			.finish()
	}
}

/// Identifier the remote service assigned to an uploaded file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedId(String);

impl UploadedId {
	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for UploadedId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

/// Content type for `filename`.
///
/// The extension table decides; a declared type is used only for unknown
/// extensions, then the generic octet stream.
pub fn resolve_content_type(filename: &str, declared: Option<&str>) -> String {
	mime_guess::from_path(filename)
		.first()
		.map(|mime| mime.essence_str().to_string())
		.or_else(|| declared.map(str::trim).filter(|d| !d.is_empty()).map(str::to_string))
		.unwrap_or_else(|| FALLBACK_CONTENT_TYPE.to_string())
}

/// Metadata part sent alongside the file bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadMetadata {
	pub name: String,
	pub size: u64,
	/// Unix milliseconds.
	pub modificationdate: u64,
	pub contenttype: String,
}

impl UploadMetadata {
	pub fn for_request(request: &UploadRequest) -> Self {
		Self {
			name: request.filename.clone(),
			size: request.content.len() as u64,
			modificationdate: now_ms(),
			contenttype: resolve_content_type(&request.filename, request.content_type.as_deref()),
		}
	}

	/// JSON text of the metadata part: `{"data": {...}}`.
	pub fn to_part_json(&self) -> serde_json::Result<String> {
		serde_json::to_string(&serde_json::json!({ "data": self }))
	}
}

/// Failure of one pipeline stage.
#[derive(Debug, Error)]
pub enum StageError {
	#[error("{0}")]
	Transport(#[from] crate::error::Error),

	#[error("HTTP {status}: {excerpt}")]
	Rejected { status: u16, excerpt: String },

	#[error("{field} missing from response: {excerpt}")]
	Missing { field: String, excerpt: String },
}

/// Upload and publish against one session's client.
pub struct UploadPipeline<'a> {
	contract: &'a ServiceContract,
	remote: &'a RemoteClient,
}

impl<'a> UploadPipeline<'a> {
	pub fn new(contract: &'a ServiceContract, remote: &'a RemoteClient) -> Self {
		Self { contract, remote }
	}

	/// Sends the multipart body and returns the id parsed from the response.
	pub async fn upload(&self, credential: &Credential, request: &UploadRequest) -> Result<UploadedId, StageError> {
		let url = render_url(&self.contract.upload_url, &[("validation_key", credential.validation_key())])?;
		let metadata = UploadMetadata::for_request(request);
		let form = Form::new()
			.part(
				"data",
				Part::text(metadata.to_part_json().map_err(crate::error::Error::from)?)
					.mime_str("application/json")
					.map_err(crate::error::Error::from)?,
			)
			.part(
				"file",
				Part::bytes(request.content.clone())
					.file_name(request.filename.clone())
					.mime_str(&metadata.contenttype)
					.map_err(crate::error::Error::from)?,
			);

		let response = self.remote.exchange(Exchange::post(url).multipart(form)).await?;
		if !response.is_success() {
			return Err(StageError::Rejected {
				status: response.status,
				excerpt: excerpt(&response.body),
			});
		}

		let id = response
			.json()
			.and_then(|json| redirect::json_string_at(&json, &self.contract.upload_id_pointer))
			.ok_or_else(|| StageError::Missing {
				field: format!("upload id ({})", self.contract.upload_id_pointer),
				excerpt: excerpt(&response.body),
			})?;
		info!(target: "otpgate.upload", name = %metadata.name, size = metadata.size, content_type = %metadata.contenttype, "uploaded");
		Ok(UploadedId(id))
	}

	/// Marks `id` public and returns the public URL.
	pub async fn publish(&self, credential: &Credential, id: &UploadedId) -> Result<String, StageError> {
		let url = render_url(&self.contract.publish_url, &[("validation_key", credential.validation_key()), ("id", id.as_str())])?;
		let response = self.remote.exchange(Exchange::post(url).json(self.contract.publish_body_for(id.as_str()))).await?;
		if !response.is_success() {
			return Err(StageError::Rejected {
				status: response.status,
				excerpt: excerpt(&response.body),
			});
		}

		let public_url = response
			.json()
			.and_then(|json| redirect::json_string_at(&json, &self.contract.public_url_pointer))
			.ok_or_else(|| StageError::Missing {
				field: format!("public url ({})", self.contract.public_url_pointer),
				excerpt: excerpt(&response.body),
			})?;
		info!(target: "otpgate.upload", id = %id, "published");
		Ok(public_url)
	}
}
