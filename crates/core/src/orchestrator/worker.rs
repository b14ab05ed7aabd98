//! One worker per session key, running the login state machine.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info};
use url::Url;

use super::Shared;
use super::recorder::Recorder;
use crate::browser::{self, AcquisitionRequest, InputAction};
use crate::contract::render_url;
use crate::error::Error;
use crate::redirect::{self, FailureSignal, VerificationObservation};
use crate::remote::{Exchange, ExchangeResponse, RemoteClient};
use crate::session::{Credential, Failure, FailureKind, OtpCode, PhoneNumber, RemoteIdentifier, SessionKey, SessionState, excerpt, now_ms};
use crate::upload::{UploadPipeline, UploadRequest};

/// Work queued for a session's worker.
#[derive(Debug)]
pub(crate) enum Command {
	Start(PhoneNumber),
	Verify(OtpCode),
	Upload(UploadRequest),
}

type Step = Result<(), Failure>;

/// Outcome of one verification submission.
#[derive(Debug)]
enum Verdict {
	Authorized(String),
	Rejected(FailureSignal),
	Unclassified(String),
}

/// Owns everything private to one attempt: the remote client and its cookie
/// jar, the identifier, and the raw credential.
pub(crate) struct SessionWorker {
	key: SessionKey,
	shared: Arc<Shared>,
	recorder: Recorder,
	remote: Option<RemoteClient>,
	identifier: Option<RemoteIdentifier>,
	credential: Option<Credential>,
}

impl SessionWorker {
	pub(crate) fn new(key: SessionKey, shared: Arc<Shared>) -> Self {
		let recorder = Recorder::new(key.clone(), shared.store.clone(), SessionState::Created);
		Self {
			key,
			shared,
			recorder,
			remote: None,
			identifier: None,
			credential: None,
		}
	}

	/// Processes commands one at a time until the session ends or is discarded.
	pub(crate) async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
		while let Some(command) = commands.recv().await {
			let outcome = match command {
				Command::Start(phone) => self.start(phone).await,
				Command::Verify(code) => self.verify(code).await,
				Command::Upload(request) => self.upload(request).await,
			};
			if let Err(failure) = outcome {
				self.recorder.fail(failure);
			}
			self.recorder.finish_step();

			if self.recorder.state().is_terminal() || !self.recorder.is_attached() {
				break;
			}
		}

		self.remote = None;
		self.shared.workers.lock().remove(&self.key);
		debug!(target: "otpgate.session", session = %self.key, state = %self.recorder.state(), "worker finished");
	}

	fn advance(&mut self, next: SessionState, kind: FailureKind) -> Step {
		self.recorder.advance(next).map_err(|e| Failure::new(kind, e.to_string()))
	}

	async fn start(&mut self, phone: PhoneNumber) -> Step {
		use FailureKind::{AcquisitionTimeout, DispatchRejected};

		self.advance(SessionState::AcquiringId, AcquisitionTimeout)?;
		let contract = Arc::clone(&self.shared.contract);
		let settings = Arc::clone(&self.shared.settings);
		let remote = RemoteClient::new(self.key.as_str(), &contract, settings.request_timeout).map_err(|e| Failure::new(AcquisitionTimeout, e.to_string()))?;
		let entry_url = contract.entry_url().map_err(|e| Failure::new(AcquisitionTimeout, e.to_string()))?;

		let request = AcquisitionRequest {
			entry_url: entry_url.clone(),
			pattern: contract.destination_pattern.clone(),
			input: contract.entry_input.as_ref().map(|input| InputAction {
				selector: input.selector.clone(),
				value: phone.as_str().to_string(),
				submit_selector: input.submit_selector.clone(),
			}),
			user_agent: contract.user_agent.clone(),
			timeout: settings.acquisition_timeout,
			poll_interval: settings.url_poll_interval,
			snapshot_interval: settings.snapshot_interval,
			salvage_key: Some(contract.identifier_key.clone()),
		};

		self.recorder.log("waiting for a browser slot");
		let permit = Arc::clone(&self.shared.acquisition_slots)
			.acquire_owned()
			.await
			.map_err(|e| Failure::new(AcquisitionTimeout, e.to_string()))?;
		self.recorder.log("opening entry page");
		let sink = self.recorder.snapshot_sink();
		let outcome = browser::acquire(self.shared.browser.as_ref(), &request, Some(&sink)).await;
		drop(permit);
		self.recorder.clear_snapshot();

		let acquired = outcome.map_err(|e| match e {
			Error::AcquisitionTimeout { .. } => Failure::new(AcquisitionTimeout, e.to_string()),
			other => Failure::new(AcquisitionTimeout, format!("browser failure: {other}")),
		})?;
		let identifier = redirect::extract_identifier(&acquired.matched_url, &contract.identifier_key)
			.filter(|id| !id.is_empty())
			.map(RemoteIdentifier::new)
			.ok_or_else(|| Failure::new(AcquisitionTimeout, format!("no {} in {}", contract.identifier_key, excerpt(&acquired.matched_url))))?;
		if acquired.salvaged {
			self.recorder.log("destination not reached in time, identifier recovered from last page");
		}

		let imported = remote.import_cookies(&acquired.cookies, &entry_url);
		self.recorder
			.set_identifier(&identifier)
			.map_err(|e| Failure::new(AcquisitionTimeout, e.to_string()))?;
		self.advance(SessionState::IdAcquired, AcquisitionTimeout)?;
		self.recorder.log(format!("identifier acquired, {imported} cookies carried over"));

		let dispatch_url = render_url(&contract.dispatch_url, &[("id", identifier.as_str())]).map_err(|e| Failure::new(DispatchRejected, e.to_string()))?;
		let mut fields = vec![(contract.phone_field.clone(), phone.as_str().to_string())];
		fields.extend(contract.extra_dispatch_fields.iter().cloned());

		self.remote = Some(remote);
		self.identifier = Some(identifier);
		let Some(remote) = self.remote.as_ref() else {
			return Err(Failure::new(DispatchRejected, "remote client missing"));
		};

		self.recorder.log(format!("requesting verification code for {}", phone.masked()));
		let response = remote
			.exchange(Exchange::post(dispatch_url).form(fields))
			.await
			.map_err(|e| Failure::new(DispatchRejected, e.to_string()))?;
		if response.status != 200 && !response.is_redirect() {
			return Err(Failure::new(DispatchRejected, format!("HTTP {}: {}", response.status, excerpt(&response.body))));
		}

		self.advance(SessionState::OtpRequested, DispatchRejected)?;
		self.recorder.log("verification code sent");
		Ok(())
	}

	async fn verify(&mut self, code: OtpCode) -> Step {
		use FailureKind::VerificationError;

		if self.recorder.state() == SessionState::RetryOtp {
			self.advance(SessionState::OtpRequested, VerificationError)?;
		}
		self.advance(SessionState::Verifying, VerificationError)?;

		let remote = self.remote.take().ok_or_else(|| Failure::new(VerificationError, "no remote session"))?;
		let outcome = self.verify_with(&remote, &code).await;
		self.remote = Some(remote);
		outcome
	}

	async fn verify_with(&mut self, remote: &RemoteClient, code: &OtpCode) -> Step {
		use FailureKind::VerificationError;

		let contract = Arc::clone(&self.shared.contract);
		let identifier = self.identifier.clone().ok_or_else(|| Failure::new(VerificationError, "no remote identifier"))?;
		let vars = [("id", identifier.as_str())];

		let primary = render_url(&contract.verify_url, &vars).map_err(|e| Failure::new(VerificationError, e.to_string()))?;
		self.recorder.log("submitting verification code");
		let mut verdict = self.submit_code(remote, &primary, code).await;

		if !matches!(verdict, Verdict::Authorized(_)) {
			if let Some(template) = &contract.fallback_verify_url {
				let fallback = render_url(template, &vars).map_err(|e| Failure::new(VerificationError, e.to_string()))?;
				self.recorder.log("no authorization from primary route, trying fallback");
				verdict = match (verdict, self.submit_code(remote, &fallback, code).await) {
					(_, authorized @ Verdict::Authorized(_)) => authorized,
					(rejected @ Verdict::Rejected(_), _) => rejected,
					(_, second) => second,
				};
			}
		}

		match verdict {
			Verdict::Authorized(authorization_code) => {
				self.advance(SessionState::Authenticating, VerificationError)?;
				self.recorder.log("code accepted, exchanging authorization code");
				self.exchange_token(remote, &authorization_code).await
			}
			Verdict::Rejected(signal) => {
				self.advance(SessionState::RetryOtp, VerificationError)?;
				self.recorder.log(format!("code rejected ({signal}), submit the code again"));
				Ok(())
			}
			Verdict::Unclassified(detail) => Err(Failure::new(VerificationError, detail)),
		}
	}

	/// Posts the code to `endpoint` and interprets the response.
	async fn submit_code(&self, remote: &RemoteClient, endpoint: &Url, code: &OtpCode) -> Verdict {
		let contract = Arc::clone(&self.shared.contract);
		let code_key = contract.authorization_code_key.as_str();
		let fields = vec![(contract.code_field.clone(), code.as_str().to_string())];

		let response = match remote.exchange(Exchange::post(endpoint.clone()).form(fields)).await {
			Ok(response) => response,
			Err(e) => return Verdict::Unclassified(e.to_string()),
		};
		if let Some(found) = authorization_code_in(&response, code_key) {
			return Verdict::Authorized(found);
		}

		let submitted_status = response.status;
		let mut observed = response;
		let forward = observed.location.as_ref().filter(|next| observed.is_redirect() && !redirect::same_endpoint(next, endpoint)).cloned();
		if let Some(next) = forward {
			match remote.exchange(Exchange::get(next).follow_redirect()).await {
				Ok(followed) => {
					if let Some(found) = authorization_code_in(&followed, code_key) {
						return Verdict::Authorized(found);
					}
					observed = followed;
				}
				Err(e) => return Verdict::Unclassified(e.to_string()),
			}
		}

		if observed.status >= 500 {
			return Verdict::Unclassified(format!("HTTP {}: {}", observed.status, excerpt(&observed.body)));
		}

		let observation = VerificationObservation {
			endpoint,
			status: submitted_status,
			destination: Some(observed.destination()),
			body: &observed.body,
		};
		let signal = redirect::classify_failure_signal(&observation, contract.failure_policy, &contract.failure_keywords);
		info!(
			target: "otpgate.session",
			session = %self.key,
			submitted_status,
			status = observed.status,
			destination = %observed.destination().path(),
			policy = ?contract.failure_policy,
			signal = ?signal,
			body = %excerpt(&observed.body),
			"verification response classified"
		);

		match signal {
			Some(signal) => Verdict::Rejected(signal),
			None => Verdict::Unclassified(format!("HTTP {} without authorization code: {}", observed.status, excerpt(&observed.body))),
		}
	}

	async fn exchange_token(&mut self, remote: &RemoteClient, authorization_code: &str) -> Step {
		use FailureKind::TokenExchangeError;

		let contract = Arc::clone(&self.shared.contract);
		let identifier = self.identifier.as_ref().map(RemoteIdentifier::as_str).unwrap_or_default().to_string();
		let token_url = render_url(&contract.token_url, &[("code", authorization_code), ("id", identifier.as_str())])
			.map_err(|e| Failure::new(TokenExchangeError, e.to_string()))?;

		let exchange = match &contract.token_code_field {
			Some(field) => Exchange::post(token_url.clone()).form(vec![(field.clone(), authorization_code.to_string())]),
			None => Exchange::get(token_url.clone()),
		};
		let response = remote
			.exchange(exchange.follow_redirect())
			.await
			.map_err(|e| Failure::new(TokenExchangeError, e.to_string()))?;
		if !response.is_success() && !response.is_redirect() {
			return Err(Failure::new(TokenExchangeError, format!("HTTP {}: {}", response.status, excerpt(&response.body))));
		}

		let json = response.json();
		let urls = response.location.iter().chain(std::iter::once(&response.final_url)).map(Url::as_str);
		let validation_key = redirect::extract_validation_key(json.as_ref(), &contract.validation_key_pointer, urls, &contract.validation_key_param)
			.ok_or_else(|| Failure::new(TokenExchangeError, format!("validation key missing from token response: {}", excerpt(&response.body))))?;

		let session_cookie = match &contract.session_cookie {
			Some(name) => {
				let value = remote
					.cookie_value(&response.final_url, name)
					.or_else(|| remote.cookie_value(&token_url, name))
					.ok_or_else(|| Failure::new(TokenExchangeError, format!("session cookie {name} not set by token exchange")))?;
				Some((name.clone(), value))
			}
			None => None,
		};

		if self.credential.is_some() {
			return Err(Failure::new(TokenExchangeError, "credential already set"));
		}
		let credential = Credential::new(validation_key, session_cookie, now_ms());
		self.recorder
			.set_credential(credential.summary())
			.map_err(|e| Failure::new(TokenExchangeError, e.to_string()))?;
		self.credential = Some(credential);
		self.advance(SessionState::Authenticated, TokenExchangeError)?;
		self.recorder.log("authenticated, ready for upload");
		Ok(())
	}

	async fn upload(&mut self, request: UploadRequest) -> Step {
		use FailureKind::{PublishError, UploadError};

		self.advance(SessionState::Uploading, UploadError)?;
		let contract = Arc::clone(&self.shared.contract);
		let remote = self.remote.as_ref().ok_or_else(|| Failure::new(UploadError, "no remote session"))?;
		let credential = self.credential.as_ref().ok_or_else(|| Failure::new(UploadError, "no credential"))?;
		let pipeline = UploadPipeline::new(&contract, remote);

		let size = request.content.len();
		let uploaded = pipeline.upload(credential, &request).await.map_err(|e| Failure::new(UploadError, e.to_string()))?;
		self.recorder.log(format!("uploaded {} ({size} bytes) as {uploaded}", request.filename));
		let public_url = pipeline.publish(credential, &uploaded).await.map_err(|e| Failure::new(PublishError, e.to_string()))?;

		self.recorder
			.set_public_url(&public_url)
			.map_err(|e| Failure::new(PublishError, e.to_string()))?;
		self.advance(SessionState::Published, PublishError)?;
		self.recorder.log(format!("published at {public_url}"));
		Ok(())
	}
}

fn authorization_code_in(response: &ExchangeResponse, key: &str) -> Option<String> {
	response
		.location
		.iter()
		.chain(std::iter::once(&response.final_url))
		.find_map(|url| redirect::extract_authorization_code(url.as_str(), key))
		.filter(|code| !code.is_empty())
}
