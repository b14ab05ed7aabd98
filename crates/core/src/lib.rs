//! Resumable phone-verification login orchestrator.
//!
//! Drives a redirect-based OTP login against a remote service: a browser
//! acquires the per-attempt identifier, the rest of the handshake is replayed
//! as direct HTTP exchanges on a per-session cookie jar, and the resulting
//! credential is used to upload and publish a file.
//!
//! # Layout
//!
//! * [`remote`] - one HTTP exchange at a time, per-session cookie jar
//! * [`redirect`] - pure token extraction and failure classification
//! * [`browser`] - browser capability traits, the acquisition driver, and an in-memory fake
//! * [`session`] - domain types and the shared [`SessionStore`]
//! * [`orchestrator`] - the per-session state machine workers
//! * [`upload`] - multipart upload and publish requests
//!
//! # Example
//!
//! ```ignore
//! let orchestrator = Orchestrator::new(ServiceContract::default(), OrchestratorSettings::default(), launcher);
//! let key = orchestrator.start_attempt("03001234567".parse()?, None)?;
//! // poll orchestrator.status(key.as_str()) until state == OtpRequested
//! orchestrator.submit_code(&key, "123456".parse()?)?;
//! ```

pub mod browser;
pub mod contract;
pub mod error;
pub mod orchestrator;
pub mod redirect;
pub mod remote;
pub mod session;
pub mod settings;
pub mod upload;

pub use browser::{AcquisitionRequest, Acquired, BrowserCookie, BrowserLauncher, BrowserPage, InputAction};
pub use contract::{EntryInput, FailurePolicy, ServiceContract, UrlPattern};
pub use error::{Error, Result};
pub use orchestrator::Orchestrator;
pub use session::{Credential, Failure, FailureKind, OtpCode, PhoneNumber, RemoteIdentifier, SessionKey, SessionRecord, SessionState, SessionStore};
pub use settings::OrchestratorSettings;
pub use upload::{UploadRequest, UploadedId};
