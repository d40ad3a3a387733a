//! Crate-level error types shared across the store, transport, and dispatch layers.

// crates.io
use http::StatusCode;
// self
use crate::_prelude::*;

/// Crate-wide result type alias returning [`Error`] by default.
pub type Result<T, E = Error> = std::result::Result<T, E>;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Canonical error exposed by [`dispatch`](crate::dispatch::Dispatcher::dispatch).
///
/// Authentication expiry itself never appears here; it is absorbed by the refresh + retry-once
/// flow and only surfaces as [`Error::Refresh`] or [`Error::RetryExhausted`] when resolution
/// fails.
#[derive(Debug, ThisError)]
pub enum Error {
	/// Mirror-backend failure surfaced during a credential write.
	#[error("{0}")]
	Storage(
		#[from]
		#[source]
		crate::store::StoreError,
	),
	/// Local configuration problem.
	#[error(transparent)]
	Config(#[from] ConfigError),
	/// Transport failure (DNS, TCP, TLS); never retried by this crate.
	#[error(transparent)]
	Transport(#[from] crate::transport::TransportError),
	/// The refresh exchange failed; the session is terminal and credentials were cleared.
	#[error(transparent)]
	Refresh(#[from] crate::refresh::RefreshError),

	/// The request completed with a non-success, non-auth status; never retried by this crate.
	#[error("Request failed with status {status}.")]
	Status {
		/// HTTP status code returned by the backend.
		status: StatusCode,
		/// Response body as lossy UTF-8, for caller-side diagnostics.
		body: String,
	},
	/// Authentication failed again after one refresh + retry cycle.
	#[error("Authentication failed again after a refreshed retry (status {status}).")]
	RetryExhausted {
		/// HTTP status code returned by the retried request.
		status: StatusCode,
	},
}
impl Error {
	/// Returns true when the failure ended the session (credentials were cleared and the
	/// session-expired signal was raised).
	pub fn is_session_terminal(&self) -> bool {
		matches!(self, Self::Refresh(_) | Self::RetryExhausted { .. })
	}
}

/// Configuration and validation failures.
#[derive(Debug, ThisError)]
pub enum ConfigError {
	/// HTTP client could not be constructed.
	#[error("HTTP client could not be constructed.")]
	HttpClientBuild {
		/// Underlying transport builder failure.
		#[source]
		source: BoxError,
	},
	/// The refresh endpoint URL cannot be parsed.
	#[error("Refresh endpoint URL is invalid.")]
	InvalidEndpoint {
		/// Underlying parsing failure.
		#[source]
		source: url::ParseError,
	},
}
impl ConfigError {
	/// Wraps a transport's builder failure inside [`ConfigError`].
	pub fn http_client_build(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::HttpClientBuild { source: Box::new(src) }
	}
}
#[cfg(feature = "reqwest")]
impl From<ReqwestError> for ConfigError {
	fn from(e: ReqwestError) -> Self {
		Self::http_client_build(e)
	}
}
