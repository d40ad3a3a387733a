//! Request dispatch with transparent bearer injection and a strict retry-once policy.
//!
//! [`Dispatcher::dispatch`] is the only operation application code calls. Each request walks a
//! small per-request state machine: send with the current bearer; on an unauthorized status ask
//! the [`RefreshCoordinator`] for a fresh token and resend exactly once; a second unauthorized
//! answer is terminal. Terminal auth failures clear the credential store and raise the
//! session-expired signal exactly once, even when many concurrent requests fail together.
//! Non-auth failures pass through to the caller untouched; retrying those is a different
//! concern and deliberately not this crate's.

// crates.io
use http::{HeaderValue, StatusCode, header};
// self
use crate::{
	_prelude::*,
	obs::{self, OpKind, OpOutcome, OpSpan},
	refresh::RefreshCoordinator,
	store::CredentialStore,
	transport::{HttpTransport, OutboundRequest, Response},
};
#[cfg(feature = "reqwest")] use crate::{error::ConfigError, transport::ReqwestTransport};

#[cfg(feature = "reqwest")]
/// Dispatcher specialized for the crate's default reqwest transport stack.
pub type ReqwestDispatcher = Dispatcher<ReqwestTransport>;

/// Outbound notification that the session ended and re-authentication is required.
///
/// What happens next (navigation to a login surface, prompting, shutdown) belongs to the
/// application shell; the dispatcher only guarantees the signal fires exactly once per
/// terminal failure, however many concurrent requests triggered it.
pub trait SessionSignal
where
	Self: Send + Sync,
{
	/// Invoked after the credential store was cleared by a terminal auth failure.
	fn session_expired(&self);
}
impl<F> SessionSignal for F
where
	F: Fn() + Send + Sync,
{
	fn session_expired(&self) {
		self();
	}
}

/// Captured request descriptor plus the retried-once marker.
///
/// A given pending request is retried at most once for authentication reasons; the marker is
/// what makes a second unauthorized answer terminal instead of looping.
struct PendingRequest {
	request: OutboundRequest,
	retried: bool,
}
impl PendingRequest {
	fn new(request: OutboundRequest) -> Self {
		Self { request, retried: false }
	}
}

/// The authenticated client core application code talks to.
///
/// The dispatcher owns the transport, the credential store, and the refresh coordinator so
/// callers only ever see the eventual success or the terminal failure; intermediate 401s and
/// the refresh round trip stay invisible.
pub struct Dispatcher<T>
where
	T: ?Sized + HttpTransport,
{
	/// Transport shared between regular dispatches and refresh exchanges.
	pub transport: Arc<T>,
	/// Process-wide credential holder.
	pub store: Arc<CredentialStore>,
	/// Single-flight refresh coordinator.
	pub coordinator: Arc<RefreshCoordinator<T>>,
	session_signal: Option<Arc<dyn SessionSignal>>,
}
impl<T> Dispatcher<T>
where
	T: ?Sized + HttpTransport,
{
	/// Creates a dispatcher around a caller-provided transport.
	///
	/// `refresh_endpoint` is where expired access tokens are exchanged; the transport is shared
	/// with the coordinator so both layers reuse one connection pool.
	pub fn with_transport(
		transport: impl Into<Arc<T>>,
		refresh_endpoint: Url,
		store: Arc<CredentialStore>,
	) -> Self {
		let transport = transport.into();
		let coordinator = Arc::new(RefreshCoordinator::new(
			refresh_endpoint,
			transport.clone(),
			store.clone(),
		));

		Self { transport, store, coordinator, session_signal: None }
	}

	/// Attaches the session-expired signal raised on terminal auth failures.
	pub fn with_session_signal(mut self, signal: Arc<dyn SessionSignal>) -> Self {
		self.session_signal = Some(signal);

		self
	}

	/// Sends the request, transparently refreshing the access token and retrying once when the
	/// backend answers unauthorized.
	///
	/// The bearer header is attached from a store snapshot at send time and re-read for the
	/// retry, so a retried request always carries the token the coordinator just rotated in,
	/// never the expired one.
	pub async fn dispatch(&self, request: OutboundRequest) -> Result<Response> {
		const KIND: OpKind = OpKind::Dispatch;

		let span = OpSpan::new(KIND, "dispatch");

		obs::record_op_outcome(KIND, OpOutcome::Attempt);

		let result = span.instrument(self.run(PendingRequest::new(request))).await;

		match &result {
			Ok(_) => obs::record_op_outcome(KIND, OpOutcome::Success),
			Err(_) => obs::record_op_outcome(KIND, OpOutcome::Failure),
		}

		result
	}

	async fn run(&self, mut pending: PendingRequest) -> Result<Response> {
		loop {
			let snapshot = self.store.snapshot();
			let response = self.send_with_bearer(&pending.request, snapshot.access()).await?;

			if response.status != StatusCode::UNAUTHORIZED {
				return if response.is_success() {
					Ok(response)
				} else {
					Err(Error::Status {
						status: response.status,
						body: response.text_lossy(),
					})
				};
			}
			if pending.retried {
				return self.fail_terminal(Error::RetryExhausted { status: response.status }).await;
			}

			match self.coordinator.refresh_access_token(snapshot.access()).await {
				// The next loop iteration re-reads the store, which the coordinator updated
				// before returning.
				Ok(_) => pending.retried = true,
				Err(e) => return self.fail_terminal(e.into()).await,
			}
		}
	}

	async fn send_with_bearer(
		&self,
		request: &OutboundRequest,
		access: Option<&str>,
	) -> Result<Response> {
		let mut request = request.clone();

		// No access token means no Authorization header at all; the backend's unauthorized
		// answer then drives the refresh flow like any other expiry.
		if let Some(token) = access
			&& let Ok(mut value) = HeaderValue::from_str(&format!("Bearer {token}"))
		{
			value.set_sensitive(true);
			request.headers.insert(header::AUTHORIZATION, value);
		}

		Ok(self.transport.send(request).await?)
	}

	async fn fail_terminal(&self, error: Error) -> Result<Response> {
		// Only the call that actually emptied the store raises the signal; concurrent terminal
		// failures all land here but clear() hands the held pair to exactly one of them. The
		// session failure stays the headline even when a mirror erase fails underneath.
		if let Ok(previous) = self.store.clear().await
			&& !previous.is_empty()
			&& let Some(signal) = &self.session_signal
		{
			signal.session_expired();
		}

		Err(error)
	}
}
impl<T> Debug for Dispatcher<T>
where
	T: ?Sized + HttpTransport,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("Dispatcher")
			.field("store", &self.store)
			.field("session_signal_set", &self.session_signal.is_some())
			.finish()
	}
}
#[cfg(feature = "reqwest")]
impl Dispatcher<ReqwestTransport> {
	/// Creates a dispatcher with the crate's default reqwest-backed transport.
	pub fn new(refresh_endpoint: Url, store: Arc<CredentialStore>) -> Self {
		Self::with_transport(ReqwestTransport::default(), refresh_endpoint, store)
	}

	/// Builds a dispatcher from a caller-configured client builder and an endpoint string.
	///
	/// Covers applications that need custom timeouts, proxies, or TLS posture; plain
	/// [`Dispatcher::new`] is enough when the default client fits.
	pub fn from_builder(
		builder: ReqwestClientBuilder,
		refresh_endpoint: &str,
		store: Arc<CredentialStore>,
	) -> Result<Self, ConfigError> {
		let endpoint = Url::parse(refresh_endpoint)
			.map_err(|e| ConfigError::InvalidEndpoint { source: e })?;
		let client = builder.build()?;

		Ok(Self::with_transport(ReqwestTransport::with_client(client), endpoint, store))
	}
}
