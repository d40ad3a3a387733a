//! Single-flight refresh coordination.
//!
//! The coordinator guarantees that any number of concurrent "my access token is expired"
//! signals collapse into exactly one network call to the refresh endpoint. The first caller to
//! move the flight state from idle to in-flight performs the exchange; everyone else awaits the
//! same published outcome. The credential store is updated before any waiter is released, so
//! the next snapshot taken by a retrying dispatch always observes the fresh token.

mod metrics;

pub use metrics::RefreshMetrics;

// crates.io
use async_lock::MutexGuardArc;
// self
use crate::{
	_prelude::*,
	auth::{Credentials, TokenSecret},
	obs::{self, OpKind, OpOutcome, OpSpan},
	store::CredentialStore,
	transport::{HttpTransport, OutboundRequest, TransportError},
};

type RefreshOutcome = Result<TokenSecret, RefreshError>;
type FlightSlot = Arc<AsyncMutex<Option<RefreshOutcome>>>;

/// Error type produced by refresh exchanges; cloneable so one outcome can be published to
/// every coalesced waiter.
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
pub enum RefreshError {
	/// The store holds no refresh token to exchange.
	#[error("No refresh token is available to exchange.")]
	MissingRefreshToken,
	/// The refresh endpoint answered with a non-success status.
	#[error("Refresh endpoint rejected the exchange with status {status}: {message}.")]
	Rejected {
		/// HTTP status code returned by the endpoint.
		status: u16,
		/// Response body as lossy UTF-8.
		message: String,
	},
	/// The exchange never produced an HTTP response.
	#[error("Network error occurred while calling the refresh endpoint: {message}.")]
	Network {
		/// Transport failure payload.
		message: String,
	},
	/// The endpoint answered with a success status but an undecodable body.
	#[error("Refresh endpoint returned a malformed payload: {message}.")]
	MalformedPayload {
		/// Path-aware parse failure payload.
		message: String,
		/// HTTP status code that accompanied the body.
		status: u16,
	},
	/// The credential store failed to persist the refreshed pair.
	#[error("Storage failure while saving refreshed credentials: {message}.")]
	Storage {
		/// Mirror backend failure payload.
		message: String,
	},
}

/// Wire body sent to the refresh endpoint.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshRequestBody<'a> {
	refresh_token: &'a str,
}

/// Wire payload returned by the refresh endpoint. The authority may rotate the refresh token;
/// when it does not, the previous one stays valid and is kept.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshPayload {
	access_token: String,
	refresh_token: Option<String>,
}

enum FlightState {
	Idle,
	InFlight(FlightSlot),
}

enum Role {
	Leader(MutexGuardArc<Option<RefreshOutcome>>),
	Follower(FlightSlot),
}

/// Resets the flight state to idle when the leader finishes or is cancelled mid-exchange.
/// Declared after the leader's slot guard so the state is idle again before waiters wake.
struct IdleOnDrop<'a>(&'a Mutex<FlightState>);
impl Drop for IdleOnDrop<'_> {
	fn drop(&mut self) {
		*self.0.lock() = FlightState::Idle;
	}
}

/// Coalesces concurrent refresh demands into one outstanding exchange.
///
/// At most one in-flight exchange exists per coordinator at any instant; the idle-to-in-flight
/// transition happens under a mutex, and only the transitioning caller talks to the network.
pub struct RefreshCoordinator<T>
where
	T: ?Sized + HttpTransport,
{
	/// Shared counters covering leaders, followers, and coalesced entries.
	pub metrics: Arc<RefreshMetrics>,
	endpoint: Url,
	transport: Arc<T>,
	store: Arc<CredentialStore>,
	flight: Mutex<FlightState>,
}
impl<T> RefreshCoordinator<T>
where
	T: ?Sized + HttpTransport,
{
	/// Creates a coordinator that exchanges refresh tokens against `endpoint`.
	pub fn new(endpoint: Url, transport: Arc<T>, store: Arc<CredentialStore>) -> Self {
		Self {
			metrics: Default::default(),
			endpoint,
			transport,
			store,
			flight: Mutex::new(FlightState::Idle),
		}
	}

	/// Obtains a fresh access token, coalescing with any exchange already in flight.
	///
	/// `stale_access` is the access token the caller observed failing. If the store already
	/// holds a different token by the time the exchange would start, that token is returned
	/// without a network call; a 401 that races a completed refresh must not burn the newly
	/// rotated refresh token on a second exchange.
	///
	/// On success the store is updated before this returns to any caller. On failure no
	/// credentials are mutated here; deciding that the session is terminal (and clearing the
	/// store) is the dispatcher's call.
	pub async fn refresh_access_token(&self, stale_access: Option<&str>) -> RefreshOutcome {
		const KIND: OpKind = OpKind::Refresh;

		let span = OpSpan::new(KIND, "refresh_access_token");

		obs::record_op_outcome(KIND, OpOutcome::Attempt);

		let result = span.instrument(self.coordinate(stale_access)).await;

		match &result {
			Ok(_) => obs::record_op_outcome(KIND, OpOutcome::Success),
			Err(_) => obs::record_op_outcome(KIND, OpOutcome::Failure),
		}

		result
	}

	async fn coordinate(&self, stale_access: Option<&str>) -> RefreshOutcome {
		self.metrics.record_attempt();

		loop {
			let role = {
				let mut state = self.flight.lock();

				match &*state {
					FlightState::InFlight(slot) => Role::Follower(slot.clone()),
					FlightState::Idle => {
						let slot: FlightSlot = Arc::new(AsyncMutex::new(None));

						match slot.try_lock_arc() {
							Some(guard) => {
								*state = FlightState::InFlight(slot);

								Role::Leader(guard)
							},
							// A fresh mutex is always lockable; treated as a follower anyway
							// rather than panicking in library code.
							None => Role::Follower(slot),
						}
					},
				}
			};

			match role {
				Role::Leader(mut guard) => {
					let _idle = IdleOnDrop(&self.flight);
					let outcome = self.exchange(stale_access).await;

					match &outcome {
						Ok(_) => self.metrics.record_success(),
						Err(_) => self.metrics.record_failure(),
					}

					*guard = Some(outcome.clone());

					return outcome;
				},
				Role::Follower(slot) => {
					self.metrics.record_coalesced();

					let published = slot.lock().await.clone();

					match published {
						Some(outcome) => {
							match &outcome {
								Ok(_) => self.metrics.record_success(),
								Err(_) => self.metrics.record_failure(),
							}

							return outcome;
						},
						// The leader was cancelled before publishing; start over.
						None => continue,
					}
				},
			}
		}
	}

	async fn exchange(&self, stale_access: Option<&str>) -> RefreshOutcome {
		let snapshot = self.store.snapshot();

		// Another flight completed between the caller's 401 and this exchange; hand out the
		// already-rotated token instead of spending the refresh token again.
		if let Some(current) = snapshot.access_token.as_ref()
			&& stale_access != Some(current.expose())
		{
			return Ok(current.clone());
		}

		let refresh_token =
			snapshot.refresh().ok_or(RefreshError::MissingRefreshToken)?.to_string();
		let request = OutboundRequest::post(self.endpoint.clone())
			.json(&RefreshRequestBody { refresh_token: &refresh_token })
			.map_err(|e| RefreshError::Network { message: e.to_string() })?;
		let response = self.transport.send(request).await.map_err(|e| match e {
			TransportError::Network { message }
			| TransportError::InvalidRequest { message }
			| TransportError::Decode { message } => RefreshError::Network { message },
		})?;

		if !response.is_success() {
			return Err(RefreshError::Rejected {
				status: response.status.as_u16(),
				message: response.text_lossy(),
			});
		}

		let payload = response.json::<RefreshPayload>().map_err(|e| {
			RefreshError::MalformedPayload {
				message: e.to_string(),
				status: response.status.as_u16(),
			}
		})?;
		let access = TokenSecret::new(payload.access_token);
		let rotated = payload
			.refresh_token
			.map(TokenSecret::new)
			.or_else(|| snapshot.refresh_token.clone());

		self.store
			.replace(Credentials { access_token: Some(access.clone()), refresh_token: rotated })
			.await
			.map_err(|e| RefreshError::Storage { message: e.to_string() })?;

		Ok(access)
	}
}
impl<T> Debug for RefreshCoordinator<T>
where
	T: ?Sized + HttpTransport,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("RefreshCoordinator").field("endpoint", &self.endpoint.as_str()).finish()
	}
}

#[cfg(test)]
mod tests {
	// std
	use std::{
		sync::atomic::{AtomicU64, Ordering},
		time::Duration as StdDuration,
	};
	// crates.io
	use http::{HeaderMap, StatusCode};
	// self
	use super::*;
	use crate::transport::{Response, TransportFuture};

	struct StubExchange {
		calls: AtomicU64,
		status: StatusCode,
		body: &'static str,
		delay: StdDuration,
	}
	impl StubExchange {
		fn new(status: StatusCode, body: &'static str) -> Self {
			Self { calls: AtomicU64::new(0), status, body, delay: StdDuration::from_millis(50) }
		}

		fn calls(&self) -> u64 {
			self.calls.load(Ordering::Relaxed)
		}
	}
	impl HttpTransport for StubExchange {
		fn send(&self, _: OutboundRequest) -> TransportFuture<'_> {
			Box::pin(async move {
				self.calls.fetch_add(1, Ordering::Relaxed);

				tokio::time::sleep(self.delay).await;

				Ok(Response {
					status: self.status,
					headers: HeaderMap::new(),
					body: self.body.as_bytes().to_vec(),
				})
			})
		}
	}

	fn endpoint() -> Url {
		Url::parse("https://auth.example.com/refresh").expect("Fixture endpoint should parse.")
	}

	async fn seeded_store(access: &str, refresh: &str) -> Arc<CredentialStore> {
		let store = Arc::new(CredentialStore::new());

		store
			.replace(Credentials::new(access, refresh))
			.await
			.expect("Seeding the store should succeed.");

		store
	}

	#[tokio::test(flavor = "multi_thread")]
	async fn concurrent_refreshes_share_one_exchange() {
		let transport = Arc::new(StubExchange::new(
			StatusCode::OK,
			r#"{"accessToken":"access-new","refreshToken":"refresh-new"}"#,
		));
		let store = seeded_store("access-stale", "refresh-stale").await;
		let coordinator = RefreshCoordinator::new(endpoint(), transport.clone(), store.clone());
		let stale = Some("access-stale");
		let (a, b, c, d, e) = tokio::join!(
			coordinator.refresh_access_token(stale),
			coordinator.refresh_access_token(stale),
			coordinator.refresh_access_token(stale),
			coordinator.refresh_access_token(stale),
			coordinator.refresh_access_token(stale),
		);

		for outcome in [a, b, c, d, e] {
			let token = outcome.expect("Coalesced refresh should succeed for every caller.");

			assert_eq!(token.expose(), "access-new");
		}

		assert_eq!(transport.calls(), 1);
		assert_eq!(store.snapshot().access(), Some("access-new"));
		assert_eq!(store.snapshot().refresh(), Some("refresh-new"));
	}

	#[tokio::test]
	async fn skips_exchange_when_token_already_rotated() {
		let transport = Arc::new(StubExchange::new(StatusCode::OK, "{}"));
		let store = seeded_store("access-current", "refresh-current").await;
		let coordinator = RefreshCoordinator::new(endpoint(), transport.clone(), store);
		let token = coordinator
			.refresh_access_token(Some("access-older"))
			.await
			.expect("Stale-token entry should reuse the rotated token.");

		assert_eq!(token.expose(), "access-current");
		assert_eq!(transport.calls(), 0);
	}

	#[tokio::test]
	async fn missing_refresh_token_fails_without_network_call() {
		let transport = Arc::new(StubExchange::new(StatusCode::OK, "{}"));
		let store = Arc::new(CredentialStore::new());
		let coordinator = RefreshCoordinator::new(endpoint(), transport.clone(), store);
		let err = coordinator
			.refresh_access_token(None)
			.await
			.expect_err("Refresh without a refresh token should fail.");

		assert_eq!(err, RefreshError::MissingRefreshToken);
		assert_eq!(transport.calls(), 0);
	}

	#[tokio::test]
	async fn rejection_leaves_credentials_untouched() {
		let transport =
			Arc::new(StubExchange::new(StatusCode::UNAUTHORIZED, r#"{"error":"invalid_grant"}"#));
		let store = seeded_store("access-stale", "refresh-stale").await;
		let coordinator = RefreshCoordinator::new(endpoint(), transport.clone(), store.clone());
		let err = coordinator
			.refresh_access_token(Some("access-stale"))
			.await
			.expect_err("Rejected exchange should surface an error.");

		assert!(matches!(err, RefreshError::Rejected { status: 401, .. }));
		// Clearing on terminal failure is the dispatcher's decision, not the coordinator's.
		assert_eq!(store.snapshot().access(), Some("access-stale"));
		assert_eq!(store.snapshot().refresh(), Some("refresh-stale"));
	}

	#[tokio::test(flavor = "multi_thread")]
	async fn failure_outcome_is_shared_by_every_waiter() {
		let transport = Arc::new(StubExchange::new(StatusCode::BAD_REQUEST, "expired"));
		let store = seeded_store("access-stale", "refresh-stale").await;
		let coordinator = RefreshCoordinator::new(endpoint(), transport.clone(), store);
		let stale = Some("access-stale");
		let (a, b, c) = tokio::join!(
			coordinator.refresh_access_token(stale),
			coordinator.refresh_access_token(stale),
			coordinator.refresh_access_token(stale),
		);

		for outcome in [a, b, c] {
			let err = outcome.expect_err("Every waiter should observe the shared failure.");

			assert!(matches!(err, RefreshError::Rejected { status: 400, .. }));
		}

		assert_eq!(transport.calls(), 1);
	}

	#[tokio::test(flavor = "multi_thread")]
	async fn cancelled_leader_does_not_strand_followers() {
		let transport = Arc::new(StubExchange::new(
			StatusCode::OK,
			r#"{"accessToken":"access-new","refreshToken":"refresh-new"}"#,
		));
		let store = seeded_store("access-stale", "refresh-stale").await;
		let coordinator =
			Arc::new(RefreshCoordinator::new(endpoint(), transport.clone(), store.clone()));
		let leader = tokio::spawn({
			let coordinator = coordinator.clone();

			async move { coordinator.refresh_access_token(Some("access-stale")).await }
		});

		// Let the leader reach the exchange so the next caller coalesces behind it.
		tokio::time::sleep(StdDuration::from_millis(10)).await;

		let follower = tokio::spawn({
			let coordinator = coordinator.clone();

			async move { coordinator.refresh_access_token(Some("access-stale")).await }
		});

		// With the follower parked on the flight, pull the leader down mid-exchange.
		tokio::time::sleep(StdDuration::from_millis(10)).await;
		leader.abort();

		let _ = leader.await;
		let token = follower
			.await
			.expect("Follower task should not be cancelled.")
			.expect("The follower should recover after the leader is cancelled.");

		assert_eq!(token.expose(), "access-new");
		assert_eq!(store.snapshot().access(), Some("access-new"));
		assert_eq!(store.snapshot().refresh(), Some("refresh-new"));
	}

	#[tokio::test]
	async fn keeps_previous_refresh_token_without_rotation() {
		let transport =
			Arc::new(StubExchange::new(StatusCode::OK, r#"{"accessToken":"access-new"}"#));
		let store = seeded_store("access-stale", "refresh-keep").await;
		let coordinator = RefreshCoordinator::new(endpoint(), transport, store.clone());

		coordinator
			.refresh_access_token(Some("access-stale"))
			.await
			.expect("Rotation-free refresh should succeed.");

		assert_eq!(store.snapshot().access(), Some("access-new"));
		assert_eq!(store.snapshot().refresh(), Some("refresh-keep"));
	}

	#[tokio::test]
	async fn malformed_payload_is_reported_with_status() {
		let transport = Arc::new(StubExchange::new(StatusCode::OK, r#"{"accessToken":42}"#));
		let store = seeded_store("access-stale", "refresh-stale").await;
		let coordinator = RefreshCoordinator::new(endpoint(), transport, store);
		let err = coordinator
			.refresh_access_token(Some("access-stale"))
			.await
			.expect_err("Malformed payload should surface an error.");

		assert!(matches!(err, RefreshError::MalformedPayload { status: 200, .. }));
	}
}
