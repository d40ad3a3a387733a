//! Transport primitives for authenticated request dispatch.
//!
//! The module exposes [`HttpTransport`] alongside the [`OutboundRequest`] and [`Response`]
//! descriptors so downstream crates can integrate custom HTTP stacks. A transport is a dumb
//! pipe: it resolves with a [`Response`] for every HTTP status, including 401 and 5xx, and only
//! fails for network-level problems. All status interpretation lives in the dispatcher.

// std
#[cfg(feature = "reqwest")] use std::ops::Deref;
// crates.io
use http::{HeaderMap, HeaderValue, Method, StatusCode, header};
// self
use crate::_prelude::*;

/// Boxed future returned by [`HttpTransport::send`].
pub type TransportFuture<'a> =
	Pin<Box<dyn Future<Output = Result<Response, TransportError>> + 'a + Send>>;

/// Abstraction over HTTP stacks capable of executing dispatched requests.
///
/// Implementations must be `Send + Sync + 'static` so a single transport can be shared behind
/// `Arc` by every in-flight dispatch, and the returned future must own whatever state it needs
/// so it stays `Send` across executor hops.
pub trait HttpTransport
where
	Self: 'static + Send + Sync,
{
	/// Executes the request, resolving with the response for any HTTP status.
	fn send(&self, request: OutboundRequest) -> TransportFuture<'_>;
}

/// Transport-level failure; never carries an HTTP status.
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
pub enum TransportError {
	/// The request never produced an HTTP response (DNS, TCP, TLS, timeout).
	#[error("Network error occurred while sending the request: {message}.")]
	Network {
		/// Human-readable transport failure payload.
		message: String,
	},
	/// The request descriptor could not be converted for the underlying stack.
	#[error("Request could not be constructed: {message}.")]
	InvalidRequest {
		/// Human-readable construction failure payload.
		message: String,
	},
	/// A response body could not be decoded into the requested shape.
	#[error("Response body could not be decoded: {message}.")]
	Decode {
		/// Structured path-aware parse failure payload.
		message: String,
	},
}

/// Captured outbound request descriptor.
///
/// The dispatcher clones the descriptor before attaching the bearer header, so the pristine
/// copy can be rebuilt against a refreshed store snapshot when a retry is needed.
#[derive(Clone, Debug)]
pub struct OutboundRequest {
	/// HTTP verb.
	pub method: Method,
	/// Fully-resolved request URL.
	pub url: Url,
	/// Caller-supplied headers; the dispatcher adds `Authorization` on top at send time.
	pub headers: HeaderMap,
	/// Optional request body bytes.
	pub body: Option<Vec<u8>>,
}
impl OutboundRequest {
	/// Creates a descriptor for the provided verb and URL.
	pub fn new(method: Method, url: Url) -> Self {
		Self { method, url, headers: HeaderMap::new(), body: None }
	}

	/// Shorthand for a GET descriptor.
	pub fn get(url: Url) -> Self {
		Self::new(Method::GET, url)
	}

	/// Shorthand for a POST descriptor.
	pub fn post(url: Url) -> Self {
		Self::new(Method::POST, url)
	}

	/// Appends a header, silently dropping values that are not valid header material.
	pub fn header(mut self, name: header::HeaderName, value: impl AsRef<str>) -> Self {
		if let Ok(value) = HeaderValue::from_str(value.as_ref()) {
			self.headers.insert(name, value);
		}

		self
	}

	/// Attaches raw body bytes.
	pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
		self.body = Some(body.into());

		self
	}

	/// Serializes `payload` as the JSON body and sets the content type.
	pub fn json<T>(self, payload: &T) -> Result<Self, TransportError>
	where
		T: Serialize,
	{
		let body = serde_json::to_vec(payload).map_err(|e| TransportError::InvalidRequest {
			message: format!("Failed to serialize JSON body: {e}"),
		})?;

		Ok(self
			.header(header::CONTENT_TYPE, "application/json")
			.body(body))
	}
}

/// Response produced by a transport.
#[derive(Clone, Debug)]
pub struct Response {
	/// HTTP status code.
	pub status: StatusCode,
	/// Response headers.
	pub headers: HeaderMap,
	/// Raw body bytes.
	pub body: Vec<u8>,
}
impl Response {
	/// Returns true for 2xx statuses.
	pub fn is_success(&self) -> bool {
		self.status.is_success()
	}

	/// Deserializes the body as JSON, reporting the path of the first mismatch on failure.
	pub fn json<T>(&self) -> Result<T, TransportError>
	where
		T: DeserializeOwned,
	{
		let mut deserializer = serde_json::Deserializer::from_slice(&self.body);

		serde_path_to_error::deserialize(&mut deserializer)
			.map_err(|e| TransportError::Decode { message: e.to_string() })
	}

	/// Returns the body as lossy UTF-8 for error payloads and diagnostics.
	pub fn text_lossy(&self) -> String {
		String::from_utf8_lossy(&self.body).into_owned()
	}
}

/// Thin wrapper around [`ReqwestClient`] so shared HTTP behavior lives in one place.
///
/// The wrapped client is used for both regular dispatches and refresh exchanges; configure any
/// custom [`ReqwestClient`] with the timeouts and TLS posture the embedding application needs.
#[cfg(feature = "reqwest")]
#[derive(Clone, Debug, Default)]
pub struct ReqwestTransport(pub ReqwestClient);
#[cfg(feature = "reqwest")]
impl ReqwestTransport {
	/// Wraps an existing reqwest [`ReqwestClient`].
	pub fn with_client(client: ReqwestClient) -> Self {
		Self(client)
	}
}
#[cfg(feature = "reqwest")]
impl AsRef<ReqwestClient> for ReqwestTransport {
	fn as_ref(&self) -> &ReqwestClient {
		&self.0
	}
}
#[cfg(feature = "reqwest")]
impl Deref for ReqwestTransport {
	type Target = ReqwestClient;

	fn deref(&self) -> &Self::Target {
		&self.0
	}
}
#[cfg(feature = "reqwest")]
impl HttpTransport for ReqwestTransport {
	fn send(&self, request: OutboundRequest) -> TransportFuture<'_> {
		let client = self.0.clone();

		Box::pin(async move {
			let mut builder =
				client.request(request.method, request.url.as_str()).headers(request.headers);

			if let Some(body) = request.body {
				builder = builder.body(body);
			}

			let response = builder.send().await.map_err(|e| TransportError::Network {
				message: e.to_string(),
			})?;
			let status = response.status();
			let headers = response.headers().to_owned();
			let body = response
				.bytes()
				.await
				.map_err(|e| TransportError::Network { message: e.to_string() })?
				.to_vec();

			Ok(Response { status, headers, body })
		})
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn json_body_sets_content_type() {
		let url = Url::parse("https://api.example.com/items").expect("Fixture URL should parse.");
		let request = OutboundRequest::post(url)
			.json(&serde_json::json!({ "name": "widget" }))
			.expect("JSON body fixture should serialize.");

		assert_eq!(
			request.headers.get(header::CONTENT_TYPE).map(|v| v.to_str().unwrap_or_default()),
			Some("application/json"),
		);
		assert!(request.body.is_some());
	}

	#[test]
	fn response_json_reports_mismatch_path() {
		#[derive(Debug, Deserialize)]
		struct Payload {
			#[allow(dead_code)]
			count: u64,
		}

		let response = Response {
			status: StatusCode::OK,
			headers: HeaderMap::new(),
			body: br#"{"count":"not-a-number"}"#.to_vec(),
		};
		let err = response.json::<Payload>().expect_err("Mismatched payload should fail.");

		assert!(matches!(&err, TransportError::Decode { message } if message.contains("count")));
	}

	#[test]
	fn invalid_header_values_are_dropped() {
		let url = Url::parse("https://api.example.com").expect("Fixture URL should parse.");
		let request =
			OutboundRequest::get(url).header(header::ACCEPT, "application/json\u{0}garbage");

		assert!(request.headers.get(header::ACCEPT).is_none());
	}
}
