//! Token material: the redacting secret wrapper and the access/refresh pair.

// self
use crate::_prelude::*;

/// Redacted token wrapper keeping credential material out of logs and traces.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenSecret(String);
impl TokenSecret {
	/// Wraps a raw token string.
	pub fn new(value: impl Into<String>) -> Self {
		Self(value.into())
	}

	/// Returns the inner token value. Callers must avoid logging this string.
	pub fn expose(&self) -> &str {
		&self.0
	}
}
impl AsRef<str> for TokenSecret {
	fn as_ref(&self) -> &str {
		self.expose()
	}
}
impl From<&str> for TokenSecret {
	fn from(value: &str) -> Self {
		Self::new(value)
	}
}
impl From<String> for TokenSecret {
	fn from(value: String) -> Self {
		Self(value)
	}
}
impl Debug for TokenSecret {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_tuple("TokenSecret").field(&"<redacted>").finish()
	}
}
impl Display for TokenSecret {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str("<redacted>")
	}
}

/// The current access/refresh token pair.
///
/// Owned exclusively by the [`CredentialStore`](crate::store::CredentialStore); the pair is always
/// read and replaced as a unit so a new access token is never observed alongside a stale refresh
/// token.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
	/// Short-lived credential attached to each authenticated request.
	pub access_token: Option<TokenSecret>,
	/// Longer-lived credential exchanged for a new access token on expiry.
	pub refresh_token: Option<TokenSecret>,
}
impl Credentials {
	/// Builds a pair from both token values.
	pub fn new(access_token: impl Into<TokenSecret>, refresh_token: impl Into<TokenSecret>) -> Self {
		Self {
			access_token: Some(access_token.into()),
			refresh_token: Some(refresh_token.into()),
		}
	}

	/// Builds a pair that carries only an access token (no refresh capability).
	pub fn bearer_only(access_token: impl Into<TokenSecret>) -> Self {
		Self { access_token: Some(access_token.into()), refresh_token: None }
	}

	/// The cleared pair; dispatchers send unauthenticated requests while this is current.
	pub fn empty() -> Self {
		Self::default()
	}

	/// Returns true when neither token is present.
	pub fn is_empty(&self) -> bool {
		self.access_token.is_none() && self.refresh_token.is_none()
	}

	/// Returns the access token value, if present.
	pub fn access(&self) -> Option<&str> {
		self.access_token.as_ref().map(TokenSecret::expose)
	}

	/// Returns the refresh token value, if present.
	pub fn refresh(&self) -> Option<&str> {
		self.refresh_token.as_ref().map(TokenSecret::expose)
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn secret_formatters_redact() {
		let secret = TokenSecret::new("super-secret");

		assert_eq!(format!("{secret:?}"), "TokenSecret(\"<redacted>\")");
		assert_eq!(format!("{secret}"), "<redacted>");
	}

	#[test]
	fn credentials_report_emptiness() {
		assert!(Credentials::empty().is_empty());
		assert!(!Credentials::bearer_only("access").is_empty());
		assert!(!Credentials::new("access", "refresh").is_empty());
	}

	#[test]
	fn credentials_expose_token_values() {
		let creds = Credentials::new("access-1", "refresh-1");

		assert_eq!(creds.access(), Some("access-1"));
		assert_eq!(creds.refresh(), Some("refresh-1"));
		assert_eq!(Credentials::empty().access(), None);
	}
}
