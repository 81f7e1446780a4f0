//! Token sets returned by the provider's token endpoint.

// self
use crate::{_prelude::*, auth::TokenSecret};

/// Tokens issued by a single code exchange or refresh.
#[derive(Clone, PartialEq, Eq)]
pub struct TokenSet {
	/// Newly minted access token.
	pub access_token: TokenSecret,
	/// Rotated refresh token; `None` when the provider kept the previous one alive.
	pub refresh_token: Option<TokenSecret>,
	/// Lifetime of the access token relative to the moment it was issued.
	pub expires_in: Duration,
	/// Lifetime of the refresh token when the provider advertises one.
	pub refresh_expires_in: Option<Duration>,
}
impl TokenSet {
	/// Creates a token set with a rotated refresh token.
	pub fn new(
		access_token: impl Into<String>,
		refresh_token: impl Into<String>,
		expires_in: Duration,
	) -> Self {
		Self {
			access_token: TokenSecret::new(access_token),
			refresh_token: Some(TokenSecret::new(refresh_token)),
			expires_in,
			refresh_expires_in: None,
		}
	}

	/// Creates a token set that carries no new refresh token.
	pub fn access_only(access_token: impl Into<String>, expires_in: Duration) -> Self {
		Self {
			access_token: TokenSecret::new(access_token),
			refresh_token: None,
			expires_in,
			refresh_expires_in: None,
		}
	}

	/// Records the refresh-token lifetime advertised by the provider.
	pub fn with_refresh_expires_in(mut self, lifetime: Duration) -> Self {
		self.refresh_expires_in = Some(lifetime);

		self
	}

	/// Absolute access-token expiry when the set was issued at `issued_at`.
	pub fn access_expires_at(&self, issued_at: OffsetDateTime) -> OffsetDateTime {
		issued_at + self.expires_in
	}
}
impl Debug for TokenSet {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("TokenSet")
			.field("access_token", &"<redacted>")
			.field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
			.field("expires_in", &self.expires_in)
			.field("refresh_expires_in", &self.refresh_expires_in)
			.finish()
	}
}
