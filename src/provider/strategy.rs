//! Provider strategy hooks that classify token-endpoint failures.

// self
use crate::_prelude::*;

/// Token-endpoint operation a failure belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenOperation {
	/// Authorization-code exchange.
	CodeExchange,
	/// Refresh-token rotation.
	Refresh,
}
impl TokenOperation {
	/// Returns the RFC 6749 `grant_type` for the operation.
	pub const fn grant_type(self) -> &'static str {
		match self {
			Self::CodeExchange => "authorization_code",
			Self::Refresh => "refresh_token",
		}
	}
}
impl Display for TokenOperation {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.grant_type())
	}
}

/// Strategy hook that maps provider failures into the gatekeeper taxonomy.
///
/// The hook works on plain data so implementations never depend on the HTTP client.
pub trait ProviderStrategy: Send + Sync {
	/// Classifies a token-endpoint failure.
	fn classify_token_error(&self, ctx: &ProviderErrorContext) -> ProviderErrorKind;
}

/// Canonical provider error categories.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProviderErrorKind {
	/// Provider rejected the grant (bad code, expired or already-rotated refresh token).
	InvalidGrant,
	/// Client authentication failed.
	InvalidClient,
	/// Failure is temporary and should be retried.
	Transient,
}

/// Primitive failure data handed to [`ProviderStrategy::classify_token_error`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProviderErrorContext {
	/// Operation associated with the failing request.
	pub operation: TokenOperation,
	/// HTTP status code returned by the provider, when available.
	pub http_status: Option<u16>,
	/// Provider-supplied OAuth `error` field.
	pub oauth_error: Option<String>,
	/// Provider-supplied OAuth `error_description` field.
	pub error_description: Option<String>,
	/// Indicates whether the failure originated from the network/transport layer.
	pub network_error: bool,
}
impl ProviderErrorContext {
	/// Creates a new context scoped to the provided operation.
	pub fn new(operation: TokenOperation) -> Self {
		Self {
			operation,
			http_status: None,
			oauth_error: None,
			error_description: None,
			network_error: false,
		}
	}

	/// Convenience constructor for transport-level failures.
	pub fn network_failure(operation: TokenOperation) -> Self {
		Self { network_error: true, ..Self::new(operation) }
	}

	/// Adds an HTTP status code.
	pub fn with_http_status(mut self, status: u16) -> Self {
		self.http_status = Some(status);

		self
	}

	/// Adds the OAuth error code returned by the provider.
	pub fn with_oauth_error(mut self, error: impl Into<String>) -> Self {
		self.oauth_error = Some(error.into());

		self
	}

	/// Adds the OAuth `error_description` field.
	pub fn with_error_description(mut self, description: impl Into<String>) -> Self {
		self.error_description = Some(description.into());

		self
	}
}

/// Default strategy: structured OAuth fields first, then description hints, then status code.
/// Network failures are always transient.
#[derive(Debug, Default)]
pub struct DefaultProviderStrategy;
impl ProviderStrategy for DefaultProviderStrategy {
	fn classify_token_error(&self, ctx: &ProviderErrorContext) -> ProviderErrorKind {
		if ctx.network_error {
			return ProviderErrorKind::Transient;
		}

		ctx.oauth_error
			.as_deref()
			.and_then(match_error_code)
			.or_else(|| ctx.error_description.as_deref().and_then(match_description))
			.unwrap_or_else(|| classify_status(ctx.http_status))
	}
}

fn match_error_code(value: &str) -> Option<ProviderErrorKind> {
	if value.eq_ignore_ascii_case("invalid_grant") || value.eq_ignore_ascii_case("access_denied") {
		Some(ProviderErrorKind::InvalidGrant)
	} else if value.eq_ignore_ascii_case("invalid_client")
		|| value.eq_ignore_ascii_case("unauthorized_client")
	{
		Some(ProviderErrorKind::InvalidClient)
	} else if value.eq_ignore_ascii_case("temporarily_unavailable")
		|| value.eq_ignore_ascii_case("server_error")
	{
		Some(ProviderErrorKind::Transient)
	} else {
		None
	}
}

fn match_description(description: &str) -> Option<ProviderErrorKind> {
	let lowered = description.to_ascii_lowercase();

	match lowered.as_str() {
		text if text.contains("invalid_grant") || text.contains("expired") =>
			Some(ProviderErrorKind::InvalidGrant),
		text if text.contains("invalid_client") => Some(ProviderErrorKind::InvalidClient),
		text if text.contains("temporarily_unavailable") || text.contains("retry") =>
			Some(ProviderErrorKind::Transient),
		_ => None,
	}
}

fn classify_status(status: Option<u16>) -> ProviderErrorKind {
	match status {
		Some(400) => ProviderErrorKind::InvalidGrant,
		Some(401) => ProviderErrorKind::InvalidClient,
		_ => ProviderErrorKind::Transient,
	}
}
