//! Gatekeeper-level error types shared by the token manager, rate-limit tracker, and stores.

// self
use crate::{_prelude::*, auth::ConnectionId, ratelimit::RateLimitExceeded};

/// Gatekeeper-wide result type alias returning [`Error`] by default.
pub type Result<T, E = Error> = std::result::Result<T, E>;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Canonical error exposed by public APIs.
#[derive(Debug, ThisError)]
pub enum Error {
	/// Storage-layer failure.
	#[error("{0}")]
	Storage(
		#[from]
		#[source]
		crate::store::StoreError,
	),
	/// Shared cache or lock backend failure.
	#[error("{0}")]
	Cache(
		#[from]
		#[source]
		crate::cache::CacheError,
	),
	/// Local configuration problem.
	#[error(transparent)]
	Config(#[from] ConfigError),
	/// Temporary upstream failure; retry with backoff.
	#[error(transparent)]
	Transient(#[from] TransientError),
	/// Transport failure (DNS, TCP, TLS).
	#[error(transparent)]
	Transport(#[from] TransportError),

	/// Provider rejected the grant (e.g., bad code or refresh token).
	#[error("Provider rejected the grant: {reason}.")]
	InvalidGrant {
		/// Provider- or gatekeeper-supplied reason string.
		reason: String,
	},
	/// Client authentication failed or credentials are malformed.
	#[error("Client authentication failed: {reason}.")]
	InvalidClient {
		/// Provider- or gatekeeper-supplied reason string.
		reason: String,
	},

	/// No connection exists for the identifier.
	#[error("Connection `{connection}` does not exist.")]
	ConnectionNotFound {
		/// Connection that was looked up.
		connection: ConnectionId,
	},
	/// Connection is disabled or revoked and cannot be used.
	#[error("Connection `{connection}` is not active.")]
	ConnectionInactive {
		/// Connection that was rejected.
		connection: ConnectionId,
	},
	/// Connection lacks the token material needed for the operation.
	#[error("Connection `{connection}` has no {missing} on record.")]
	TokensMissing {
		/// Connection that was rejected.
		connection: ConnectionId,
		/// Which secret is missing.
		missing: &'static str,
	},
	/// A single token exchange failed with a retryable error.
	#[error("Token exchange for connection `{connection}` failed.")]
	TokenRefreshFailed {
		/// Connection whose exchange failed.
		connection: ConnectionId,
		/// Underlying endpoint failure.
		#[source]
		source: Box<Error>,
	},
	/// Every refresh attempt failed; the refresh token is still plausibly valid.
	#[error("Token refresh for connection `{connection}` failed after {attempts} attempts.")]
	TokenRefreshExhausted {
		/// Connection whose refresh failed.
		connection: ConnectionId,
		/// Number of endpoint calls made.
		attempts: u32,
		/// Last failure observed.
		#[source]
		source: Box<Error>,
	},
	/// The refresh token was rejected; the connection must be re-authorized.
	#[error("Refresh token for connection `{connection}` is invalid: {reason}.")]
	RefreshTokenInvalid {
		/// Connection that now requires re-authorization.
		connection: ConnectionId,
		/// Provider- or gatekeeper-supplied reason string.
		reason: String,
	},
	/// A concurrent writer replaced the refresh token mid-rotation and the stored access token is
	/// still not fresh.
	#[error("Connection `{connection}` was rotated concurrently and holds no fresh access token.")]
	RotationConflict {
		/// Connection whose rotation lost the compare-and-swap.
		connection: ConnectionId,
	},
	/// Another holder kept the refresh lock longer than the wait budget.
	#[error("Timed out after {waited} waiting for the refresh of connection `{connection}`.")]
	LockAcquisitionTimeout {
		/// Connection whose refresh was awaited.
		connection: ConnectionId,
		/// Time spent waiting.
		waited: Duration,
	},
	/// A provider quota window is exhausted.
	#[error(transparent)]
	RateLimitExceeded(#[from] RateLimitExceeded),
	/// The caller cancelled the operation.
	#[error("Operation was cancelled.")]
	Cancelled,
	/// The caller-supplied API operation failed.
	#[error("Upstream API call failed.")]
	Upstream {
		/// Caller error.
		#[source]
		source: BoxError,
	},
}
impl Error {
	/// Wraps a caller-side API failure.
	pub fn upstream(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::Upstream { source: Box::new(src) }
	}

	/// Returns `true` for failures that may succeed when retried (network hiccups, 5xx, parse
	/// failures on truncated bodies).
	pub fn is_retryable(&self) -> bool {
		matches!(self, Self::Transient(_) | Self::Transport(_) | Self::TokenRefreshFailed { .. })
	}

	/// Returns `true` when the provider rejected the grant outright.
	pub fn is_invalid_grant(&self) -> bool {
		matches!(self, Self::InvalidGrant { .. } | Self::RefreshTokenInvalid { .. })
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
	/// HTTP request construction failed.
	#[error(transparent)]
	HttpRequest(#[from] oauth2::http::Error),
	/// Provider descriptor contains an invalid URL.
	#[error("Descriptor contains an invalid URL.")]
	InvalidDescriptor {
		/// Underlying parsing failure.
		#[source]
		source: oauth2::url::ParseError,
	},
	/// Redirect URI cannot be parsed.
	#[error("Redirect URI is invalid.")]
	InvalidRedirect {
		/// Underlying parsing failure.
		#[source]
		source: oauth2::url::ParseError,
	},
	/// Configuration document could not be parsed.
	#[error("Configuration is invalid at `{path}`: {message}.")]
	Parse {
		/// Path of the offending field.
		path: String,
		/// Parser message.
		message: String,
	},
	/// Configuration value is out of range.
	#[error("Configuration field `{field}` is invalid: {reason}.")]
	InvalidValue {
		/// Offending field name.
		field: &'static str,
		/// Why the value was rejected.
		reason: &'static str,
	},
	/// Token endpoint response omitted `expires_in`.
	#[error("Token endpoint response is missing expires_in.")]
	MissingExpiresIn,
	/// Token endpoint returned an excessively large `expires_in`.
	#[error("The expires_in value exceeds the supported range.")]
	ExpiresInOutOfRange,
	/// Token endpoint returned a non-positive duration.
	#[error("The expires_in value must be positive.")]
	NonPositiveExpiresIn,
	/// Provider issues access tokens that never outlive the proactive refresh threshold.
	#[error(
		"Access tokens live for {lifetime}, which does not exceed the proactive refresh threshold of {threshold}."
	)]
	TokenLifetimeBelowThreshold {
		/// Lifetime granted by the provider.
		lifetime: Duration,
		/// Configured threshold.
		threshold: Duration,
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

/// Temporary failure variants (safe to retry).
#[derive(Debug, ThisError)]
pub enum TransientError {
	/// Provider returned an unexpected but non-fatal response.
	#[error("Token endpoint returned an unexpected response: {message}.")]
	TokenEndpoint {
		/// Provider- or gatekeeper-supplied message summarizing the failure.
		message: String,
		/// HTTP status code, when available.
		status: Option<u16>,
		/// Retry-After hint from upstream, if supplied.
		retry_after: Option<Duration>,
	},
	/// Token endpoint responded with malformed JSON that could not be parsed.
	#[error("Token endpoint returned malformed JSON.")]
	TokenResponseParse {
		/// Structured parsing failure.
		#[source]
		source: serde_path_to_error::Error<serde_json::error::Error>,
		/// HTTP status code, when available.
		status: Option<u16>,
	},
	/// Token endpoint did not answer within the attempt timeout.
	#[error("Token endpoint did not answer within {timeout}.")]
	Timeout {
		/// Time allowed for the attempt.
		timeout: Duration,
	},
}
impl TransientError {
	/// Retry-After hint carried by the failure, if any.
	pub fn retry_after(&self) -> Option<Duration> {
		match self {
			Self::TokenEndpoint { retry_after, .. } => *retry_after,
			Self::TokenResponseParse { .. } | Self::Timeout { .. } => None,
		}
	}
}

/// Transport-level failures (network, IO).
#[derive(Debug, ThisError)]
pub enum TransportError {
	/// Underlying HTTP client reported a network failure.
	#[error("Network error occurred while calling the token endpoint.")]
	Network {
		/// Transport-specific network error.
		#[source]
		source: BoxError,
	},
	/// Underlying IO failure surfaced during transport.
	#[error("I/O error occurred while calling the token endpoint.")]
	Io(#[from] std::io::Error),
}
impl TransportError {
	/// Wraps a transport-specific network error.
	pub fn network(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::Network { source: Box::new(src) }
	}
}
#[cfg(feature = "reqwest")]
impl From<ReqwestError> for TransportError {
	fn from(e: ReqwestError) -> Self {
		Self::network(e)
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	fn connection() -> ConnectionId {
		ConnectionId::new("conn-1").expect("Connection fixture should be valid.")
	}

	#[test]
	fn retryable_classification_matches_taxonomy() {
		let transient: Error = TransientError::TokenEndpoint {
			message: "bad gateway".into(),
			status: Some(502),
			retry_after: None,
		}
		.into();

		assert!(transient.is_retryable());
		assert!(!Error::InvalidGrant { reason: "expired".into() }.is_retryable());
		assert!(!Error::InvalidClient { reason: "bad secret".into() }.is_retryable());
		assert!(Error::InvalidGrant { reason: "expired".into() }.is_invalid_grant());
		assert!(
			Error::RefreshTokenInvalid { connection: connection(), reason: "rotated".into() }
				.is_invalid_grant()
		);
	}

	#[test]
	fn exhausted_error_exposes_last_failure_as_source() {
		let err = Error::TokenRefreshExhausted {
			connection: connection(),
			attempts: 3,
			source: Box::new(
				TransientError::TokenEndpoint {
					message: "upstream down".into(),
					status: Some(503),
					retry_after: None,
				}
				.into(),
			),
		};

		assert!(err.to_string().contains("conn-1"));
		assert!(err.to_string().contains("3 attempts"));

		let source = StdError::source(&err).expect("Exhausted error should expose its source.");

		assert!(source.to_string().contains("upstream down"));
	}
}
