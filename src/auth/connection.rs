//! Connection records, their lifecycle status, and atomic partial updates.

// self
use crate::{
	_prelude::*,
	auth::{ConnectionId, ProviderId, TokenSecret, TokenSet},
};

/// Lifecycle status of a connection.
///
/// ```text
/// Unauthorized -> Active -> RefreshPending -> Active | Stale | Revoked
/// Stale -> RefreshPending -> Active
/// ```
///
/// `Revoked` is terminal until a new authorization replaces the grant.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
	/// Created but no tokens have been acquired yet.
	#[default]
	Unauthorized,
	/// Holding a usable token set.
	Active,
	/// A holder of the refresh lock is rotating the tokens.
	RefreshPending,
	/// The last refresh exhausted its retries; the refresh token is still plausibly valid.
	Stale,
	/// The grant was revoked or the refresh token was rejected.
	Revoked,
}
impl ConnectionStatus {
	/// Returns a stable label suitable for logs and metrics.
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Unauthorized => "unauthorized",
			Self::Active => "active",
			Self::RefreshPending => "refresh_pending",
			Self::Stale => "stale",
			Self::Revoked => "revoked",
		}
	}

	/// Returns `true` when the state machine allows moving to `next`.
	pub fn can_transition_to(self, next: Self) -> bool {
		use ConnectionStatus::*;

		match (self, next) {
			// Re-authorization is the only way out of `Revoked` and the only way into `Active`
			// from `Unauthorized`.
			(Unauthorized | Revoked, Active) => true,
			(Revoked, _) => false,
			(Active | Stale | RefreshPending, RefreshPending) => true,
			(RefreshPending | Stale, Active | Stale) => true,
			(_, Revoked) => true,
			(current, next) => current == next,
		}
	}
}
impl Display for ConnectionStatus {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Durable record of one authorized connection.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
	/// Connection identifier.
	pub id: ConnectionId,
	/// Provider that issued the tokens, when known.
	pub provider: Option<ProviderId>,
	/// Lifecycle status.
	pub status: ConnectionStatus,
	/// Whether the connection may be used for outbound calls.
	pub is_active: bool,
	/// Current access token.
	pub access_token: Option<TokenSecret>,
	/// Current refresh token; superseded values are never kept.
	pub refresh_token: Option<TokenSecret>,
	/// Absolute access-token expiry.
	pub access_token_expires_at: Option<OffsetDateTime>,
	/// Absolute refresh-token expiry.
	pub refresh_token_expires_at: Option<OffsetDateTime>,
	/// Instant of the last successful refresh or code exchange.
	pub last_refresh_at: Option<OffsetDateTime>,
	/// Creation instant.
	pub created_at: OffsetDateTime,
	/// Instant of the last mutation.
	pub updated_at: OffsetDateTime,
	/// Revocation instant, if revoked.
	pub revoked_at: Option<OffsetDateTime>,
}
impl Connection {
	/// Creates an unauthorized connection without tokens.
	pub fn new(id: ConnectionId, created_at: OffsetDateTime) -> Self {
		Self {
			id,
			provider: None,
			status: ConnectionStatus::Unauthorized,
			is_active: false,
			access_token: None,
			refresh_token: None,
			access_token_expires_at: None,
			refresh_token_expires_at: None,
			last_refresh_at: None,
			created_at,
			updated_at: created_at,
			revoked_at: None,
		}
	}

	/// Tags the connection with the provider that owns its grant.
	pub fn with_provider(mut self, provider: ProviderId) -> Self {
		self.provider = Some(provider);

		self
	}

	/// Installs a token set and marks the connection active.
	pub fn activate(
		&mut self,
		access_token: TokenSecret,
		refresh_token: Option<TokenSecret>,
		access_token_expires_at: OffsetDateTime,
		refresh_token_expires_at: OffsetDateTime,
		at: OffsetDateTime,
	) {
		self.access_token = Some(access_token);
		self.refresh_token = refresh_token;
		self.access_token_expires_at = Some(access_token_expires_at);
		self.refresh_token_expires_at = Some(refresh_token_expires_at);
		self.last_refresh_at = Some(at);
		self.status = ConnectionStatus::Active;
		self.is_active = true;
		self.revoked_at = None;
		self.updated_at = at;
	}

	/// Returns `true` when the connection may be used at all.
	pub fn is_usable(&self) -> bool {
		self.is_active && self.status != ConnectionStatus::Revoked
	}

	/// Returns `true` when the access token is missing, has no recorded expiry, or expires
	/// within `threshold` of `now`.
	pub fn needs_refresh(&self, now: OffsetDateTime, threshold: Duration) -> bool {
		match (&self.access_token, self.access_token_expires_at) {
			(Some(_), Some(expires_at)) => expires_at <= now + threshold,
			_ => true,
		}
	}

	/// Returns `true` when a refresh completed after `since`.
	pub fn refreshed_since(&self, since: OffsetDateTime) -> bool {
		self.last_refresh_at.is_some_and(|at| at > since)
	}

	/// Returns `true` when the refresh token's recorded lifetime has elapsed.
	pub fn refresh_token_expired(&self, now: OffsetDateTime) -> bool {
		self.refresh_token_expires_at.is_some_and(|at| at <= now)
	}

	/// Remaining access-token lifetime at `now`, if an expiry is recorded.
	pub fn access_ttl(&self, now: OffsetDateTime) -> Option<Duration> {
		self.access_token_expires_at.map(|at| at - now)
	}

	/// Applies a partial update in place.
	pub fn apply(&mut self, patch: &ConnectionPatch, at: OffsetDateTime) {
		if patch.clear_tokens {
			self.access_token = None;
			self.refresh_token = None;
			self.access_token_expires_at = None;
			self.refresh_token_expires_at = None;
		}
		if let Some(token) = &patch.access_token {
			self.access_token = Some(token.clone());
		}
		if let Some(token) = &patch.refresh_token {
			self.refresh_token = Some(token.clone());
		}
		if let Some(instant) = patch.access_token_expires_at {
			self.access_token_expires_at = Some(instant);
		}
		if let Some(instant) = patch.refresh_token_expires_at {
			self.refresh_token_expires_at = Some(instant);
		}
		if let Some(instant) = patch.last_refresh_at {
			self.last_refresh_at = Some(instant);
		}
		if let Some(status) = patch.status {
			self.status = status;
		}
		if let Some(active) = patch.is_active {
			self.is_active = active;
		}
		if let Some(instant) = patch.revoked_at {
			self.revoked_at = Some(instant);
		}

		self.updated_at = at;
	}
}
impl Debug for Connection {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("Connection")
			.field("id", &self.id)
			.field("provider", &self.provider)
			.field("status", &self.status)
			.field("is_active", &self.is_active)
			.field("access_token", &self.access_token.as_ref().map(|_| "<redacted>"))
			.field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
			.field("access_token_expires_at", &self.access_token_expires_at)
			.field("refresh_token_expires_at", &self.refresh_token_expires_at)
			.field("last_refresh_at", &self.last_refresh_at)
			.field("updated_at", &self.updated_at)
			.field("revoked_at", &self.revoked_at)
			.finish()
	}
}

/// Partial update applied atomically by a [`ConnectionStore`](crate::store::ConnectionStore).
///
/// Unset fields are left untouched.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct ConnectionPatch {
	/// Replacement access token.
	pub access_token: Option<TokenSecret>,
	/// Replacement refresh token.
	pub refresh_token: Option<TokenSecret>,
	/// Replacement access-token expiry.
	pub access_token_expires_at: Option<OffsetDateTime>,
	/// Replacement refresh-token expiry.
	pub refresh_token_expires_at: Option<OffsetDateTime>,
	/// Replacement last-refresh instant.
	pub last_refresh_at: Option<OffsetDateTime>,
	/// Replacement status.
	pub status: Option<ConnectionStatus>,
	/// Replacement active flag.
	pub is_active: Option<bool>,
	/// Replacement revocation instant.
	pub revoked_at: Option<OffsetDateTime>,
	/// Drops every token and expiry before the other fields apply.
	pub clear_tokens: bool,
}
impl ConnectionPatch {
	/// Builds the patch persisted after a successful exchange or refresh.
	///
	/// A missing refresh token in `tokens` keeps the stored one, but its expiry window still
	/// restarts at `issued_at`.
	pub fn rotation(
		tokens: &TokenSet,
		issued_at: OffsetDateTime,
		refresh_lifetime: Duration,
	) -> Self {
		Self {
			access_token: Some(tokens.access_token.clone()),
			refresh_token: tokens.refresh_token.clone(),
			access_token_expires_at: Some(tokens.access_expires_at(issued_at)),
			refresh_token_expires_at: Some(
				issued_at + tokens.refresh_expires_in.unwrap_or(refresh_lifetime),
			),
			last_refresh_at: Some(issued_at),
			status: Some(ConnectionStatus::Active),
			is_active: Some(true),
			..Default::default()
		}
	}

	/// Patch that only changes the status.
	pub fn status(status: ConnectionStatus) -> Self {
		Self { status: Some(status), ..Default::default() }
	}

	/// Patch that revokes the connection and forgets its tokens.
	pub fn revocation(at: OffsetDateTime) -> Self {
		Self {
			status: Some(ConnectionStatus::Revoked),
			is_active: Some(false),
			revoked_at: Some(at),
			clear_tokens: true,
			..Default::default()
		}
	}
}
impl Debug for ConnectionPatch {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("ConnectionPatch")
			.field("access_token", &self.access_token.as_ref().map(|_| "<redacted>"))
			.field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
			.field("access_token_expires_at", &self.access_token_expires_at)
			.field("refresh_token_expires_at", &self.refresh_token_expires_at)
			.field("last_refresh_at", &self.last_refresh_at)
			.field("status", &self.status)
			.field("is_active", &self.is_active)
			.field("revoked_at", &self.revoked_at)
			.field("clear_tokens", &self.clear_tokens)
			.finish()
	}
}

#[cfg(test)]
mod tests {
	// crates.io
	use time::macros;
	// self
	use super::*;

	fn connection() -> Connection {
		let id = ConnectionId::new("conn-1").expect("Connection fixture should be valid.");
		let mut connection = Connection::new(id, macros::datetime!(2025-01-01 00:00 UTC));

		connection.activate(
			TokenSecret::new("access"),
			Some(TokenSecret::new("refresh")),
			macros::datetime!(2025-01-01 00:30 UTC),
			macros::datetime!(2025-03-01 00:00 UTC),
			macros::datetime!(2025-01-01 00:00 UTC),
		);

		connection
	}

	#[test]
	fn refresh_need_honors_threshold() {
		let connection = connection();
		let threshold = Duration::seconds(540);

		assert!(!connection.needs_refresh(macros::datetime!(2025-01-01 00:20 UTC), threshold));
		assert!(connection.needs_refresh(macros::datetime!(2025-01-01 00:21 UTC), threshold));
		assert!(connection.needs_refresh(macros::datetime!(2025-01-01 00:31 UTC), threshold));

		let mut missing_expiry = connection.clone();

		missing_expiry.access_token_expires_at = None;

		assert!(missing_expiry.needs_refresh(macros::datetime!(2025-01-01 00:00 UTC), threshold));
	}

	#[test]
	fn rotation_patch_keeps_previous_refresh_when_not_rotated() {
		let mut connection = connection();
		let issued = macros::datetime!(2025-01-01 00:25 UTC);
		let tokens = TokenSet::access_only("access-2", Duration::minutes(30));

		connection.apply(&ConnectionPatch::rotation(&tokens, issued, Duration::days(60)), issued);

		assert_eq!(connection.access_token.as_ref().map(TokenSecret::expose), Some("access-2"));
		assert_eq!(connection.refresh_token.as_ref().map(TokenSecret::expose), Some("refresh"));
		assert_eq!(connection.access_token_expires_at, Some(macros::datetime!(2025-01-01 00:55 UTC)));
		assert_eq!(connection.refresh_token_expires_at, Some(issued + Duration::days(60)));
		assert_eq!(connection.last_refresh_at, Some(issued));
		assert!(connection.refreshed_since(macros::datetime!(2025-01-01 00:10 UTC)));
	}

	#[test]
	fn revocation_clears_tokens_and_deactivates() {
		let mut connection = connection();
		let at = macros::datetime!(2025-01-01 00:05 UTC);

		connection.apply(&ConnectionPatch::revocation(at), at);

		assert_eq!(connection.status, ConnectionStatus::Revoked);
		assert!(!connection.is_usable());
		assert!(connection.access_token.is_none());
		assert!(connection.refresh_token.is_none());
		assert_eq!(connection.revoked_at, Some(at));
	}

	#[test]
	fn status_transitions_follow_lifecycle() {
		use ConnectionStatus::*;

		assert!(Unauthorized.can_transition_to(Active));
		assert!(Active.can_transition_to(RefreshPending));
		assert!(RefreshPending.can_transition_to(Stale));
		assert!(Stale.can_transition_to(RefreshPending));
		assert!(RefreshPending.can_transition_to(Revoked));
		assert!(Revoked.can_transition_to(Active));
		assert!(!Revoked.can_transition_to(RefreshPending));
		assert!(!Unauthorized.can_transition_to(Stale));
	}

	#[test]
	fn debug_output_redacts_tokens() {
		let rendered = format!("{:?}", connection());

		assert!(!rendered.contains("\"access\""));
		assert!(!rendered.contains("\"refresh\""));
		assert!(rendered.contains("<redacted>"));
	}
}
