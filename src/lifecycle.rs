//! Token lifecycle: refresh-need detection, lock-guarded rotation with retries, and
//! cross-process waiting.
//!
//! [`TokenManager::ensure_valid`] is the entry point. Callers in one process coalesce on an
//! in-process guard; across processes the [`DistributedLock`] elects a single holder that calls
//! the token endpoint while everyone else polls the store for the rotated tokens. Refresh
//! tokens are single-use, so the holder always redeems the latest stored value and persists
//! the rotation with a compare-and-swap.

mod metrics;
mod retry;

pub use metrics::RefreshMetrics;
pub use retry::RetryPolicy;

// crates.io
use tokio::time::{self, Instant};
// self
use crate::{
	_prelude::*,
	auth::{
		self, AuthorizationSession, Connection, ConnectionId, ConnectionPatch, ConnectionStatus,
		TokenSecret, TokenSet,
	},
	cache::{DistributedLock, LockAttempt, LockHolder, LockKey},
	config::{GatekeeperConfig, LOCK_RELEASE_MARGIN},
	deadline::{Deadline, SleepOutcome},
	endpoint::{CodeExchange, TokenEndpoint},
	error::{ConfigError, TransientError},
	obs::{self, OpKind, OpOutcome, OpSpan},
	provider::ProviderDescriptor,
	store::{CompareAndSwapOutcome, ConnectionStore},
};

#[derive(Clone, Debug)]
struct AuthorizationClient {
	descriptor: ProviderDescriptor,
	client_id: String,
}

/// Keeps every connection's access token valid.
#[derive(Clone)]
pub struct TokenManager {
	store: Arc<dyn ConnectionStore>,
	lock: Arc<dyn DistributedLock>,
	endpoint: Arc<dyn TokenEndpoint>,
	config: Arc<GatekeeperConfig>,
	retry: RetryPolicy,
	metrics: Arc<RefreshMetrics>,
	authorization: Option<AuthorizationClient>,
	guards: Arc<Mutex<HashMap<ConnectionId, Arc<AsyncMutex<()>>>>>,
}
impl TokenManager {
	/// Creates a manager over the injected collaborators.
	pub fn new(
		store: Arc<dyn ConnectionStore>,
		lock: Arc<dyn DistributedLock>,
		endpoint: Arc<dyn TokenEndpoint>,
		config: Arc<GatekeeperConfig>,
	) -> Self {
		Self {
			store,
			lock,
			endpoint,
			retry: config.retry_policy(),
			config,
			metrics: Default::default(),
			authorization: None,
			guards: Default::default(),
		}
	}

	/// Enables [`TokenManager::start_authorization`] for the provider.
	pub fn with_authorization(
		mut self,
		descriptor: ProviderDescriptor,
		client_id: impl Into<String>,
	) -> Self {
		self.authorization = Some(AuthorizationClient { descriptor, client_id: client_id.into() });

		self
	}

	/// Refresh counters shared by every clone of this manager.
	pub fn metrics(&self) -> &RefreshMetrics {
		&self.metrics
	}

	/// Returns the connection with an access token valid beyond the proactive threshold,
	/// refreshing it first when needed.
	///
	/// A token outside the threshold returns without touching the network or the lock.
	pub async fn ensure_valid(&self, id: &ConnectionId, deadline: &Deadline) -> Result<Connection> {
		const KIND: OpKind = OpKind::EnsureValid;

		let span = OpSpan::new(KIND, id);
		let result = span.instrument(self.ensure_valid_inner(id, deadline)).await;

		obs::record_op_outcome(KIND, OpOutcome::of(&result));

		result
	}

	/// Starts an Authorization Code + PKCE grant for `id`, creating the connection when it does
	/// not exist yet.
	pub async fn start_authorization(
		&self,
		id: &ConnectionId,
		scopes: Vec<String>,
		redirect_uri: Url,
	) -> Result<AuthorizationSession> {
		let client = self.authorization.as_ref().ok_or(ConfigError::InvalidValue {
			field: "authorization",
			reason: "no provider descriptor is configured",
		})?;

		if self.store.read(id).await?.is_none() {
			let connection = Connection::new(id.clone(), OffsetDateTime::now_utc())
				.with_provider(client.descriptor.id.clone());

			self.store.insert(connection).await?;
		}

		Ok(auth::session::build_session(
			&client.descriptor,
			&client.client_id,
			id.clone(),
			scopes,
			redirect_uri,
		))
	}

	/// Validates the redirect `state`, exchanges the code, and activates the connection.
	pub async fn complete_authorization(
		&self,
		session: &AuthorizationSession,
		returned_state: &str,
		code: impl Into<String>,
	) -> Result<Connection> {
		const KIND: OpKind = OpKind::AuthorizationCode;

		let id = &session.connection;
		let span = OpSpan::new(KIND, id);
		let result = span
			.instrument(async move {
				session.validate_state(returned_state)?;

				let exchange = CodeExchange {
					code: code.into(),
					redirect_uri: session.redirect_uri.clone(),
					pkce_verifier: Some(session.pkce_verifier().to_owned()),
				};
				let tokens = self.endpoint.exchange_code(&exchange).await?;

				self.activate(id, &tokens).await
			})
			.await;

		obs::record_op_outcome(KIND, OpOutcome::of(&result));

		result
	}

	/// Installs a token set obtained out of band and marks the connection active.
	pub async fn activate(&self, id: &ConnectionId, tokens: &TokenSet) -> Result<Connection> {
		let now = OffsetDateTime::now_utc();
		let mut connection =
			self.store.read(id).await?.unwrap_or_else(|| Connection::new(id.clone(), now));

		connection.activate(
			tokens.access_token.clone(),
			tokens.refresh_token.clone(),
			tokens.access_expires_at(now),
			now + tokens.refresh_expires_in.unwrap_or_else(|| self.config.refresh_token_lifetime()),
			now,
		);
		self.store.insert(connection.clone()).await?;

		tracing::info!(connection = %id, "Connection activated.");

		self.check_lifetime(tokens)?;

		Ok(connection)
	}

	/// Revokes the connection and forgets its tokens. A new authorization is required before
	/// the connection can be used again.
	pub async fn revoke(&self, id: &ConnectionId) -> Result<Connection> {
		let connection = self
			.store
			.update_fields(id, ConnectionPatch::revocation(OffsetDateTime::now_utc()))
			.await?
			.ok_or_else(|| Error::ConnectionNotFound { connection: id.clone() })?;

		tracing::info!(connection = %id, "Connection revoked.");

		Ok(connection)
	}

	async fn ensure_valid_inner(&self, id: &ConnectionId, deadline: &Deadline) -> Result<Connection> {
		let started = OffsetDateTime::now_utc();
		let threshold = self.config.proactive_threshold();
		let connection = self.read(id).await?;

		ensure_usable(&connection)?;

		if !connection.needs_refresh(started, threshold) {
			return Ok(connection);
		}
		if connection.refresh_token.is_none() {
			return Err(Error::TokensMissing { connection: id.clone(), missing: "refresh token" });
		}

		let guard = self.guard(id);
		let _singleflight = guard.lock().await;
		// Another caller in this process may have finished while we queued.
		let connection = self.reread(id).await?;

		ensure_usable(&connection)?;

		if !connection.needs_refresh(OffsetDateTime::now_utc(), threshold) {
			return Ok(connection);
		}

		deadline.check()?;

		let key = LockKey::token_refresh(id);
		// Taken before the acquire so the holder's view of the TTL is never longer than the
		// backend's.
		let lock_until = Instant::now() + to_std(self.config.lock_ttl());

		match self.lock.acquire(&key, self.config.lock_ttl()).await? {
			LockAttempt::Acquired(holder) => {
				let result = self.refresh_locked(id, deadline, lock_until).await;

				self.release(&key, &holder).await;

				result
			},
			LockAttempt::Contended => self.wait_for_refresh(id, started, deadline).await,
		}
	}

	async fn refresh_locked(
		&self,
		id: &ConnectionId,
		deadline: &Deadline,
		lock_until: Instant,
	) -> Result<Connection> {
		let span = OpSpan::new(OpKind::Refresh, id);
		let result = span.instrument(self.refresh_with_retry(id, deadline, lock_until)).await;

		match &result {
			Ok(_) => self.metrics.record_success(),
			Err(_) => self.metrics.record_failure(),
		}

		obs::record_op_outcome(OpKind::Refresh, OpOutcome::of(&result));

		result
	}

	// Every endpoint call finishes, or is abandoned, while the lock is still held; a second
	// holder must never redeem the same single-use refresh token concurrently.
	async fn refresh_with_retry(
		&self,
		id: &ConnectionId,
		deadline: &Deadline,
		lock_until: Instant,
	) -> Result<Connection> {
		let threshold = self.config.proactive_threshold();
		let current = self.reread(id).await?;

		ensure_usable(&current)?;

		// The previous holder may have finished between our last read and the acquire.
		if !current.needs_refresh(OffsetDateTime::now_utc(), threshold) {
			return Ok(current);
		}
		if current.refresh_token_expired(OffsetDateTime::now_utc()) {
			return Err(self.invalidate(id, "refresh token expired".into()).await);
		}
		if current.status.can_transition_to(ConnectionStatus::RefreshPending) {
			self.store
				.update_fields(id, ConnectionPatch::status(ConnectionStatus::RefreshPending))
				.await?;
		}

		let max_attempts = self.retry.max_attempts();
		let mut attempts = 0;
		let mut last_error = None;

		while attempts < max_attempts {
			if let Err(e) = deadline.check() {
				self.mark(id, ConnectionStatus::Stale).await;

				return Err(e);
			}

			// Always redeem the latest stored refresh token; a superseded one is never reused.
			let latest = self.reread(id).await?;

			if !latest.needs_refresh(OffsetDateTime::now_utc(), threshold) {
				return Ok(latest);
			}

			let refresh_token = latest.refresh_token.clone().ok_or_else(|| {
				Error::TokensMissing { connection: id.clone(), missing: "refresh token" }
			})?;

			let timeout = self.attempt_timeout(deadline, lock_until);

			if timeout.is_zero() {
				tracing::warn!(connection = %id, attempts, "No time left on the refresh lock for another attempt.");

				break;
			}

			attempts += 1;
			self.metrics.record_attempt();

			let outcome = tokio::select! {
				biased;
				_ = deadline.cancelled() => {
					self.mark(id, ConnectionStatus::Stale).await;

					return Err(Error::Cancelled);
				},
				outcome = self.endpoint.refresh(&refresh_token) => outcome,
				_ = time::sleep(timeout) => Err(TransientError::Timeout {
					timeout: Duration::try_from(timeout).unwrap_or(Duration::MAX),
				}
				.into()),
			};
			let error = match outcome {
				Ok(tokens) => return self.persist_rotation(id, &refresh_token, &tokens).await,
				Err(e) if e.is_invalid_grant() =>
					return Err(self.invalidate(id, e.to_string()).await),
				Err(e) if !e.is_retryable() => {
					tracing::warn!(connection = %id, error = %e, "Token refresh failed permanently.");
					self.mark(id, ConnectionStatus::Stale).await;

					return Err(e);
				},
				Err(e) => e,
			};

			tracing::debug!(connection = %id, attempt = attempts, error = %error, "Token refresh attempt failed.");

			let retry_after = match &error {
				Error::Transient(transient) => transient.retry_after(),
				_ => None,
			};

			last_error =
				Some(Error::TokenRefreshFailed { connection: id.clone(), source: Box::new(error) });

			if attempts == max_attempts {
				break;
			}

			let delay = self.retry.delay_after(attempts, retry_after);
			let lock_left = lock_until.saturating_duration_since(Instant::now());

			if delay + self.config.refresh_attempt_timeout() + LOCK_RELEASE_MARGIN > lock_left {
				tracing::warn!(
					connection = %id,
					attempts,
					delay = ?delay,
					"Refresh lock would expire before the next attempt; giving up."
				);

				break;
			}

			match deadline.sleep(delay, delay).await {
				SleepOutcome::Completed => {},
				SleepOutcome::Cancelled => {
					self.mark(id, ConnectionStatus::Stale).await;

					return Err(Error::Cancelled);
				},
				SleepOutcome::DeadlineReached => break,
			}
		}

		self.mark(id, ConnectionStatus::Stale).await;

		tracing::warn!(connection = %id, attempts, "Token refresh retries exhausted.");

		Err(Error::TokenRefreshExhausted {
			connection: id.clone(),
			attempts,
			source: Box::new(last_error.unwrap_or(Error::Cancelled)),
		})
	}

	async fn persist_rotation(
		&self,
		id: &ConnectionId,
		redeemed: &TokenSecret,
		tokens: &TokenSet,
	) -> Result<Connection> {
		let issued_at = OffsetDateTime::now_utc();
		let patch =
			ConnectionPatch::rotation(tokens, issued_at, self.config.refresh_token_lifetime());

		match self.store.compare_and_swap_tokens(id, Some(redeemed.expose()), patch).await? {
			CompareAndSwapOutcome::Updated => {
				tracing::info!(connection = %id, "Tokens rotated.");
			},
			CompareAndSwapOutcome::RefreshMismatch => {
				tracing::warn!(
					connection = %id,
					"Refresh token changed while rotating; keeping the stored tokens."
				);

				return self.accept_stored(id).await;
			},
			CompareAndSwapOutcome::Missing =>
				return Err(Error::ConnectionNotFound { connection: id.clone() }),
		}

		let updated = self.reread(id).await?;

		self.check_lifetime(tokens)?;

		Ok(updated)
	}

	// The rotation we redeemed lost the compare-and-swap; only a stored record that is usable
	// and fresh may be handed back.
	async fn accept_stored(&self, id: &ConnectionId) -> Result<Connection> {
		let stored = self.reread(id).await?;

		if stored.status == ConnectionStatus::Revoked {
			return Err(Error::RefreshTokenInvalid {
				connection: id.clone(),
				reason: "connection was revoked during the refresh".into(),
			});
		}

		ensure_usable(&stored)?;

		if stored.needs_refresh(OffsetDateTime::now_utc(), self.config.proactive_threshold()) {
			return Err(Error::RotationConflict { connection: id.clone() });
		}

		Ok(stored)
	}

	// Bounded by the configured ceiling, the caller's deadline, and the lock's remaining TTL.
	fn attempt_timeout(&self, deadline: &Deadline, lock_until: Instant) -> StdDuration {
		let lock_left =
			lock_until.saturating_duration_since(Instant::now()).saturating_sub(LOCK_RELEASE_MARGIN);
		let timeout = self.config.refresh_attempt_timeout().min(lock_left);

		deadline.remaining().map_or(timeout, |left| timeout.min(left))
	}

	async fn wait_for_refresh(
		&self,
		id: &ConnectionId,
		started: OffsetDateTime,
		deadline: &Deadline,
	) -> Result<Connection> {
		self.metrics.record_wait();

		tracing::debug!(connection = %id, "Refresh lock is held elsewhere; waiting for rotation.");

		let poll = self.config.lock_poll_interval();
		let begun = Instant::now();
		let until = begun + to_std(self.config.lock_timeout());

		loop {
			if let Some(connection) = self.poll_refreshed(id, started).await? {
				return Ok(connection);
			}

			let left = until.saturating_duration_since(Instant::now());

			if left.is_zero() {
				break;
			}

			let step = poll.min(left);

			match deadline.sleep(step, step).await {
				SleepOutcome::Completed => {},
				SleepOutcome::Cancelled => return Err(Error::Cancelled),
				SleepOutcome::DeadlineReached => break,
			}
		}

		// The holder may have finished just after the last poll.
		if let Some(connection) = self.poll_refreshed(id, started).await? {
			return Ok(connection);
		}

		let waited = Duration::try_from(begun.elapsed()).unwrap_or(Duration::MAX);

		tracing::warn!(connection = %id, waited = %waited, "Timed out waiting for the refresh lock holder.");

		Err(Error::LockAcquisitionTimeout { connection: id.clone(), waited })
	}

	async fn poll_refreshed(
		&self,
		id: &ConnectionId,
		started: OffsetDateTime,
	) -> Result<Option<Connection>> {
		let connection = self.reread(id).await?;

		if connection.status == ConnectionStatus::Revoked {
			return Err(Error::RefreshTokenInvalid {
				connection: id.clone(),
				reason: "connection was revoked while waiting for the refresh".into(),
			});
		}

		let now = OffsetDateTime::now_utc();
		let threshold = self.config.proactive_threshold();

		if !connection.needs_refresh(now, threshold) {
			return Ok(Some(connection));
		}
		if connection.refreshed_since(started) {
			return Err(ConfigError::TokenLifetimeBelowThreshold {
				lifetime: connection.access_ttl(now).unwrap_or(Duration::ZERO),
				threshold,
			}
			.into());
		}

		Ok(None)
	}

	// Revokes the connection and returns the error to surface.
	async fn invalidate(&self, id: &ConnectionId, reason: String) -> Error {
		tracing::warn!(connection = %id, reason = %reason, "Refresh token rejected; connection requires re-authorization.");

		if let Err(e) =
			self.store.update_fields(id, ConnectionPatch::revocation(OffsetDateTime::now_utc())).await
		{
			tracing::error!(connection = %id, error = %e, "Failed to revoke the connection.");
		}

		Error::RefreshTokenInvalid { connection: id.clone(), reason }
	}

	async fn mark(&self, id: &ConnectionId, status: ConnectionStatus) {
		if let Err(e) = self.store.update_fields(id, ConnectionPatch::status(status)).await {
			tracing::error!(connection = %id, status = status.as_str(), error = %e, "Failed to update connection status.");
		}
	}

	async fn release(&self, key: &LockKey, holder: &LockHolder) {
		match self.lock.release(key, holder).await {
			Ok(true) => {},
			Ok(false) => tracing::warn!(key = %key, "Refresh lock expired before it was released."),
			Err(e) => tracing::error!(key = %key, error = %e, "Failed to release the refresh lock."),
		}
	}

	fn check_lifetime(&self, tokens: &TokenSet) -> Result<()> {
		let threshold = self.config.proactive_threshold();

		if tokens.expires_in <= threshold {
			return Err(ConfigError::TokenLifetimeBelowThreshold {
				lifetime: tokens.expires_in,
				threshold,
			}
			.into());
		}

		Ok(())
	}

	async fn read(&self, id: &ConnectionId) -> Result<Connection> {
		self.store
			.read(id)
			.await?
			.ok_or_else(|| Error::ConnectionNotFound { connection: id.clone() })
	}

	async fn reread(&self, id: &ConnectionId) -> Result<Connection> {
		self.store
			.refresh(id)
			.await?
			.ok_or_else(|| Error::ConnectionNotFound { connection: id.clone() })
	}

	fn guard(&self, id: &ConnectionId) -> Arc<AsyncMutex<()>> {
		let mut guards = self.guards.lock();

		guards.entry(id.clone()).or_insert_with(|| Arc::new(AsyncMutex::new(()))).clone()
	}
}
impl Debug for TokenManager {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("TokenManager")
			.field("retry", &self.retry)
			.field("metrics", &self.metrics)
			.field("authorization", &self.authorization.as_ref().map(|a| &a.descriptor.id))
			.finish_non_exhaustive()
	}
}

fn ensure_usable(connection: &Connection) -> Result<()> {
	if connection.is_usable() {
		Ok(())
	} else {
		Err(Error::ConnectionInactive { connection: connection.id.clone() })
	}
}
