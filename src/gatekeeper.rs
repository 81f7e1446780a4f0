//! Facade running every outbound call through token validation, quota gating, and tracking.

// self
use crate::{
	_prelude::*,
	auth::{ConnectionId, TokenSecret},
	backpressure::BackpressureController,
	cache::{DistributedLock, SharedCache},
	config::GatekeeperConfig,
	deadline::Deadline,
	endpoint::TokenEndpoint,
	lifecycle::TokenManager,
	obs::{self, OpKind, OpOutcome, OpSpan},
	ratelimit::{RateLimitHeaders, RateLimitTracker},
	store::{ConnectionStore, RateLimitStore},
};

/// Value produced by a gated call together with the quota headers the provider returned.
#[derive(Clone, Debug)]
pub struct ApiResponse<T> {
	/// Caller-defined payload.
	pub value: T,
	/// Rate-limit headers observed on the response.
	pub headers: RateLimitHeaders,
}
impl<T> ApiResponse<T> {
	/// Pairs a payload with its response headers.
	pub fn new(value: T, headers: RateLimitHeaders) -> Self {
		Self { value, headers }
	}

	/// Payload from a response that carried no rate-limit headers.
	pub fn without_headers(value: T) -> Self {
		Self { value, headers: RateLimitHeaders::default() }
	}
}

/// Entry point for outbound API calls made on behalf of a connection.
///
/// ```text
/// ensure_valid -> check (backpressure on exhaustion) -> caller's request -> track
/// ```
#[derive(Clone, Debug)]
pub struct Gatekeeper {
	tokens: TokenManager,
	backpressure: BackpressureController,
}
impl Gatekeeper {
	/// Builds every component over one store and one cache/lock backend.
	pub fn new<S, C>(
		store: Arc<S>,
		cache: Arc<C>,
		endpoint: Arc<dyn TokenEndpoint>,
		config: GatekeeperConfig,
	) -> Self
	where
		S: 'static + ConnectionStore + RateLimitStore,
		C: 'static + SharedCache + DistributedLock,
	{
		let policy = config.backpressure_policy();
		let config = Arc::new(config);
		let tokens = TokenManager::new(store.clone(), cache.clone(), endpoint, config.clone());
		let tracker = RateLimitTracker::new(store, cache, config);

		Self { tokens, backpressure: BackpressureController::new(tracker, policy) }
	}

	/// Assembles a gatekeeper from separately configured components.
	pub fn from_parts(tokens: TokenManager, backpressure: BackpressureController) -> Self {
		Self { tokens, backpressure }
	}

	/// Token lifecycle manager.
	pub fn tokens(&self) -> &TokenManager {
		&self.tokens
	}

	/// Rate-limit tracker.
	pub fn tracker(&self) -> &RateLimitTracker {
		self.backpressure.tracker()
	}

	/// Backpressure controller.
	pub fn backpressure(&self) -> &BackpressureController {
		&self.backpressure
	}

	/// Runs `request` with a valid access token once the connection's quota allows it, then
	/// records the call against the quota.
	///
	/// Failing to record the call is logged; the request's value is still returned.
	pub async fn call<T, F, Fut>(
		&self,
		connection: &ConnectionId,
		deadline: &Deadline,
		request: F,
	) -> Result<T>
	where
		F: FnOnce(TokenSecret) -> Fut,
		Fut: Future<Output = Result<ApiResponse<T>>>,
	{
		const KIND: OpKind = OpKind::Call;

		let span = OpSpan::new(KIND, connection);
		let result = span
			.instrument(async move {
				let record = self.tokens.ensure_valid(connection, deadline).await?;

				self.backpressure.gate(connection, None, deadline).await?;
				deadline.check()?;

				let access = record.access_token.ok_or_else(|| Error::TokensMissing {
					connection: connection.clone(),
					missing: "access token",
				})?;
				let response = request(access).await?;

				if let Err(e) = self.tracker().track(connection, &response.headers).await {
					tracing::warn!(error = %e, "Failed to record the call against the rate limit.");
				}

				Ok(response.value)
			})
			.await;

		obs::record_op_outcome(KIND, OpOutcome::of(&result));

		result
	}
}
