//! Rate-limit reconciliation across persisted state, the shared snapshot, and live headers.

// self
use crate::{
	_prelude::*,
	auth::ConnectionId,
	cache::SharedCache,
	config::GatekeeperConfig,
	obs::{self, OpKind, OpOutcome, OpSpan},
	ratelimit::{
		LimitWindow, RateLimitHeaders, RateLimitState, TracingWarningSink, WarningSink,
	},
	store::RateLimitStore,
};

/// Successful [`RateLimitTracker::check`] result.
#[derive(Clone, Debug, PartialEq)]
pub struct RateLimitCheck {
	/// Reconciled counters.
	pub state: RateLimitState,
	/// Whether the call may go ahead.
	pub can_proceed: bool,
}

/// Maintains per-connection quota counters shared by every process talking to the provider.
///
/// The tracker owns no state of its own: counters live in the injected [`RateLimitStore`] and a
/// short-TTL snapshot in the injected [`SharedCache`].
#[derive(Clone)]
pub struct RateLimitTracker {
	store: Arc<dyn RateLimitStore>,
	cache: Arc<dyn SharedCache>,
	sink: Arc<dyn WarningSink>,
	config: Arc<GatekeeperConfig>,
}
impl RateLimitTracker {
	/// Creates a tracker that logs warnings through `tracing`.
	pub fn new(
		store: Arc<dyn RateLimitStore>,
		cache: Arc<dyn SharedCache>,
		config: Arc<GatekeeperConfig>,
	) -> Self {
		Self { store, cache, sink: Arc::new(TracingWarningSink), config }
	}

	/// Replaces the warning sink.
	pub fn with_warning_sink(mut self, sink: Arc<dyn WarningSink>) -> Self {
		self.sink = sink;

		self
	}

	/// Reconciles every source, persists and re-caches the result, and fails with
	/// [`Error::RateLimitExceeded`] when a window is exhausted (daily before minutely).
	pub async fn check(
		&self,
		connection: &ConnectionId,
		fresh: Option<&RateLimitHeaders>,
	) -> Result<RateLimitCheck> {
		let span = OpSpan::new(OpKind::RateLimitCheck, connection);
		let result = span
			.instrument(async move {
				let now = OffsetDateTime::now_utc();
				let mut state = self.reconciled(connection, now).await?;

				if let Some(headers) = fresh.filter(|headers| !headers.is_empty()) {
					let mut observed = state.clone();

					observed.observe(headers);
					state.merge(&observed);
				}

				state.last_checked_at = now;

				self.save(&state).await?;

				if let Some(exceeded) = state.exceeded(now) {
					tracing::debug!(
						kind = exceeded.kind.as_str(),
						reset_at = %exceeded.reset_at,
						"Rate limit window is exhausted."
					);

					return Err(exceeded.into());
				}

				Ok(RateLimitCheck { state, can_proceed: true })
			})
			.await;

		obs::record_op_outcome(OpKind::RateLimitCheck, OpOutcome::of(&result));

		result
	}

	/// Folds a completed call's headers in, counts the call, and notifies the warning sink.
	pub async fn track(
		&self,
		connection: &ConnectionId,
		headers: &RateLimitHeaders,
	) -> Result<RateLimitState> {
		let span = OpSpan::new(OpKind::RateLimitTrack, connection);
		let result = span
			.instrument(async move {
				let now = OffsetDateTime::now_utc();
				let mut state = self.reconciled(connection, now).await?;

				state.record_call(headers, now);

				self.save(&state).await?;

				for warning in self.config.warnings.evaluate(&state) {
					self.sink.on_warning(&warning);
				}

				Ok(state)
			})
			.await;

		obs::record_op_outcome(OpKind::RateLimitTrack, OpOutcome::of(&result));

		result
	}

	/// Optimistically refills one window after a backpressure wait.
	pub async fn reset_window(
		&self,
		connection: &ConnectionId,
		kind: LimitWindow,
	) -> Result<RateLimitState> {
		let now = OffsetDateTime::now_utc();
		let mut state = self.reconciled(connection, now).await?;

		state.window_mut(kind).refill();

		self.save(&state).await?;

		Ok(state)
	}

	/// Current reconciled counters, without persisting anything.
	pub async fn snapshot(&self, connection: &ConnectionId) -> Result<RateLimitState> {
		self.reconciled(connection, OffsetDateTime::now_utc()).await
	}

	async fn reconciled(
		&self,
		connection: &ConnectionId,
		now: OffsetDateTime,
	) -> Result<RateLimitState> {
		let mut state = self.store.load_rate_limit(connection).await?.unwrap_or_else(|| {
			RateLimitState::new(
				connection.clone(),
				self.config.default_daily_limit,
				self.config.default_minutely_limit,
				now,
			)
		});

		state.lazy_reset(now);

		if let Some(mut cached) = self.cached(connection).await {
			cached.lazy_reset(now);
			state.merge(&cached);
		}

		Ok(state)
	}

	// The snapshot is advisory; an unreachable cache or a corrupt entry is logged and skipped.
	async fn cached(&self, connection: &ConnectionId) -> Option<RateLimitState> {
		let key = cache_key(connection);
		let raw = match self.cache.get(&key).await {
			Ok(raw) => raw?,
			Err(e) => {
				tracing::warn!(error = %e, "Failed to read the rate-limit snapshot.");

				return None;
			},
		};

		match serde_json::from_str::<RateLimitState>(&raw) {
			Ok(state) if &state.connection == connection => Some(state),
			Ok(_) => None,
			Err(e) => {
				tracing::warn!(error = %e, "Ignoring a malformed rate-limit snapshot.");

				None
			},
		}
	}

	async fn save(&self, state: &RateLimitState) -> Result<()> {
		self.store.save_rate_limit(state.clone()).await?;

		let key = cache_key(&state.connection);

		match serde_json::to_string(state) {
			Ok(payload) =>
				if let Err(e) =
					self.cache.put(&key, payload, self.config.rate_limit_cache_ttl()).await
				{
					tracing::warn!(error = %e, "Failed to publish the rate-limit snapshot.");
				},
			Err(e) => tracing::warn!(error = %e, "Failed to encode the rate-limit snapshot."),
		}

		Ok(())
	}
}
impl Debug for RateLimitTracker {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("RateLimitTracker").field("config", &self.config).finish_non_exhaustive()
	}
}

fn cache_key(connection: &ConnectionId) -> String {
	format!("rate-limit:{connection}")
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::{
		cache::MemoryCache,
		ratelimit::{RateLimitWarning, WarningKind, WindowHeaders},
		store::MemoryStore,
	};

	#[derive(Default)]
	struct Recorder(Mutex<Vec<RateLimitWarning>>);
	impl WarningSink for Recorder {
		fn on_warning(&self, warning: &RateLimitWarning) {
			self.0.lock().push(warning.clone());
		}
	}

	fn id() -> ConnectionId {
		ConnectionId::new("conn-tracker").expect("Connection fixture should be valid.")
	}

	fn tracker() -> (RateLimitTracker, Arc<MemoryStore>, Arc<MemoryCache>) {
		let store = Arc::new(MemoryStore::default());
		let cache = Arc::new(MemoryCache::default());
		let tracker =
			RateLimitTracker::new(store.clone(), cache.clone(), Arc::new(GatekeeperConfig::default()));

		(tracker, store, cache)
	}

	fn minutely(limit: u32, remaining: u32) -> RateLimitHeaders {
		RateLimitHeaders {
			daily: WindowHeaders::default(),
			minutely: WindowHeaders {
				limit: Some(limit),
				remaining: Some(remaining),
				reset_at: None,
			},
		}
	}

	#[tokio::test]
	async fn cached_snapshot_with_fewer_calls_left_wins() {
		let (tracker, _, cache) = tracker();
		let id = id();
		let tracked =
			tracker.track(&id, &minutely(60, 10)).await.expect("Tracking should succeed.");

		assert_eq!(tracked.minutely.remaining, 10);

		let mut other_process = tracked.clone();

		other_process.minutely.remaining = 5;
		cache
			.put(
				&cache_key(&id),
				serde_json::to_string(&other_process).expect("Snapshot should serialize."),
				Duration::seconds(60),
			)
			.await
			.expect("Snapshot write should succeed.");

		let check = tracker.check(&id, None).await.expect("Quota is not exhausted.");

		assert!(check.can_proceed);
		assert_eq!(check.state.minutely.remaining, 5);
	}

	#[tokio::test]
	async fn exhausted_daily_window_fails_the_check() {
		let (tracker, store, _) = tracker();
		let id = id();
		let mut state = RateLimitState::new(id.clone(), 5000, 60, OffsetDateTime::now_utc());

		state.daily.remaining = 0;
		state.daily.reset_at = Some(OffsetDateTime::now_utc() + Duration::hours(5));
		store.save_rate_limit(state).await.expect("Seeding state should succeed.");

		let err = tracker.check(&id, None).await.expect_err("Daily exhaustion should fail.");

		assert!(matches!(
			err,
			Error::RateLimitExceeded(ref exceeded) if exceeded.kind == LimitWindow::Daily
		));
	}

	#[tokio::test]
	async fn fresh_headers_take_part_in_the_merge() {
		let (tracker, _, _) = tracker();
		let id = id();
		let err = tracker
			.check(&id, Some(&minutely(60, 0)))
			.await
			.expect_err("Headers reporting zero calls left should fail the check.");

		assert!(matches!(
			err,
			Error::RateLimitExceeded(ref exceeded) if exceeded.kind == LimitWindow::Minutely
		));
	}

	#[tokio::test]
	async fn first_check_adopts_the_reported_limit() {
		let (tracker, _, _) = tracker();
		let id = id();
		let headers = RateLimitHeaders {
			daily: WindowHeaders { limit: Some(10_000), remaining: Some(9_000), reset_at: None },
			minutely: WindowHeaders::default(),
		};
		let check = tracker.check(&id, Some(&headers)).await.expect("Quota is not exhausted.");

		assert_eq!(check.state.daily.limit, 10_000);
		assert_eq!(check.state.daily.remaining, 9_000);
		assert_eq!(check.state.minutely.limit, 60, "Silent windows keep the configured default.");
	}

	#[tokio::test]
	async fn tracking_emits_warnings_without_failing() {
		let (tracker, _, _) = tracker();
		let recorder = Arc::new(Recorder::default());
		let tracker = tracker.with_warning_sink(recorder.clone());
		let id = id();
		let headers = RateLimitHeaders {
			daily: WindowHeaders { limit: Some(1000), remaining: Some(80), reset_at: None },
			minutely: WindowHeaders { limit: Some(60), remaining: Some(3), reset_at: None },
		};
		let state = tracker.track(&id, &headers).await.expect("Tracking should succeed.");

		assert_eq!(state.total_calls_today, 1);

		let kinds = recorder.0.lock().iter().map(|w| w.kind).collect::<Vec<_>>();

		assert_eq!(kinds, vec![WarningKind::DailyUsageCritical, WarningKind::MinutelyRemainingLow]);
	}

	#[tokio::test]
	async fn reset_window_refills_store_and_cache() {
		let (tracker, store, _) = tracker();
		let id = id();

		tracker.track(&id, &minutely(60, 0)).await.expect("Tracking should succeed.");
		tracker.check(&id, None).await.expect_err("Minutely window should be exhausted.");

		let state = tracker
			.reset_window(&id, LimitWindow::Minutely)
			.await
			.expect("Reset should succeed.");

		assert_eq!(state.minutely.remaining, 60);
		assert_eq!(
			store
				.load_rate_limit(&id)
				.await
				.expect("Load should succeed.")
				.map(|s| s.minutely.remaining),
			Some(60)
		);
		assert!(tracker.check(&id, None).await.is_ok());
	}
}
