//! Turns an exhausted quota window into either a bounded wait or a propagated failure.

// crates.io
use tokio::time::Instant;
// self
use crate::{
	_prelude::*,
	auth::ConnectionId,
	deadline::{Deadline, SleepOutcome},
	obs::{self, OpKind, OpOutcome, OpSpan},
	ratelimit::{
		LimitWindow, RateLimitCheck, RateLimitExceeded, RateLimitHeaders, RateLimitTracker,
	},
};

const MINUTELY_BUFFER: Duration = Duration::seconds(1);

/// When waiting out an exhausted window is allowed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BackpressurePolicy {
	/// Wait for the per-minute window to refill instead of failing.
	pub wait_on_minutely: bool,
	/// Fail immediately when the per-day window is exhausted.
	pub throw_on_daily: bool,
	/// Longest wait ever performed, whatever the other flags say.
	pub max_wait: StdDuration,
	/// Longest uninterrupted sleep slice; cancellation is observed between slices.
	pub chunk: StdDuration,
}
impl Default for BackpressurePolicy {
	fn default() -> Self {
		Self {
			wait_on_minutely: true,
			throw_on_daily: true,
			max_wait: StdDuration::from_secs(65),
			chunk: StdDuration::from_secs(10),
		}
	}
}

/// Successful [`BackpressureController::resolve`] outcome.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Resolution {
	/// Window that was waited out.
	pub kind: LimitWindow,
	/// Time actually spent waiting.
	pub waited: StdDuration,
	/// Always `true`; a refusal is reported as an error instead.
	pub can_proceed: bool,
}

/// Applies a [`BackpressurePolicy`] to rate-limit checks.
#[derive(Clone)]
pub struct BackpressureController {
	tracker: RateLimitTracker,
	policy: BackpressurePolicy,
}
impl BackpressureController {
	/// Creates a controller over the tracker.
	pub fn new(tracker: RateLimitTracker, policy: BackpressurePolicy) -> Self {
		Self { tracker, policy }
	}

	/// Active policy.
	pub fn policy(&self) -> &BackpressurePolicy {
		&self.policy
	}

	/// Tracker the controller gates on.
	pub fn tracker(&self) -> &RateLimitTracker {
		&self.tracker
	}

	/// Waits out `exceeded` when the policy allows it, or returns it as an error.
	///
	/// - Daily: fails unless `throw_on_daily` is off and the reset is within `max_wait`.
	/// - Minutely: waits until one second past the reset, capped at `max_wait`, unless
	///   `wait_on_minutely` is off.
	///
	/// The wait runs in `chunk` slices; cancelling `deadline` returns [`Error::Cancelled`] and a
	/// wait that would overrun it returns the original exceeded error.
	pub async fn resolve(
		&self,
		exceeded: &RateLimitExceeded,
		deadline: &Deadline,
	) -> Result<Resolution> {
		const KIND: OpKind = OpKind::Backpressure;

		let span = OpSpan::new(KIND, &exceeded.connection);
		let result = span.instrument(self.resolve_inner(exceeded, deadline)).await;

		obs::record_op_outcome(KIND, OpOutcome::of(&result));

		result
	}

	/// Checks the connection's quota, waiting and re-checking exactly once if a window is
	/// exhausted.
	///
	/// After the wait the exhausted window is optimistically refilled. If the re-check still
	/// fails, the original [`RateLimitExceeded`] is returned.
	pub async fn gate(
		&self,
		connection: &ConnectionId,
		fresh: Option<&RateLimitHeaders>,
		deadline: &Deadline,
	) -> Result<RateLimitCheck> {
		let exceeded = match self.tracker.check(connection, fresh).await {
			Err(Error::RateLimitExceeded(exceeded)) => exceeded,
			other => return other,
		};

		self.resolve(&exceeded, deadline).await?;
		self.tracker.reset_window(connection, exceeded.kind).await?;

		match self.tracker.check(connection, None).await {
			Err(Error::RateLimitExceeded(again)) => {
				tracing::warn!(
					connection = %connection,
					kind = again.kind.as_str(),
					"Rate limit still exhausted after waiting."
				);

				Err(exceeded.into())
			},
			other => other,
		}
	}

	async fn resolve_inner(
		&self,
		exceeded: &RateLimitExceeded,
		deadline: &Deadline,
	) -> Result<Resolution> {
		let wait = self.wait_for(exceeded, OffsetDateTime::now_utc())?;

		tracing::info!(
			kind = exceeded.kind.as_str(),
			wait_ms = wait.as_millis() as u64,
			"Waiting for the rate limit window to reset."
		);

		let started = Instant::now();

		match deadline.sleep(wait, self.policy.chunk).await {
			SleepOutcome::Completed => {},
			SleepOutcome::Cancelled => return Err(Error::Cancelled),
			SleepOutcome::DeadlineReached => return Err(exceeded.clone().into()),
		}

		Ok(Resolution { kind: exceeded.kind, waited: started.elapsed(), can_proceed: true })
	}

	fn wait_for(&self, exceeded: &RateLimitExceeded, now: OffsetDateTime) -> Result<StdDuration> {
		let until_reset = to_std(exceeded.reset_at - now);

		match exceeded.kind {
			LimitWindow::Daily => {
				if self.policy.throw_on_daily || until_reset > self.policy.max_wait {
					return Err(exceeded.clone().into());
				}

				Ok(until_reset)
			},
			LimitWindow::Minutely => {
				if !self.policy.wait_on_minutely {
					return Err(exceeded.clone().into());
				}

				Ok((until_reset + to_std(MINUTELY_BUFFER)).min(self.policy.max_wait))
			},
		}
	}
}
impl Debug for BackpressureController {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("BackpressureController").field("policy", &self.policy).finish()
	}
}

#[cfg(test)]
mod tests {
	// crates.io
	use tokio_util::sync::CancellationToken;
	// self
	use super::*;
	use crate::{
		_preludet::*,
		config::GatekeeperConfig,
		ratelimit::RateLimitState,
		store::{MemoryStore, RateLimitStore},
	};

	fn controller(policy: BackpressurePolicy) -> (BackpressureController, Arc<MemoryStore>) {
		let (store, cache) = shared_backends();
		let tracker =
			RateLimitTracker::new(store.clone(), cache, Arc::new(GatekeeperConfig::default()));

		(BackpressureController::new(tracker, policy), store)
	}

	fn exceeded(kind: LimitWindow, in_: Duration) -> RateLimitExceeded {
		RateLimitExceeded {
			connection: connection_id("conn-bp"),
			kind,
			reset_at: OffsetDateTime::now_utc() + in_,
		}
	}

	#[tokio::test(start_paused = true)]
	async fn minutely_wait_covers_reset_plus_buffer() {
		let (controller, _) = controller(BackpressurePolicy::default());
		let resolution = controller
			.resolve(&exceeded(LimitWindow::Minutely, Duration::seconds(5)), &Deadline::none())
			.await
			.expect("Minutely exhaustion should be waited out.");

		assert!(resolution.can_proceed);
		assert!(resolution.waited > StdDuration::from_secs(5));
		assert!(resolution.waited <= StdDuration::from_secs(6));
	}

	#[tokio::test(start_paused = true)]
	async fn minutely_wait_is_capped() {
		let policy = BackpressurePolicy { max_wait: StdDuration::from_secs(3), ..Default::default() };
		let (controller, _) = controller(policy);
		let resolution = controller
			.resolve(&exceeded(LimitWindow::Minutely, Duration::seconds(50)), &Deadline::none())
			.await
			.expect("Capped wait should still succeed.");

		assert_eq!(resolution.waited, StdDuration::from_secs(3));
	}

	#[tokio::test(start_paused = true)]
	async fn daily_exhaustion_fails_without_waiting_by_default() {
		let (controller, _) = controller(BackpressurePolicy::default());
		let started = Instant::now();
		let err = controller
			.resolve(&exceeded(LimitWindow::Daily, Duration::seconds(5)), &Deadline::none())
			.await
			.expect_err("Daily exhaustion should fail by default.");

		assert!(matches!(
			err,
			Error::RateLimitExceeded(RateLimitExceeded { kind: LimitWindow::Daily, .. })
		));
		assert_eq!(started.elapsed(), StdDuration::ZERO);
	}

	#[tokio::test(start_paused = true)]
	async fn daily_wait_beyond_ceiling_still_fails() {
		let policy = BackpressurePolicy { throw_on_daily: false, ..Default::default() };
		let (controller, _) = controller(policy);

		assert!(
			controller
				.resolve(&exceeded(LimitWindow::Daily, Duration::hours(2)), &Deadline::none())
				.await
				.is_err(),
			"A wait longer than max_wait must never be attempted."
		);

		let resolution = controller
			.resolve(&exceeded(LimitWindow::Daily, Duration::seconds(20)), &Deadline::none())
			.await
			.expect("A short daily wait is allowed once throwing is disabled.");

		assert!(resolution.waited <= StdDuration::from_secs(20));
	}

	#[tokio::test(start_paused = true)]
	async fn disabled_minutely_wait_fails_fast() {
		let policy = BackpressurePolicy { wait_on_minutely: false, ..Default::default() };
		let (controller, _) = controller(policy);

		assert!(
			controller
				.resolve(&exceeded(LimitWindow::Minutely, Duration::seconds(5)), &Deadline::none())
				.await
				.is_err()
		);
	}

	#[tokio::test(start_paused = true)]
	async fn cancellation_interrupts_wait() {
		let (controller, _) = controller(BackpressurePolicy::default());
		let token = CancellationToken::new();
		let deadline = Deadline::none().with_cancellation(token.clone());
		let canceller = tokio::spawn(async move {
			tokio::time::sleep(StdDuration::from_secs(12)).await;
			token.cancel();
		});
		let started = Instant::now();
		let err = controller
			.resolve(&exceeded(LimitWindow::Minutely, Duration::seconds(40)), &deadline)
			.await
			.expect_err("Cancelled waits should fail.");

		canceller.await.expect("Canceller task should finish.");

		assert!(matches!(err, Error::Cancelled));
		assert!(started.elapsed() < StdDuration::from_secs(20));
	}

	#[tokio::test(start_paused = true)]
	async fn gate_waits_then_rechecks_once() {
		let (controller, store) = controller(BackpressurePolicy::default());
		let id = connection_id("conn-bp");
		let mut state = RateLimitState::new(id.clone(), 5000, 60, OffsetDateTime::now_utc());

		state.minutely.remaining = 0;
		state.minutely.reset_at = Some(OffsetDateTime::now_utc() + Duration::minutes(10));
		store.save_rate_limit(state).await.expect("Saving the fixture state should succeed.");

		let check = controller
			.gate(&id, None, &Deadline::none())
			.await
			.expect("The refilled window should allow the call.");

		assert!(check.can_proceed);
		assert_eq!(check.state.minutely.remaining, 60);
	}

	#[tokio::test(start_paused = true)]
	async fn gate_returns_the_original_error_when_still_exhausted() {
		let (controller, store) = controller(BackpressurePolicy::default());
		let id = connection_id("conn-bp");
		let now = OffsetDateTime::now_utc();
		let mut state = RateLimitState::new(id.clone(), 5000, 60, now);

		state.minutely.remaining = 0;
		state.minutely.reset_at = Some(now + Duration::minutes(10));
		store.save_rate_limit(state.clone()).await.expect("Saving the fixture state should succeed.");

		// Another process burns the daily quota while this one waits.
		let other_process = {
			let store = store.clone();
			let mut state = state;

			state.daily.remaining = 0;
			state.daily.reset_at = Some(now + Duration::hours(3));

			tokio::spawn(async move {
				tokio::time::sleep(StdDuration::from_secs(30)).await;
				store.save_rate_limit(state).await.expect("Saving the daily exhaustion should succeed.");
			})
		};
		let started = Instant::now();
		let err = controller
			.gate(&id, None, &Deadline::none())
			.await
			.expect_err("The re-check should still find an exhausted window.");

		other_process.await.expect("Writer task should finish.");

		assert!(matches!(
			err,
			Error::RateLimitExceeded(RateLimitExceeded { kind: LimitWindow::Minutely, reset_at, .. })
				if reset_at == now + Duration::minutes(10)
		));
		assert_eq!(started.elapsed(), StdDuration::from_secs(65), "Only one capped wait happens.");
	}
}
