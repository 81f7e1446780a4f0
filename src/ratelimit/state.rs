//! Quota windows, per-connection counters, and the exceeded condition.

// self
use crate::{_prelude::*, auth::ConnectionId, ratelimit::RateLimitHeaders};

/// Provider quota window.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitWindow {
	/// Per-day quota; exhaustion is not worth waiting for by default.
	Daily,
	/// Per-minute quota.
	Minutely,
}
impl LimitWindow {
	/// Stable label for logs and metrics.
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Daily => "daily",
			Self::Minutely => "minutely",
		}
	}

	/// Period assumed for the window when the provider has not reported a reset instant.
	pub fn nominal_period(self) -> Duration {
		match self {
			Self::Daily => Duration::days(1),
			Self::Minutely => Duration::minutes(1),
		}
	}
}
impl Display for LimitWindow {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Counters for one quota window.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaWindow {
	/// Calls allowed per window.
	pub limit: u32,
	/// Calls left in the current window; never above `limit`.
	pub remaining: u32,
	/// Instant the window refills; `None` until observed or inferred.
	pub reset_at: Option<OffsetDateTime>,
	/// `limit` came from provider headers rather than configuration.
	#[serde(default)]
	pub limit_reported: bool,
}
impl QuotaWindow {
	/// A full window with no known reset instant.
	pub fn full(limit: u32) -> Self {
		Self { limit, remaining: limit, reset_at: None, limit_reported: false }
	}

	/// Returns `true` when the window has refilled by `now`.
	pub fn has_reset(&self, now: OffsetDateTime) -> bool {
		self.reset_at.is_some_and(|at| at <= now)
	}

	/// Refills the window if its reset instant passed. Returns `true` when it did.
	pub fn lazy_reset(&mut self, now: OffsetDateTime) -> bool {
		if !self.has_reset(now) {
			return false;
		}

		self.refill();

		true
	}

	/// Restores the full limit and forgets the reset instant.
	pub fn refill(&mut self) {
		self.remaining = self.limit;
		self.reset_at = None;
	}

	/// Keeps whichever side has fewer calls left; the winner's reset instant comes along.
	///
	/// A provider-reported limit outranks a configured one, and a window that was only assumed and
	/// never used yields to the reported side entirely.
	pub fn merge(&mut self, other: &Self) {
		match (self.limit_reported, other.limit_reported) {
			(false, true) => {
				if self.is_untouched() {
					*self = *other;

					return;
				}

				self.limit = other.limit;
				self.limit_reported = true;
			},
			(true, false) =>
				if other.is_untouched() {
					return;
				},
			_ => self.limit = self.limit.min(other.limit),
		}

		if other.remaining < self.remaining
			|| (other.remaining == self.remaining && later(other.reset_at, self.reset_at))
		{
			self.remaining = other.remaining;
			self.reset_at = other.reset_at;
		}

		self.clamp();
	}

	/// Share of the window already used, in percent.
	pub fn usage_percent(&self) -> f64 {
		if self.limit == 0 {
			return 100.0;
		}

		f64::from(self.limit - self.remaining.min(self.limit)) * 100.0 / f64::from(self.limit)
	}

	/// Instant the exhausted window refills, or `None` when calls are still allowed.
	///
	/// An unknown reset instant is assumed to be one `period` away.
	pub fn exhausted_until(&self, now: OffsetDateTime, period: Duration) -> Option<OffsetDateTime> {
		if self.remaining > 0 || self.has_reset(now) {
			return None;
		}

		Some(self.reset_at.unwrap_or(now + period))
	}

	fn is_untouched(&self) -> bool {
		self.remaining == self.limit && self.reset_at.is_none()
	}

	fn clamp(&mut self) {
		self.remaining = self.remaining.min(self.limit);
	}
}

fn later(candidate: Option<OffsetDateTime>, current: Option<OffsetDateTime>) -> bool {
	match (candidate, current) {
		(Some(candidate), Some(current)) => candidate > current,
		(Some(_), None) => true,
		_ => false,
	}
}

/// Per-connection rate-limit counters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RateLimitState {
	/// Connection the counters belong to.
	pub connection: ConnectionId,
	/// Per-day window.
	pub daily: QuotaWindow,
	/// Per-minute window.
	pub minutely: QuotaWindow,
	/// Instant of the last check or track.
	pub last_checked_at: OffsetDateTime,
	/// Calls observed since the last daily reset.
	pub total_calls_today: u64,
}
impl RateLimitState {
	/// Fresh state with both windows full.
	pub fn new(
		connection: ConnectionId,
		daily_limit: u32,
		minutely_limit: u32,
		now: OffsetDateTime,
	) -> Self {
		Self {
			connection,
			daily: QuotaWindow::full(daily_limit),
			minutely: QuotaWindow::full(minutely_limit),
			last_checked_at: now,
			total_calls_today: 0,
		}
	}

	/// Window accessor.
	pub fn window(&self, kind: LimitWindow) -> &QuotaWindow {
		match kind {
			LimitWindow::Daily => &self.daily,
			LimitWindow::Minutely => &self.minutely,
		}
	}

	/// Mutable window accessor.
	pub fn window_mut(&mut self, kind: LimitWindow) -> &mut QuotaWindow {
		match kind {
			LimitWindow::Daily => &mut self.daily,
			LimitWindow::Minutely => &mut self.minutely,
		}
	}

	/// Refills every window whose reset instant passed; a daily refill also zeroes the call
	/// counter.
	pub fn lazy_reset(&mut self, now: OffsetDateTime) {
		if self.daily.lazy_reset(now) {
			self.total_calls_today = 0;
		}

		self.minutely.lazy_reset(now);
	}

	/// Folds another observation of the same connection in, most-restrictive-wins.
	///
	/// Merging the same snapshot twice leaves the result unchanged.
	pub fn merge(&mut self, other: &Self) {
		self.daily.merge(&other.daily);
		self.minutely.merge(&other.minutely);
		self.last_checked_at = self.last_checked_at.max(other.last_checked_at);
		self.total_calls_today = self.total_calls_today.max(other.total_calls_today);
	}

	/// Overwrites the fields the headers report, without counting a call.
	pub fn observe(&mut self, headers: &RateLimitHeaders) {
		for kind in [LimitWindow::Daily, LimitWindow::Minutely] {
			let observed = headers.window(kind);
			let window = self.window_mut(kind);

			if let Some(limit) = observed.limit {
				window.limit = limit;
				window.limit_reported = true;
			}
			if let Some(remaining) = observed.remaining {
				window.remaining = remaining;
			}
			if let Some(reset_at) = observed.reset_at {
				window.reset_at = Some(reset_at);
			}

			window.clamp();
		}
	}

	/// Records one completed call, applying whatever the provider reported.
	///
	/// Windows the headers say nothing about are decremented locally, and their reset instant is
	/// inferred from the window's nominal period when still unknown.
	pub fn record_call(&mut self, headers: &RateLimitHeaders, now: OffsetDateTime) {
		for kind in [LimitWindow::Daily, LimitWindow::Minutely] {
			let observed = headers.window(kind);
			let window = self.window_mut(kind);

			if let Some(limit) = observed.limit {
				window.limit = limit;
				window.limit_reported = true;
			}
			if let Some(reset_at) = observed.reset_at {
				window.reset_at = Some(reset_at);
			}

			match observed.remaining {
				Some(remaining) => window.remaining = remaining,
				None => {
					window.remaining = window.remaining.saturating_sub(1);

					if window.reset_at.is_none() {
						window.reset_at = Some(now + kind.nominal_period());
					}
				},
			}

			window.clamp();
		}

		self.total_calls_today += 1;
		self.last_checked_at = now;
	}

	/// First exhausted window, daily before minutely.
	pub fn exceeded(&self, now: OffsetDateTime) -> Option<RateLimitExceeded> {
		[LimitWindow::Daily, LimitWindow::Minutely].into_iter().find_map(|kind| {
			self.window(kind).exhausted_until(now, kind.nominal_period()).map(|reset_at| RateLimitExceeded {
				connection: self.connection.clone(),
				kind,
				reset_at,
			})
		})
	}
}

/// A quota window is exhausted and has not reset yet.
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
#[error("The {kind} rate limit of connection `{connection}` is exhausted until {reset_at}.")]
pub struct RateLimitExceeded {
	/// Connection whose quota ran out.
	pub connection: ConnectionId,
	/// Exhausted window.
	pub kind: LimitWindow,
	/// Instant the window refills.
	pub reset_at: OffsetDateTime,
}
