//! Non-fatal approaching-limit notifications.

// self
use crate::{
	_prelude::*,
	auth::ConnectionId,
	ratelimit::{LimitWindow, RateLimitState},
};

/// Observer notified when a connection approaches its quota. Notifications never interrupt the
/// call that produced them.
pub trait WarningSink
where
	Self: Send + Sync,
{
	/// Receives one warning.
	fn on_warning(&self, warning: &RateLimitWarning);
}

/// Which threshold was crossed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningKind {
	/// Daily usage crossed the warning percentage.
	DailyUsageHigh,
	/// Daily usage crossed the critical percentage.
	DailyUsageCritical,
	/// Fewer calls than the configured floor are left this minute.
	MinutelyRemainingLow,
}
impl WarningKind {
	/// Stable label for logs.
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::DailyUsageHigh => "daily_usage_high",
			Self::DailyUsageCritical => "daily_usage_critical",
			Self::MinutelyRemainingLow => "minutely_remaining_low",
		}
	}

	/// Window the warning is about.
	pub const fn window(self) -> LimitWindow {
		match self {
			Self::DailyUsageHigh | Self::DailyUsageCritical => LimitWindow::Daily,
			Self::MinutelyRemainingLow => LimitWindow::Minutely,
		}
	}
}

/// Details handed to a [`WarningSink`].
#[derive(Clone, Debug, PartialEq)]
pub struct RateLimitWarning {
	/// Connection approaching its quota.
	pub connection: ConnectionId,
	/// Crossed threshold.
	pub kind: WarningKind,
	/// Usage of the affected window, in percent.
	pub usage_percent: f64,
	/// Calls left in the affected window.
	pub remaining: u32,
	/// Limit of the affected window.
	pub limit: u32,
	/// Reset instant of the affected window, when known.
	pub reset_at: Option<OffsetDateTime>,
}

/// Warning thresholds.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WarningThresholds {
	/// Daily usage percentage that triggers [`WarningKind::DailyUsageHigh`].
	pub daily_warn_percent: f64,
	/// Daily usage percentage that triggers [`WarningKind::DailyUsageCritical`].
	pub daily_critical_percent: f64,
	/// Remaining per-minute calls below which [`WarningKind::MinutelyRemainingLow`] fires.
	pub minutely_low_remaining: u32,
}
impl WarningThresholds {
	/// Warnings the state currently warrants. At most one daily warning is produced.
	pub fn evaluate(&self, state: &RateLimitState) -> Vec<RateLimitWarning> {
		let mut warnings = Vec::new();
		let daily_usage = state.daily.usage_percent();
		let daily_kind = if daily_usage >= self.daily_critical_percent {
			Some(WarningKind::DailyUsageCritical)
		} else if daily_usage >= self.daily_warn_percent {
			Some(WarningKind::DailyUsageHigh)
		} else {
			None
		};

		if let Some(kind) = daily_kind {
			warnings.push(warning(state, kind));
		}
		if state.minutely.remaining < self.minutely_low_remaining {
			warnings.push(warning(state, WarningKind::MinutelyRemainingLow));
		}

		warnings
	}
}
impl Default for WarningThresholds {
	fn default() -> Self {
		Self { daily_warn_percent: 75.0, daily_critical_percent: 90.0, minutely_low_remaining: 10 }
	}
}

fn warning(state: &RateLimitState, kind: WarningKind) -> RateLimitWarning {
	let window = state.window(kind.window());

	RateLimitWarning {
		connection: state.connection.clone(),
		kind,
		usage_percent: window.usage_percent(),
		remaining: window.remaining,
		limit: window.limit,
		reset_at: window.reset_at,
	}
}

/// Default sink that logs each warning through `tracing`.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingWarningSink;
impl WarningSink for TracingWarningSink {
	fn on_warning(&self, warning: &RateLimitWarning) {
		tracing::warn!(
			connection = %warning.connection,
			kind = warning.kind.as_str(),
			usage_percent = warning.usage_percent,
			remaining = warning.remaining,
			limit = warning.limit,
			"Rate limit is running low."
		);
	}
}
