//! Observability helpers shared by every gatekeeper operation.
//!
//! # Feature Flags
//!
//! - Spans named `oauth2_gatekeeper.op` carry the `op` and `connection` fields and are always
//!   emitted through `tracing`.
//! - Enable `metrics` to increment the `oauth2_gatekeeper_op_total` counter for every
//!   attempt/success/failure, labeled by `op` + `outcome`.

mod metrics;
mod tracing;

pub use metrics::*;
pub use tracing::*;

// self
use crate::_prelude::*;

/// Operations observed by the gatekeeper.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OpKind {
	/// Token validity check, possibly refreshing.
	EnsureValid,
	/// Guarded refresh critical section.
	Refresh,
	/// Authorization-code exchange.
	AuthorizationCode,
	/// Rate-limit reconciliation before a call.
	RateLimitCheck,
	/// Rate-limit bookkeeping after a call.
	RateLimitTrack,
	/// Backpressure wait.
	Backpressure,
	/// Full gated call.
	Call,
}
impl OpKind {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			OpKind::EnsureValid => "ensure_valid",
			OpKind::Refresh => "refresh",
			OpKind::AuthorizationCode => "authorization_code",
			OpKind::RateLimitCheck => "rate_limit_check",
			OpKind::RateLimitTrack => "rate_limit_track",
			OpKind::Backpressure => "backpressure",
			OpKind::Call => "call",
		}
	}
}
impl Display for OpKind {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Outcome labels recorded for each operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OpOutcome {
	/// Entry to an operation.
	Attempt,
	/// Successful completion.
	Success,
	/// Failure propagated back to the caller.
	Failure,
}
impl OpOutcome {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			OpOutcome::Attempt => "attempt",
			OpOutcome::Success => "success",
			OpOutcome::Failure => "failure",
		}
	}

	/// Maps a result onto [`OpOutcome::Success`] or [`OpOutcome::Failure`].
	pub fn of<T, E>(result: &Result<T, E>) -> Self {
		if result.is_ok() { OpOutcome::Success } else { OpOutcome::Failure }
	}
}
impl Display for OpOutcome {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}
