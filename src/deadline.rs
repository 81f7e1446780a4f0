//! Caller-supplied deadline and cancellation for every blocking step.
//!
//! Lock waits, retry backoff, and backpressure sleeps all run on the Tokio monotonic clock and
//! check the [`Deadline`] between chunks, so a cancelled caller stops within one chunk.

// crates.io
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
// self
use crate::_prelude::*;

/// Optional absolute deadline plus optional cancellation token.
#[derive(Clone, Debug, Default)]
pub struct Deadline {
	at: Option<Instant>,
	cancel: Option<CancellationToken>,
}
impl Deadline {
	/// No deadline and no cancellation.
	pub fn none() -> Self {
		Self::default()
	}

	/// Deadline `budget` from now.
	pub fn after(budget: StdDuration) -> Self {
		Self { at: Some(Instant::now() + budget), cancel: None }
	}

	/// Deadline at a fixed instant.
	pub fn at(instant: Instant) -> Self {
		Self { at: Some(instant), cancel: None }
	}

	/// Attaches a cancellation token.
	pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
		self.cancel = Some(token);

		self
	}

	/// Time left before the deadline; `None` when unbounded.
	pub fn remaining(&self) -> Option<StdDuration> {
		self.at.map(|at| at.saturating_duration_since(Instant::now()))
	}

	/// Returns `true` once the deadline has passed.
	pub fn is_expired(&self) -> bool {
		self.remaining().is_some_and(|left| left.is_zero())
	}

	/// Returns `true` once the attached token was cancelled.
	pub fn is_cancelled(&self) -> bool {
		self.cancel.as_ref().is_some_and(CancellationToken::is_cancelled)
	}

	/// Fails with [`Error::Cancelled`] when the caller gave up.
	pub fn check(&self) -> Result<()> {
		if self.is_cancelled() { Err(Error::Cancelled) } else { Ok(()) }
	}

	/// Sleeps `total` in chunks of at most `chunk`, checking for cancellation between chunks.
	///
	/// Returns [`SleepOutcome::DeadlineReached`] without sleeping when `total` does not fit in the
	/// remaining budget.
	pub async fn sleep(&self, total: StdDuration, chunk: StdDuration) -> SleepOutcome {
		if self.remaining().is_some_and(|left| left < total) {
			return SleepOutcome::DeadlineReached;
		}

		let chunk = if chunk.is_zero() { total } else { chunk };
		let until = Instant::now() + total;

		loop {
			if self.is_cancelled() {
				return SleepOutcome::Cancelled;
			}

			let now = Instant::now();

			if now >= until {
				return SleepOutcome::Completed;
			}

			let step = chunk.min(until - now);

			tokio::select! {
				_ = self.cancelled() => return SleepOutcome::Cancelled,
				_ = time::sleep(step) => {},
			}
		}
	}

	/// Resolves once the attached token is cancelled; never resolves without one.
	pub async fn cancelled(&self) {
		match &self.cancel {
			Some(token) => token.cancelled().await,
			None => std::future::pending().await,
		}
	}
}

/// Result of [`Deadline::sleep`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SleepOutcome {
	/// The full duration elapsed.
	Completed,
	/// The token was cancelled mid-sleep.
	Cancelled,
	/// The requested sleep would overrun the deadline.
	DeadlineReached,
}
