// self
use crate::_prelude::*;

/// Bounded exponential backoff for refresh attempts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
	max_attempts: u32,
	base_delay: StdDuration,
	max_delay: StdDuration,
}
impl RetryPolicy {
	/// Creates a policy; at least one attempt is always made.
	pub fn new(max_attempts: u32, base_delay: StdDuration, max_delay: StdDuration) -> Self {
		Self { max_attempts: max_attempts.max(1), base_delay, max_delay }
	}

	/// Total attempts allowed.
	pub fn max_attempts(&self) -> u32 {
		self.max_attempts
	}

	/// Delay after the failed `attempt` (1-based): `base * 2^(attempt - 1)`, capped.
	///
	/// A provider `Retry-After` hint lengthens the delay but never past the cap.
	pub fn delay_after(&self, attempt: u32, retry_after: Option<Duration>) -> StdDuration {
		let exponent = attempt.saturating_sub(1).min(31);
		let backoff = self.base_delay.saturating_mul(1_u32 << exponent);
		let hinted = retry_after.map(to_std).unwrap_or_default();

		backoff.max(hinted).min(self.max_delay)
	}

	/// Longest time a full retry run can take when every attempt uses `attempt_timeout` and every
	/// backoff is stretched to the cap.
	pub fn worst_case(&self, attempt_timeout: StdDuration) -> StdDuration {
		let gaps = self.max_attempts - 1;

		attempt_timeout.saturating_mul(self.max_attempts).saturating_add(self.max_delay.saturating_mul(gaps))
	}
}
impl Default for RetryPolicy {
	fn default() -> Self {
		Self::new(3, StdDuration::from_secs(1), StdDuration::from_secs(30))
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn delays_double_and_cap() {
		let policy = RetryPolicy::default();

		assert_eq!(policy.delay_after(1, None), StdDuration::from_secs(1));
		assert_eq!(policy.delay_after(2, None), StdDuration::from_secs(2));
		assert_eq!(policy.delay_after(3, None), StdDuration::from_secs(4));
		assert_eq!(policy.delay_after(40, None), StdDuration::from_secs(30));
	}

	#[test]
	fn retry_after_hint_extends_but_never_exceeds_cap() {
		let policy = RetryPolicy::default();

		assert_eq!(policy.delay_after(1, Some(Duration::seconds(5))), StdDuration::from_secs(5));
		assert_eq!(policy.delay_after(1, Some(Duration::minutes(5))), StdDuration::from_secs(30));
		assert_eq!(RetryPolicy::new(0, StdDuration::ZERO, StdDuration::ZERO).max_attempts(), 1);
	}

	#[test]
	fn worst_case_counts_every_attempt_and_capped_gap() {
		let policy = RetryPolicy::default();

		assert_eq!(policy.worst_case(StdDuration::from_secs(15)), StdDuration::from_secs(105));
		assert_eq!(
			RetryPolicy::new(1, StdDuration::from_secs(1), StdDuration::from_secs(30))
				.worst_case(StdDuration::from_secs(15)),
			StdDuration::from_secs(15)
		);
	}
}
