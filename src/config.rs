//! Gatekeeper configuration.
//!
//! Every field has a default, so a JSON document only needs the knobs it changes:
//!
//! ```
//! let config = oauth2_gatekeeper::config::GatekeeperConfig::from_json_str(
//! 	r#"{ "max_wait_seconds": 30, "throw_on_daily_limit": false }"#,
//! )
//! .expect("Config should parse.");
//!
//! assert_eq!(config.max_refresh_retries, 3);
//! ```

// self
use crate::{
	_prelude::*,
	backpressure::BackpressurePolicy,
	error::ConfigError,
	lifecycle::RetryPolicy,
	ratelimit::{HeaderNames, WarningThresholds},
};

/// Slack kept between the last refresh step and the lock's expiry.
pub const LOCK_RELEASE_MARGIN: StdDuration = StdDuration::from_secs(1);

/// Tunables for token lifecycle, rate-limit tracking, and backpressure.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatekeeperConfig {
	/// Wait out an exhausted per-minute window instead of failing.
	pub wait_on_minutely_limit: bool,
	/// Fail immediately on an exhausted daily window.
	pub throw_on_daily_limit: bool,
	/// Hard ceiling on any single backpressure wait.
	pub max_wait_seconds: u64,
	/// Budget for waiting on another holder's refresh.
	pub lock_timeout_seconds: u64,
	/// Safety margin before expiry at which a refresh is triggered.
	pub proactive_refresh_threshold_seconds: u64,
	/// Refresh attempts per lock acquisition.
	pub max_refresh_retries: u32,
	/// TTL of the refresh lock; bounds how long a crashed holder blocks others.
	///
	/// Must cover a full retry run, so the holder never outlives its lock.
	pub lock_ttl_seconds: u64,
	/// Ceiling on a single token-endpoint call during refresh.
	pub refresh_attempt_timeout_seconds: u64,
	/// Interval between polls of the store while another holder refreshes.
	pub lock_poll_interval_ms: u64,
	/// First retry backoff; doubles per attempt.
	pub retry_base_delay_ms: u64,
	/// Backoff cap.
	pub retry_max_delay_ms: u64,
	/// Refresh-token lifetime assumed when the provider does not report one.
	pub refresh_token_lifetime_days: u64,
	/// TTL of the shared rate-limit snapshot.
	pub rate_limit_cache_ttl_seconds: u64,
	/// Longest uninterrupted sleep during a backpressure wait.
	pub wait_chunk_seconds: u64,
	/// Daily limit assumed before the provider reports one.
	pub default_daily_limit: u32,
	/// Per-minute limit assumed before the provider reports one.
	pub default_minutely_limit: u32,
	/// Approaching-limit warning thresholds.
	pub warnings: WarningThresholds,
	/// Provider rate-limit header names.
	pub headers: HeaderNames,
}
impl GatekeeperConfig {
	/// Parses and validates a JSON document, reporting the path of the first bad field.
	pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
		let mut deserializer = serde_json::Deserializer::from_str(json);
		let config: Self = serde_path_to_error::deserialize(&mut deserializer).map_err(|e| {
			ConfigError::Parse { path: e.path().to_string(), message: e.inner().to_string() }
		})?;

		config.validate()?;

		Ok(config)
	}

	/// Rejects values the gatekeeper cannot operate with.
	pub fn validate(&self) -> Result<(), ConfigError> {
		fn invalid(field: &'static str, reason: &'static str) -> Result<(), ConfigError> {
			Err(ConfigError::InvalidValue { field, reason })
		}

		if self.max_refresh_retries == 0 {
			return invalid("max_refresh_retries", "at least one attempt is required");
		}
		if self.wait_chunk_seconds == 0 {
			return invalid("wait_chunk_seconds", "must be positive");
		}
		if self.lock_poll_interval_ms == 0 {
			return invalid("lock_poll_interval_ms", "must be positive");
		}
		if self.refresh_attempt_timeout_seconds == 0 {
			return invalid("refresh_attempt_timeout_seconds", "must be positive");
		}
		if self.lock_ttl_seconds < self.lock_timeout_seconds {
			return invalid("lock_ttl_seconds", "must not be shorter than lock_timeout_seconds");
		}
		if to_std(self.lock_ttl())
			< self.retry_policy().worst_case(self.refresh_attempt_timeout()) + LOCK_RELEASE_MARGIN
		{
			return invalid(
				"lock_ttl_seconds",
				"must cover every refresh attempt and backoff plus the release margin",
			);
		}
		if self.retry_max_delay_ms < self.retry_base_delay_ms {
			return invalid("retry_max_delay_ms", "must not be shorter than retry_base_delay_ms");
		}
		if self.warnings.daily_critical_percent < self.warnings.daily_warn_percent {
			return invalid("warnings.daily_critical_percent", "must not be below daily_warn_percent");
		}

		Ok(())
	}

	/// Proactive refresh threshold.
	pub fn proactive_threshold(&self) -> Duration {
		seconds(self.proactive_refresh_threshold_seconds)
	}

	/// Budget for waiting on another holder's refresh.
	pub fn lock_timeout(&self) -> Duration {
		seconds(self.lock_timeout_seconds)
	}

	/// Refresh lock TTL.
	pub fn lock_ttl(&self) -> Duration {
		seconds(self.lock_ttl_seconds)
	}

	/// Per-attempt token-endpoint timeout.
	pub fn refresh_attempt_timeout(&self) -> StdDuration {
		StdDuration::from_secs(self.refresh_attempt_timeout_seconds)
	}

	/// Store polling interval while waiting for another holder.
	pub fn lock_poll_interval(&self) -> StdDuration {
		StdDuration::from_millis(self.lock_poll_interval_ms)
	}

	/// Assumed refresh-token lifetime.
	pub fn refresh_token_lifetime(&self) -> Duration {
		Duration::days(i64::try_from(self.refresh_token_lifetime_days).unwrap_or(i64::MAX / 86_400))
	}

	/// Shared snapshot TTL.
	pub fn rate_limit_cache_ttl(&self) -> Duration {
		seconds(self.rate_limit_cache_ttl_seconds)
	}

	/// Retry schedule for refresh attempts.
	pub fn retry_policy(&self) -> RetryPolicy {
		RetryPolicy::new(
			self.max_refresh_retries,
			StdDuration::from_millis(self.retry_base_delay_ms),
			StdDuration::from_millis(self.retry_max_delay_ms),
		)
	}

	/// Backpressure policy.
	pub fn backpressure_policy(&self) -> BackpressurePolicy {
		BackpressurePolicy {
			wait_on_minutely: self.wait_on_minutely_limit,
			throw_on_daily: self.throw_on_daily_limit,
			max_wait: StdDuration::from_secs(self.max_wait_seconds),
			chunk: StdDuration::from_secs(self.wait_chunk_seconds),
		}
	}
}
impl Default for GatekeeperConfig {
	fn default() -> Self {
		Self {
			wait_on_minutely_limit: true,
			throw_on_daily_limit: true,
			max_wait_seconds: 65,
			lock_timeout_seconds: 30,
			proactive_refresh_threshold_seconds: 540,
			max_refresh_retries: 3,
			lock_ttl_seconds: 120,
			refresh_attempt_timeout_seconds: 15,
			lock_poll_interval_ms: 500,
			retry_base_delay_ms: 1_000,
			retry_max_delay_ms: 30_000,
			refresh_token_lifetime_days: 60,
			rate_limit_cache_ttl_seconds: 60,
			wait_chunk_seconds: 10,
			default_daily_limit: 5_000,
			default_minutely_limit: 60,
			warnings: WarningThresholds::default(),
			headers: HeaderNames::default(),
		}
	}
}

fn seconds(value: u64) -> Duration {
	Duration::seconds(i64::try_from(value).unwrap_or(i64::MAX))
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn partial_documents_fall_back_to_defaults() {
		let config = GatekeeperConfig::from_json_str(
			r#"{ "lock_timeout_seconds": 10, "headers": { "daily_remaining": "quota-left" } }"#,
		)
		.expect("Partial configuration should parse.");

		assert_eq!(config.lock_timeout(), Duration::seconds(10));
		assert_eq!(config.proactive_threshold(), Duration::seconds(540));
		assert_eq!(config.headers.daily_remaining, "quota-left");
		assert_eq!(config.headers.daily_limit, HeaderNames::default().daily_limit);
	}

	#[test]
	fn parse_errors_name_the_offending_path() {
		let err = GatekeeperConfig::from_json_str(r#"{ "warnings": { "minutely_low_remaining": -1 } }"#)
			.expect_err("Negative counts should be rejected.");

		assert!(
			matches!(&err, ConfigError::Parse { path, .. } if path == "warnings.minutely_low_remaining")
		);
	}

	#[test]
	fn validation_rejects_unusable_values() {
		let zero_retries = GatekeeperConfig { max_refresh_retries: 0, ..Default::default() };

		assert!(matches!(
			zero_retries.validate(),
			Err(ConfigError::InvalidValue { field: "max_refresh_retries", .. })
		));

		let short_ttl =
			GatekeeperConfig { lock_ttl_seconds: 5, lock_timeout_seconds: 30, ..Default::default() };

		assert!(matches!(
			short_ttl.validate(),
			Err(ConfigError::InvalidValue { field: "lock_ttl_seconds", .. })
		));
		assert!(GatekeeperConfig::default().validate().is_ok());
	}

	#[test]
	fn lock_ttl_must_outlast_a_full_retry_run() {
		// 3 attempts of 15s plus two capped 30s gaps plus the margin need 106s.
		let tight = GatekeeperConfig { lock_ttl_seconds: 105, ..Default::default() };

		assert!(matches!(
			tight.validate(),
			Err(ConfigError::InvalidValue { field: "lock_ttl_seconds", .. })
		));

		let faster = GatekeeperConfig {
			lock_ttl_seconds: 60,
			refresh_attempt_timeout_seconds: 5,
			retry_max_delay_ms: 10_000,
			..Default::default()
		};

		assert!(faster.validate().is_ok());

		let zero = GatekeeperConfig { refresh_attempt_timeout_seconds: 0, ..Default::default() };

		assert!(matches!(
			zero.validate(),
			Err(ConfigError::InvalidValue { field: "refresh_attempt_timeout_seconds", .. })
		));
	}
}
