//! Provider rate-limit header parsing.

// self
use crate::{_prelude::*, ratelimit::LimitWindow};

/// Header names carrying the provider's quota counters. Matching is case-insensitive.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeaderNames {
	/// Daily limit header.
	pub daily_limit: String,
	/// Daily remaining header.
	pub daily_remaining: String,
	/// Daily reset header (epoch milliseconds).
	pub daily_reset: String,
	/// Per-minute limit header.
	pub minutely_limit: String,
	/// Per-minute remaining header.
	pub minutely_remaining: String,
	/// Per-minute reset header (epoch milliseconds).
	pub minutely_reset: String,
}
impl Default for HeaderNames {
	fn default() -> Self {
		Self {
			daily_limit: "x-ratelimit-daily-limit".into(),
			daily_remaining: "x-ratelimit-daily-remaining".into(),
			daily_reset: "x-ratelimit-daily-reset".into(),
			minutely_limit: "x-ratelimit-minute-limit".into(),
			minutely_remaining: "x-ratelimit-minute-remaining".into(),
			minutely_reset: "x-ratelimit-minute-reset".into(),
		}
	}
}

/// Values observed for one window. Absent headers stay `None`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WindowHeaders {
	/// Reported limit.
	pub limit: Option<u32>,
	/// Reported remaining calls; negative values are read as zero.
	pub remaining: Option<u32>,
	/// Reported reset instant.
	pub reset_at: Option<OffsetDateTime>,
}
impl WindowHeaders {
	/// Returns `true` when no header for the window was present.
	pub fn is_empty(&self) -> bool {
		self.limit.is_none() && self.remaining.is_none() && self.reset_at.is_none()
	}
}

/// Rate-limit counters carried by one provider response.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RateLimitHeaders {
	/// Daily window values.
	pub daily: WindowHeaders,
	/// Per-minute window values.
	pub minutely: WindowHeaders,
}
impl RateLimitHeaders {
	/// Parses `(name, value)` pairs; unknown names and unparsable values are ignored.
	pub fn parse<'a, I>(pairs: I, names: &HeaderNames) -> Self
	where
		I: IntoIterator<Item = (&'a str, &'a str)>,
	{
		let mut parsed = Self::default();

		for (name, value) in pairs {
			let value = value.trim();
			let matches = |candidate: &str| name.trim().eq_ignore_ascii_case(candidate);

			if matches(&names.daily_limit) {
				parsed.daily.limit = parse_count(value);
			} else if matches(&names.daily_remaining) {
				parsed.daily.remaining = parse_count(value);
			} else if matches(&names.daily_reset) {
				parsed.daily.reset_at = parse_epoch_millis(value);
			} else if matches(&names.minutely_limit) {
				parsed.minutely.limit = parse_count(value);
			} else if matches(&names.minutely_remaining) {
				parsed.minutely.remaining = parse_count(value);
			} else if matches(&names.minutely_reset) {
				parsed.minutely.reset_at = parse_epoch_millis(value);
			}
		}

		parsed
	}

	/// Parses the rate-limit headers of a `reqwest` response.
	#[cfg(feature = "reqwest")]
	pub fn from_header_map(map: &reqwest::header::HeaderMap, names: &HeaderNames) -> Self {
		Self::parse(
			map.iter().filter_map(|(name, value)| Some((name.as_str(), value.to_str().ok()?))),
			names,
		)
	}

	/// Values for one window.
	pub fn window(&self, kind: LimitWindow) -> &WindowHeaders {
		match kind {
			LimitWindow::Daily => &self.daily,
			LimitWindow::Minutely => &self.minutely,
		}
	}

	/// Returns `true` when the response carried no rate-limit header at all.
	pub fn is_empty(&self) -> bool {
		self.daily.is_empty() && self.minutely.is_empty()
	}
}

fn parse_count(value: &str) -> Option<u32> {
	let parsed = value.parse::<i64>().ok()?;

	Some(u32::try_from(parsed.max(0)).unwrap_or(u32::MAX))
}

// Epoch milliseconds, truncated to whole seconds.
fn parse_epoch_millis(value: &str) -> Option<OffsetDateTime> {
	let millis = value.parse::<i64>().ok()?;

	OffsetDateTime::from_unix_timestamp(millis.div_euclid(1_000)).ok()
}

#[cfg(test)]
mod tests {
	// crates.io
	use time::macros;
	// self
	use super::*;

	#[test]
	fn parses_case_insensitive_names_and_epoch_millis() {
		let names = HeaderNames::default();
		let headers = RateLimitHeaders::parse(
			[
				("X-RateLimit-Minute-Limit", "60"),
				("x-ratelimit-minute-remaining", " 10 "),
				("X-RATELIMIT-MINUTE-RESET", "1735732805250"),
				("X-RateLimit-Daily-Remaining", "-3"),
				("content-type", "application/json"),
			],
			&names,
		);

		assert_eq!(headers.minutely.limit, Some(60));
		assert_eq!(headers.minutely.remaining, Some(10));
		assert_eq!(headers.minutely.reset_at, Some(macros::datetime!(2025-01-01 12:00:05 UTC)));
		assert_eq!(headers.daily.remaining, Some(0));
		assert_eq!(headers.daily.limit, None);
		assert!(!headers.is_empty());
	}

	#[test]
	fn ignores_garbage_and_custom_names() {
		let names =
			HeaderNames { daily_remaining: "Quota-Left".into(), ..HeaderNames::default() };
		let headers = RateLimitHeaders::parse(
			[("quota-left", "42"), ("x-ratelimit-minute-limit", "sixty")],
			&names,
		);

		assert_eq!(headers.daily.remaining, Some(42));
		assert!(headers.minutely.is_empty());
	}
}
