//! OAuth 2.0 connection gatekeeper: lock-guarded token rotation with dual-window rate-limit
//! reconciliation plus bounded backpressure for every outbound call made on behalf of a
//! connection.
//!
//! Every call flows through the same pipeline: [`lifecycle::TokenManager::ensure_valid`]
//! guarantees a fresh access token (refreshing under a distributed lock when needed),
//! [`ratelimit::RateLimitTracker::check`] reconciles the per-minute and per-day quotas, the
//! [`backpressure::BackpressureController`] decides whether an exhausted window is worth waiting
//! for, and [`ratelimit::RateLimitTracker::track`] folds the provider's response headers back in.
//! [`gatekeeper::Gatekeeper`] wires the pieces together.

#![deny(clippy::all, missing_docs)]
#![cfg_attr(not(test), deny(unused_crate_dependencies))]

pub mod auth;
pub mod backpressure;
pub mod cache;
pub mod config;
pub mod deadline;
pub mod endpoint;
pub mod error;
pub mod gatekeeper;
pub mod http;
pub mod lifecycle;
pub mod obs;
pub mod provider;
pub mod ratelimit;
pub mod store;
#[cfg(any(test, feature = "test"))]
#[doc(hidden)]
pub mod _preludet {
	//! Convenience re-exports and helpers shared by integration tests.

	pub use crate::_prelude::*;

	// self
	use crate::{
		auth::{Connection, ConnectionId, TokenSecret},
		cache::MemoryCache,
		config::GatekeeperConfig,
		store::MemoryStore,
	};

	/// Builds a [`ConnectionId`] fixture, panicking on invalid input.
	pub fn connection_id(value: &str) -> ConnectionId {
		ConnectionId::new(value).expect("Connection identifier fixture should be valid.")
	}

	/// Builds an active connection whose access token expires `expires_in` from now.
	pub fn active_connection(
		id: &ConnectionId,
		access: &str,
		refresh: &str,
		expires_in: Duration,
	) -> Connection {
		let now = OffsetDateTime::now_utc();
		let mut connection = Connection::new(id.clone(), now - Duration::hours(1));

		connection.activate(
			TokenSecret::new(access),
			Some(TokenSecret::new(refresh)),
			now + expires_in,
			now + Duration::days(60),
			now - Duration::minutes(30),
		);

		connection
	}

	/// Shared backends standing in for the external store and cache that several processes
	/// would share in production.
	pub fn shared_backends() -> (Arc<MemoryStore>, Arc<MemoryCache>) {
		(Arc::new(MemoryStore::default()), Arc::new(MemoryCache::default()))
	}

	/// Configuration tuned for tests: short lock polls, default everything else.
	pub fn test_config() -> GatekeeperConfig {
		GatekeeperConfig { lock_poll_interval_ms: 100, ..GatekeeperConfig::default() }
	}
}

mod _prelude {
	pub use std::{
		collections::{BTreeMap, HashMap},
		error::Error as StdError,
		fmt::{Debug, Display, Formatter, Result as FmtResult},
		future::Future,
		pin::Pin,
		sync::Arc,
		time::Duration as StdDuration,
	};

	pub use async_lock::Mutex as AsyncMutex;
	pub use parking_lot::{Mutex, RwLock};
	#[cfg(feature = "reqwest")]
	pub use reqwest::{Client as ReqwestClient, Error as ReqwestError};
	pub use serde::{Deserialize, Serialize};
	pub use thiserror::Error as ThisError;
	pub use time::{Duration, OffsetDateTime};
	pub use url::Url;

	pub use crate::error::{Error, Result};

	/// Converts a signed [`Duration`] into a std duration, clamping negatives to zero.
	pub fn to_std(duration: Duration) -> StdDuration {
		if duration.is_negative() { StdDuration::ZERO } else { duration.unsigned_abs() }
	}
}

pub use oauth2;
#[cfg(feature = "reqwest")] pub use reqwest;
pub use url;
