//! Storage contracts for connections and rate-limit state, plus built-in backends.
//!
//! Production deployments back these traits with their own database; [`MemoryStore`] and
//! [`FileStore`] cover tests, demos, and single-host setups.

pub mod file;
pub mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

// self
use crate::{
	_prelude::*,
	auth::{Connection, ConnectionId, ConnectionPatch},
	ratelimit::RateLimitState,
};

/// Boxed future returned by store operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + 'a + Send>>;

/// Durable connection records.
pub trait ConnectionStore
where
	Self: Send + Sync,
{
	/// Creates or replaces a connection record.
	fn insert(&self, connection: Connection) -> StoreFuture<'_, ()>;

	/// Reads the connection, if present. May be served from a replica or cache.
	fn read<'a>(&'a self, id: &'a ConnectionId) -> StoreFuture<'a, Option<Connection>>;

	/// Atomically applies a partial update and returns the updated record.
	fn update_fields<'a>(
		&'a self,
		id: &'a ConnectionId,
		patch: ConnectionPatch,
	) -> StoreFuture<'a, Option<Connection>>;

	/// Atomically applies `patch` only if the stored refresh token still equals
	/// `expected_refresh`.
	fn compare_and_swap_tokens<'a>(
		&'a self,
		id: &'a ConnectionId,
		expected_refresh: Option<&'a str>,
		patch: ConnectionPatch,
	) -> StoreFuture<'a, CompareAndSwapOutcome>;

	/// Re-reads the connection from the authoritative source, observing every write that
	/// completed before the call. Polling waiters depend on this guarantee.
	fn refresh<'a>(&'a self, id: &'a ConnectionId) -> StoreFuture<'a, Option<Connection>> {
		self.read(id)
	}
}

/// Persisted per-connection rate-limit counters.
pub trait RateLimitStore
where
	Self: Send + Sync,
{
	/// Loads the last persisted state for the connection.
	fn load_rate_limit<'a>(
		&'a self,
		id: &'a ConnectionId,
	) -> StoreFuture<'a, Option<RateLimitState>>;

	/// Persists the state, replacing the previous value.
	fn save_rate_limit(&self, state: RateLimitState) -> StoreFuture<'_, ()>;
}

/// Result of a token compare-and-swap attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompareAndSwapOutcome {
	/// The refresh token matched and the record was updated.
	Updated,
	/// The record exists but its refresh token has already been rotated.
	RefreshMismatch,
	/// No record matched the identifier.
	Missing,
}

/// Error type produced by store implementations.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum StoreError {
	/// Serialization failures surfaced by the backend.
	#[error("Serialization error: {message}.")]
	Serialization {
		/// Human-readable error payload.
		message: String,
	},
	/// Backend-level failure for the storage engine.
	#[error("Backend failure: {message}.")]
	Backend {
		/// Human-readable error payload.
		message: String,
	},
}

pub(crate) fn refresh_matches(current: Option<&str>, expected: Option<&str>) -> bool {
	current == expected
}
