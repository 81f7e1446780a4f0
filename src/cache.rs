//! Shared cache and distributed lock contracts.
//!
//! Both live outside the process in production (Redis, Memcached, a database row with a TTL).
//! [`MemoryCache`] implements them on one TTL map for tests and single-process deployments.

pub mod memory;

pub use memory::MemoryCache;

// self
use crate::{_prelude::*, auth::ConnectionId};

/// Boxed future returned by cache and lock operations.
pub type CacheFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, CacheError>> + 'a + Send>>;

/// Process-external key/value store with per-entry TTL.
pub trait SharedCache
where
	Self: Send + Sync,
{
	/// Returns the value stored under `key`, unless it expired.
	fn get<'a>(&'a self, key: &'a str) -> CacheFuture<'a, Option<String>>;

	/// Stores `value` under `key` for `ttl`.
	fn put<'a>(&'a self, key: &'a str, value: String, ttl: Duration) -> CacheFuture<'a, ()>;

	/// Drops the entry stored under `key`.
	fn delete<'a>(&'a self, key: &'a str) -> CacheFuture<'a, ()>;
}

/// Cross-process mutual exclusion with TTL-bounded ownership.
///
/// At most one holder owns a key at any instant; a crashed holder loses the key once `ttl`
/// elapses.
pub trait DistributedLock
where
	Self: Send + Sync,
{
	/// Tries to take the lock once without waiting.
	fn acquire<'a>(&'a self, key: &'a LockKey, ttl: Duration) -> CacheFuture<'a, LockAttempt>;

	/// Releases the lock if `holder` still owns it. Returns `false` when ownership was already
	/// lost (expired or taken over).
	fn release<'a>(&'a self, key: &'a LockKey, holder: &'a LockHolder) -> CacheFuture<'a, bool>;
}

/// Lock key combining the connection with the purpose of the critical section.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct LockKey(String);
impl LockKey {
	/// Key guarding the refresh of one connection's tokens.
	pub fn token_refresh(connection: &ConnectionId) -> Self {
		Self(format!("{connection}:token-refresh"))
	}

	/// Raw key string.
	pub fn as_str(&self) -> &str {
		&self.0
	}
}
impl Display for LockKey {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(&self.0)
	}
}

/// Opaque token proving ownership of a lock.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct LockHolder(String);
impl LockHolder {
	/// Wraps a holder token issued by a lock backend.
	pub fn new(value: impl Into<String>) -> Self {
		Self(value.into())
	}

	/// Raw holder token.
	pub fn as_str(&self) -> &str {
		&self.0
	}
}
impl Debug for LockHolder {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str("LockHolder(..)")
	}
}

/// Outcome of [`DistributedLock::acquire`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LockAttempt {
	/// The caller now owns the lock.
	Acquired(LockHolder),
	/// Someone else owns the lock.
	Contended,
}

/// Failures surfaced by cache and lock backends.
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
pub enum CacheError {
	/// Backend could not be reached or rejected the command.
	#[error("Cache backend failure: {message}.")]
	Backend {
		/// Human-readable error payload.
		message: String,
	},
	/// Cached payload could not be encoded or decoded.
	#[error("Cache payload is invalid: {message}.")]
	Serialization {
		/// Human-readable error payload.
		message: String,
	},
}
