//! In-memory TTL map backing both [`SharedCache`] and [`DistributedLock`].

// crates.io
use tokio::time::Instant;
// self
use crate::{
	_prelude::*,
	auth::session,
	cache::{CacheFuture, DistributedLock, LockAttempt, LockHolder, LockKey, SharedCache},
};

const HOLDER_LEN: usize = 32;

#[derive(Clone, Debug)]
struct Entry {
	value: String,
	expires_at: Instant,
}
impl Entry {
	fn is_live(&self, now: Instant) -> bool {
		self.expires_at > now
	}
}

/// Single-process stand-in for an external cache.
///
/// Expiry runs on the Tokio clock, so paused-time tests can drive TTLs deterministically.
/// Clones share the same map.
#[derive(Clone, Debug, Default)]
pub struct MemoryCache {
	entries: Arc<Mutex<HashMap<String, Entry>>>,
}
impl MemoryCache {
	fn live_value(&self, key: &str) -> Option<String> {
		let now = Instant::now();
		let mut guard = self.entries.lock();

		match guard.get(key) {
			Some(entry) if entry.is_live(now) => Some(entry.value.clone()),
			Some(_) => {
				guard.remove(key);

				None
			},
			None => None,
		}
	}
}
impl SharedCache for MemoryCache {
	fn get<'a>(&'a self, key: &'a str) -> CacheFuture<'a, Option<String>> {
		Box::pin(async move { Ok(self.live_value(key)) })
	}

	fn put<'a>(&'a self, key: &'a str, value: String, ttl: Duration) -> CacheFuture<'a, ()> {
		Box::pin(async move {
			let expires_at = Instant::now() + to_std(ttl);

			self.entries.lock().insert(key.to_owned(), Entry { value, expires_at });

			Ok(())
		})
	}

	fn delete<'a>(&'a self, key: &'a str) -> CacheFuture<'a, ()> {
		Box::pin(async move {
			self.entries.lock().remove(key);

			Ok(())
		})
	}
}
impl DistributedLock for MemoryCache {
	fn acquire<'a>(&'a self, key: &'a LockKey, ttl: Duration) -> CacheFuture<'a, LockAttempt> {
		Box::pin(async move {
			let now = Instant::now();
			let mut guard = self.entries.lock();

			if guard.get(key.as_str()).is_some_and(|entry| entry.is_live(now)) {
				return Ok(LockAttempt::Contended);
			}

			let holder = session::random_string(HOLDER_LEN);

			guard.insert(
				key.as_str().to_owned(),
				Entry { value: holder.clone(), expires_at: now + to_std(ttl) },
			);

			Ok(LockAttempt::Acquired(LockHolder::new(holder)))
		})
	}

	fn release<'a>(&'a self, key: &'a LockKey, holder: &'a LockHolder) -> CacheFuture<'a, bool> {
		Box::pin(async move {
			let now = Instant::now();
			let mut guard = self.entries.lock();
			let owned = guard
				.get(key.as_str())
				.is_some_and(|entry| entry.is_live(now) && entry.value == holder.as_str());

			if owned {
				guard.remove(key.as_str());
			}

			Ok(owned)
		})
	}
}
