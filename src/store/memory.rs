//! Thread-safe in-memory store for tests, demos, and single-process deployments.

// self
use crate::{
	_prelude::*,
	auth::{Connection, ConnectionId, ConnectionPatch, TokenSecret},
	ratelimit::RateLimitState,
	store::{
		self, CompareAndSwapOutcome, ConnectionStore, RateLimitStore, StoreError, StoreFuture,
	},
};

type ConnectionMap = Arc<RwLock<HashMap<ConnectionId, Connection>>>;
type RateLimitMap = Arc<RwLock<HashMap<ConnectionId, RateLimitState>>>;

/// In-process backend for both connection records and rate-limit state.
///
/// Clones share the same maps, so a clone handed to a second manager behaves like a second
/// process talking to one database.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
	connections: ConnectionMap,
	rate_limits: RateLimitMap,
}
impl MemoryStore {
	fn update_now(
		map: &ConnectionMap,
		id: &ConnectionId,
		patch: &ConnectionPatch,
	) -> Option<Connection> {
		let mut guard = map.write();
		let record = guard.get_mut(id)?;

		record.apply(patch, OffsetDateTime::now_utc());

		Some(record.clone())
	}

	fn cas_now(
		map: &ConnectionMap,
		id: &ConnectionId,
		expected_refresh: Option<&str>,
		patch: &ConnectionPatch,
	) -> CompareAndSwapOutcome {
		let mut guard = map.write();

		match guard.get_mut(id) {
			Some(record)
				if store::refresh_matches(
					record.refresh_token.as_ref().map(TokenSecret::expose),
					expected_refresh,
				) =>
			{
				record.apply(patch, OffsetDateTime::now_utc());

				CompareAndSwapOutcome::Updated
			},
			Some(_) => CompareAndSwapOutcome::RefreshMismatch,
			None => CompareAndSwapOutcome::Missing,
		}
	}
}
impl ConnectionStore for MemoryStore {
	fn insert(&self, connection: Connection) -> StoreFuture<'_, ()> {
		let map = self.connections.clone();

		Box::pin(async move {
			map.write().insert(connection.id.clone(), connection);

			Ok(())
		})
	}

	fn read<'a>(&'a self, id: &'a ConnectionId) -> StoreFuture<'a, Option<Connection>> {
		Box::pin(async move { Ok(self.connections.read().get(id).cloned()) })
	}

	fn update_fields<'a>(
		&'a self,
		id: &'a ConnectionId,
		patch: ConnectionPatch,
	) -> StoreFuture<'a, Option<Connection>> {
		Box::pin(async move { Ok(Self::update_now(&self.connections, id, &patch)) })
	}

	fn compare_and_swap_tokens<'a>(
		&'a self,
		id: &'a ConnectionId,
		expected_refresh: Option<&'a str>,
		patch: ConnectionPatch,
	) -> StoreFuture<'a, CompareAndSwapOutcome> {
		Box::pin(async move { Ok(Self::cas_now(&self.connections, id, expected_refresh, &patch)) })
	}
}
impl RateLimitStore for MemoryStore {
	fn load_rate_limit<'a>(
		&'a self,
		id: &'a ConnectionId,
	) -> StoreFuture<'a, Option<RateLimitState>> {
		Box::pin(async move { Ok(self.rate_limits.read().get(id).cloned()) })
	}

	fn save_rate_limit(&self, state: RateLimitState) -> StoreFuture<'_, ()> {
		let map = self.rate_limits.clone();

		Box::pin(async move {
			map.write().insert(state.connection.clone(), state);

			Ok::<(), StoreError>(())
		})
	}
}
