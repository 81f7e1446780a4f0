//! File-backed store persisting a JSON snapshot after each mutation.

// std
use std::{
	fs::{self, File},
	io::Write,
	path::{Path, PathBuf},
};
// self
use crate::{
	_prelude::*,
	auth::{Connection, ConnectionId, ConnectionPatch, TokenSecret},
	ratelimit::RateLimitState,
	store::{
		self, CompareAndSwapOutcome, ConnectionStore, RateLimitStore, StoreError, StoreFuture,
	},
};

#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
	#[serde(default)]
	connections: BTreeMap<ConnectionId, Connection>,
	#[serde(default)]
	rate_limits: BTreeMap<ConnectionId, RateLimitState>,
}

/// Single-host store that rewrites a JSON snapshot atomically (write + rename) on every change.
///
/// Not suitable for several hosts; it exists for bots and CLIs that run one process at a time.
#[derive(Clone, Debug)]
pub struct FileStore {
	path: PathBuf,
	inner: Arc<RwLock<Snapshot>>,
}
impl FileStore {
	/// Opens (or creates) a store at the provided path, eagerly loading existing data.
	pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
		let path = path.into();

		ensure_parent_exists(&path)?;

		let snapshot = load_snapshot(&path)?;

		Ok(Self { path, inner: Arc::new(RwLock::new(snapshot)) })
	}

	/// Location of the snapshot file.
	pub fn path(&self) -> &Path {
		&self.path
	}

	fn persist_locked(&self, snapshot: &Snapshot) -> Result<(), StoreError> {
		ensure_parent_exists(&self.path)?;

		let serialized =
			serde_json::to_vec_pretty(snapshot).map_err(|e| StoreError::Serialization {
				message: format!("Failed to serialize store snapshot: {e}"),
			})?;
		let mut tmp_path = self.path.clone();

		tmp_path.set_extension("tmp");

		{
			let mut file = File::create(&tmp_path).map_err(|e| backend("create", &tmp_path, e))?;

			file.write_all(&serialized).map_err(|e| backend("write", &tmp_path, e))?;
			file.sync_all().map_err(|e| backend("sync", &tmp_path, e))?;
		}

		fs::rename(&tmp_path, &self.path).map_err(|e| backend("replace", &self.path, e))
	}
}
impl ConnectionStore for FileStore {
	fn insert(&self, connection: Connection) -> StoreFuture<'_, ()> {
		Box::pin(async move {
			let mut guard = self.inner.write();

			guard.connections.insert(connection.id.clone(), connection);

			self.persist_locked(&guard)
		})
	}

	fn read<'a>(&'a self, id: &'a ConnectionId) -> StoreFuture<'a, Option<Connection>> {
		Box::pin(async move { Ok(self.inner.read().connections.get(id).cloned()) })
	}

	fn update_fields<'a>(
		&'a self,
		id: &'a ConnectionId,
		patch: ConnectionPatch,
	) -> StoreFuture<'a, Option<Connection>> {
		Box::pin(async move {
			let mut guard = self.inner.write();
			let updated = match guard.connections.get_mut(id) {
				Some(record) => {
					record.apply(&patch, OffsetDateTime::now_utc());

					record.clone()
				},
				None => return Ok(None),
			};

			self.persist_locked(&guard)?;

			Ok(Some(updated))
		})
	}

	fn compare_and_swap_tokens<'a>(
		&'a self,
		id: &'a ConnectionId,
		expected_refresh: Option<&'a str>,
		patch: ConnectionPatch,
	) -> StoreFuture<'a, CompareAndSwapOutcome> {
		Box::pin(async move {
			let mut guard = self.inner.write();
			let outcome = match guard.connections.get_mut(id) {
				Some(record)
					if store::refresh_matches(
						record.refresh_token.as_ref().map(TokenSecret::expose),
						expected_refresh,
					) =>
				{
					record.apply(&patch, OffsetDateTime::now_utc());

					CompareAndSwapOutcome::Updated
				},
				Some(_) => CompareAndSwapOutcome::RefreshMismatch,
				None => CompareAndSwapOutcome::Missing,
			};

			if outcome == CompareAndSwapOutcome::Updated {
				self.persist_locked(&guard)?;
			}

			Ok(outcome)
		})
	}

	fn refresh<'a>(&'a self, id: &'a ConnectionId) -> StoreFuture<'a, Option<Connection>> {
		// Another process may have rewritten the snapshot since it was loaded.
		Box::pin(async move {
			let snapshot = load_snapshot(&self.path)?;
			let mut guard = self.inner.write();

			*guard = snapshot;

			Ok(guard.connections.get(id).cloned())
		})
	}
}
impl RateLimitStore for FileStore {
	fn load_rate_limit<'a>(
		&'a self,
		id: &'a ConnectionId,
	) -> StoreFuture<'a, Option<RateLimitState>> {
		Box::pin(async move { Ok(self.inner.read().rate_limits.get(id).cloned()) })
	}

	fn save_rate_limit(&self, state: RateLimitState) -> StoreFuture<'_, ()> {
		Box::pin(async move {
			let mut guard = self.inner.write();

			guard.rate_limits.insert(state.connection.clone(), state);

			self.persist_locked(&guard)
		})
	}
}

fn load_snapshot(path: &Path) -> Result<Snapshot, StoreError> {
	if !path.exists() {
		return Ok(Snapshot::default());
	}

	let bytes = fs::read(path).map_err(|e| backend("read", path, e))?;

	if bytes.is_empty() {
		return Ok(Snapshot::default());
	}

	serde_json::from_slice(&bytes).map_err(|e| StoreError::Serialization {
		message: format!("Failed to parse {}: {e}", path.display()),
	})
}

fn ensure_parent_exists(path: &Path) -> Result<(), StoreError> {
	if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
		fs::create_dir_all(parent).map_err(|e| backend("create directory", parent, e))?;
	}

	Ok(())
}

fn backend(action: &str, path: &Path, e: std::io::Error) -> StoreError {
	StoreError::Backend { message: format!("Failed to {action} {}: {e}", path.display()) }
}
