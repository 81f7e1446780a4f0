// crates.io
use time::macros;
// self
use oauth2_gatekeeper::{
	_preludet::*,
	auth::{Connection, ConnectionPatch, ConnectionStatus, TokenSecret, TokenSet},
	store::{CompareAndSwapOutcome, ConnectionStore, MemoryStore},
};

const ISSUED: OffsetDateTime = macros::datetime!(2025-11-10 12:00 UTC);

fn rotation(access: &str, refresh: &str) -> ConnectionPatch {
	ConnectionPatch::rotation(
		&TokenSet::new(access, refresh, Duration::hours(1)),
		ISSUED + Duration::minutes(50),
		Duration::days(60),
	)
}

async fn seeded(refresh: Option<&str>) -> (MemoryStore, Connection) {
	let store = MemoryStore::default();
	let mut connection = Connection::new(connection_id("conn-store"), ISSUED);

	connection.activate(
		TokenSecret::new("access-initial"),
		refresh.map(TokenSecret::new),
		ISSUED + Duration::hours(1),
		ISSUED + Duration::days(60),
		ISSUED,
	);
	store.insert(connection.clone()).await.expect("Seeding the memory store should succeed.");

	(store, connection)
}

#[tokio::test]
async fn cas_success_and_mismatch() {
	let (store, connection) = seeded(Some("refresh-old")).await;
	let outcome = store
		.compare_and_swap_tokens(
			&connection.id,
			Some("refresh-old"),
			rotation("access-new", "refresh-new"),
		)
		.await
		.expect("CAS should succeed when refresh tokens match.");

	assert_eq!(outcome, CompareAndSwapOutcome::Updated);

	let fetched = store
		.read(&connection.id)
		.await
		.expect("Reading the updated connection should succeed.")
		.expect("Updated connection should remain present.");

	assert_eq!(fetched.refresh_token.as_ref().map(|secret| secret.expose()), Some("refresh-new"));
	assert_eq!(fetched.last_refresh_at, Some(ISSUED + Duration::minutes(50)));
	assert_eq!(
		fetched.refresh_token_expires_at,
		Some(ISSUED + Duration::minutes(50) + Duration::days(60))
	);

	let mismatch = store
		.compare_and_swap_tokens(&connection.id, Some("refresh-old"), rotation("access-x", "x"))
		.await
		.expect("CAS should report a refresh mismatch when tokens differ.");

	assert_eq!(mismatch, CompareAndSwapOutcome::RefreshMismatch);

	let missing = store
		.compare_and_swap_tokens(&connection_id("conn-unknown"), Some("whatever"), rotation("a", "r"))
		.await
		.expect("CAS should report a missing connection.");

	assert_eq!(missing, CompareAndSwapOutcome::Missing);
}

#[tokio::test]
async fn concurrent_cas_allows_single_winner() {
	let (store, connection) = seeded(Some("refresh-base")).await;
	let mut tasks = Vec::new();

	for label in ["a", "b"] {
		let store = store.clone();
		let id = connection.id.clone();

		tasks.push(tokio::spawn(async move {
			store
				.compare_and_swap_tokens(
					&id,
					Some("refresh-base"),
					rotation(&format!("access-{label}"), &format!("refresh-{label}")),
				)
				.await
				.expect("CAS task should complete successfully.")
		}));
	}

	let mut successes = 0;

	for task in tasks {
		if task.await.expect("CAS task should not panic.") == CompareAndSwapOutcome::Updated {
			successes += 1;
		}
	}

	assert_eq!(successes, 1, "Only one CAS may redeem the same refresh token.");

	let fetched = store
		.read(&connection.id)
		.await
		.expect("Reading the final connection should succeed.")
		.expect("Final connection should remain present.");

	assert!(matches!(
		fetched.refresh_token.as_ref().map(|secret| secret.expose()),
		Some("refresh-a") | Some("refresh-b")
	));
}

#[tokio::test]
async fn rotation_without_new_refresh_token_keeps_the_stored_one() -> color_eyre::Result<()> {
	let (store, connection) = seeded(Some("refresh-kept")).await;
	let patch = ConnectionPatch::rotation(
		&TokenSet::access_only("access-only", Duration::hours(1)),
		ISSUED + Duration::minutes(55),
		Duration::days(60),
	);
	let outcome = store.compare_and_swap_tokens(&connection.id, Some("refresh-kept"), patch).await?;

	assert_eq!(outcome, CompareAndSwapOutcome::Updated);

	let fetched = store.read(&connection.id).await?.ok_or_else(|| {
		color_eyre::eyre::eyre!("Connection should remain present after rotation.")
	})?;

	assert_eq!(fetched.access_token.as_ref().map(|secret| secret.expose()), Some("access-only"));
	assert_eq!(fetched.refresh_token.as_ref().map(|secret| secret.expose()), Some("refresh-kept"));

	Ok(())
}

#[tokio::test]
async fn revocation_clears_tokens_and_deactivates() {
	let (store, connection) = seeded(Some("refresh-doomed")).await;
	let revoked = store
		.update_fields(&connection.id, ConnectionPatch::revocation(ISSUED + Duration::hours(2)))
		.await
		.expect("Update should succeed.")
		.expect("Connection should exist.");

	assert_eq!(revoked.status, ConnectionStatus::Revoked);
	assert!(!revoked.is_usable());
	assert!(revoked.access_token.is_none());
	assert!(revoked.refresh_token.is_none());
	assert_eq!(revoked.revoked_at, Some(ISSUED + Duration::hours(2)));
	assert!(
		store
			.update_fields(
				&connection_id("conn-unknown"),
				ConnectionPatch::status(ConnectionStatus::Stale),
			)
			.await
			.expect("Update should succeed.")
			.is_none()
	);
}
