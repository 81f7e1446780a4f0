//! Authorization Code + PKCE handshake state for establishing a new connection.

// crates.io
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::{Rng, distr::Alphanumeric};
use sha2::{Digest, Sha256};
// self
use crate::{_prelude::*, auth::ConnectionId, provider::ProviderDescriptor};

const STATE_LEN: usize = 32;
const PKCE_VERIFIER_LEN: usize = 64;

/// Handshake metadata returned by
/// [`TokenManager::start_authorization`](crate::lifecycle::TokenManager::start_authorization).
///
/// Keep the session server-side until the provider redirects back; the PKCE verifier never
/// leaves it.
#[derive(Clone)]
pub struct AuthorizationSession {
	/// Connection the grant will be attached to.
	pub connection: ConnectionId,
	/// Requested scopes.
	pub scopes: Vec<String>,
	/// Opaque state value that must round-trip via the redirect handler.
	pub state: String,
	/// Redirect URI supplied when constructing the authorize URL.
	pub redirect_uri: Url,
	/// Authorize URL that end-users should be sent to.
	pub authorize_url: Url,
	pkce_verifier: String,
	pkce_challenge: String,
}
impl AuthorizationSession {
	/// PKCE code challenge (S256) derived from the secret verifier.
	pub fn code_challenge(&self) -> &str {
		&self.pkce_challenge
	}

	/// Validates the returned `state` parameter after the authorization redirect.
	pub fn validate_state(&self, returned_state: &str) -> Result<()> {
		if returned_state == self.state {
			Ok(())
		} else {
			Err(Error::InvalidGrant { reason: "Authorization state mismatch".into() })
		}
	}

	pub(crate) fn pkce_verifier(&self) -> &str {
		&self.pkce_verifier
	}
}
impl Debug for AuthorizationSession {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("AuthorizationSession")
			.field("connection", &self.connection)
			.field("scopes", &self.scopes)
			.field("state", &self.state)
			.field("redirect_uri", &self.redirect_uri)
			.field("authorize_url", &self.authorize_url)
			.field("code_challenge", &self.pkce_challenge)
			.finish()
	}
}

pub(crate) fn build_session(
	descriptor: &ProviderDescriptor,
	client_id: &str,
	connection: ConnectionId,
	scopes: Vec<String>,
	redirect_uri: Url,
) -> AuthorizationSession {
	let state = random_string(STATE_LEN);
	let pkce_verifier = random_string(PKCE_VERIFIER_LEN);
	let pkce_challenge = compute_pkce_challenge(&pkce_verifier);
	let mut authorize_url = descriptor.authorization_endpoint.clone();

	{
		let mut pairs = authorize_url.query_pairs_mut();

		pairs.append_pair("response_type", "code");
		pairs.append_pair("client_id", client_id);
		pairs.append_pair("redirect_uri", redirect_uri.as_str());

		if !scopes.is_empty() {
			pairs.append_pair("scope", &scopes.join(&descriptor.scope_delimiter.to_string()));
		}

		pairs.append_pair("state", &state);
		pairs.append_pair("code_challenge", &pkce_challenge);
		pairs.append_pair("code_challenge_method", "S256");
	}

	AuthorizationSession {
		connection,
		scopes,
		state,
		redirect_uri,
		authorize_url,
		pkce_verifier,
		pkce_challenge,
	}
}

/// Random alphanumeric string used for state values and lock holder tokens.
pub(crate) fn random_string(len: usize) -> String {
	rand::rng().sample_iter(Alphanumeric).take(len).map(char::from).collect()
}

fn compute_pkce_challenge(verifier: &str) -> String {
	let digest = Sha256::digest(verifier.as_bytes());

	URL_SAFE_NO_PAD.encode(digest)
}
