//! Token endpoint contract and its `oauth2`-backed implementation.

// std
use std::borrow::Cow;
// crates.io
use oauth2::{
	AuthType, AuthUrl, AuthorizationCode, ClientId, ClientSecret, EndpointNotSet, EndpointSet,
	HttpClientError, PkceCodeVerifier, RedirectUrl, RefreshToken, RequestTokenError,
	TokenResponse, TokenUrl,
	basic::{BasicClient, BasicErrorResponse, BasicRequestTokenError, BasicTokenResponse},
};
// self
#[cfg(feature = "reqwest")] use crate::http::ReqwestHttpClient;
use crate::{
	_prelude::*,
	auth::{TokenSecret, TokenSet},
	error::{ConfigError, TransientError, TransportError},
	http::{ResponseMetadata, ResponseMetadataSlot, TokenHttpClient},
	provider::{
		ClientAuthMethod, DefaultProviderStrategy, ProviderDescriptor, ProviderErrorContext,
		ProviderErrorKind, ProviderStrategy, TokenOperation,
	},
};

type ConfiguredBasicClient =
	BasicClient<EndpointSet, EndpointNotSet, EndpointNotSet, EndpointNotSet, EndpointSet>;

/// Boxed future returned by [`TokenEndpoint`] operations.
pub type TokenFuture<'a> = Pin<Box<dyn Future<Output = Result<TokenSet>> + 'a + Send>>;

/// Provider token endpoint.
///
/// Failures are already classified: [`Error::InvalidGrant`] for rejected codes or refresh
/// tokens, [`Error::InvalidClient`] for bad client credentials, and
/// [`Error::Transient`]/[`Error::Transport`] for anything worth retrying.
pub trait TokenEndpoint
where
	Self: Send + Sync,
{
	/// Exchanges an authorization code for the first token set.
	fn exchange_code<'a>(&'a self, exchange: &'a CodeExchange) -> TokenFuture<'a>;

	/// Redeems a refresh token. Rotating providers invalidate `refresh_token` on success.
	fn refresh<'a>(&'a self, refresh_token: &'a TokenSecret) -> TokenFuture<'a>;
}

/// Authorization-code exchange request.
#[derive(Clone)]
pub struct CodeExchange {
	/// Code returned on the redirect.
	pub code: String,
	/// Redirect URI used when the authorization started.
	pub redirect_uri: Url,
	/// PKCE verifier matching the challenge sent on the authorize URL.
	pub pkce_verifier: Option<String>,
}
impl Debug for CodeExchange {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("CodeExchange")
			.field("code", &"<redacted>")
			.field("redirect_uri", &self.redirect_uri)
			.field("pkce_verifier", &self.pkce_verifier.as_ref().map(|_| "<redacted>"))
			.finish()
	}
}

/// Maps transport failures into gatekeeper [`Error`] values.
pub trait TransportErrorMapper<E>
where
	Self: 'static + Send + Sync,
	E: 'static + Send + Sync + StdError,
{
	/// Converts an [`HttpClientError`] emitted by the transport.
	fn map_transport_error(
		&self,
		operation: TokenOperation,
		metadata: Option<&ResponseMetadata>,
		error: HttpClientError<E>,
	) -> Error;
}

/// Default mapper for `reqwest` transports.
#[cfg(feature = "reqwest")]
#[derive(Clone, Debug, Default)]
pub struct ReqwestTransportErrorMapper;
#[cfg(feature = "reqwest")]
impl TransportErrorMapper<ReqwestError> for ReqwestTransportErrorMapper {
	fn map_transport_error(
		&self,
		operation: TokenOperation,
		meta: Option<&ResponseMetadata>,
		err: HttpClientError<ReqwestError>,
	) -> Error {
		match err {
			HttpClientError::Reqwest(inner) => map_reqwest_error(operation, meta, *inner),
			HttpClientError::Http(inner) => ConfigError::from(inner).into(),
			HttpClientError::Io(inner) => TransportError::Io(inner).into(),
			HttpClientError::Other(message) => transient(meta, message),
			_ => transient(meta, "unknown transport failure"),
		}
	}
}

/// [`OAuth2Endpoint`] over `reqwest`.
#[cfg(feature = "reqwest")]
pub type ReqwestEndpoint = OAuth2Endpoint<ReqwestHttpClient, ReqwestTransportErrorMapper>;

/// [`TokenEndpoint`] driving a standard OAuth 2.0 provider through the `oauth2` crate.
pub struct OAuth2Endpoint<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	oauth_client: ConfiguredBasicClient,
	http_client: Arc<C>,
	error_mapper: Arc<M>,
	strategy: Arc<dyn ProviderStrategy>,
}
impl<C, M> OAuth2Endpoint<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// Builds the endpoint from a provider descriptor.
	///
	/// `client_secret` is ignored for [`ClientAuthMethod::NoneWithPkce`] providers.
	pub fn from_descriptor(
		descriptor: &ProviderDescriptor,
		client_id: &str,
		client_secret: Option<&str>,
		http_client: impl Into<Arc<C>>,
		error_mapper: impl Into<Arc<M>>,
	) -> Result<Self> {
		let auth_url = AuthUrl::new(descriptor.authorization_endpoint.to_string())
			.map_err(|source| ConfigError::InvalidDescriptor { source })?;
		let token_url = TokenUrl::new(descriptor.token_endpoint.to_string())
			.map_err(|source| ConfigError::InvalidDescriptor { source })?;
		let mut oauth_client = BasicClient::new(ClientId::new(client_id.to_owned()))
			.set_auth_uri(auth_url)
			.set_token_uri(token_url);

		if let Some(secret) =
			client_secret.filter(|_| descriptor.client_auth_method != ClientAuthMethod::NoneWithPkce)
		{
			oauth_client = oauth_client.set_client_secret(ClientSecret::new(secret.to_owned()));
		}
		if descriptor.client_auth_method == ClientAuthMethod::ClientSecretPost {
			oauth_client = oauth_client.set_auth_type(AuthType::RequestBody);
		}

		Ok(Self {
			oauth_client,
			http_client: http_client.into(),
			error_mapper: error_mapper.into(),
			strategy: Arc::new(DefaultProviderStrategy),
		})
	}

	/// Replaces the error classification strategy.
	pub fn with_strategy(mut self, strategy: Arc<dyn ProviderStrategy>) -> Self {
		self.strategy = strategy;

		self
	}

	fn map_error(
		&self,
		operation: TokenOperation,
		meta: Option<ResponseMetadata>,
		err: BasicRequestTokenError<HttpClientError<C::TransportError>>,
	) -> Error {
		let meta = meta.as_ref();

		match err {
			RequestTokenError::ServerResponse(response) =>
				map_server_response(self.strategy.as_ref(), operation, &response, meta),
			RequestTokenError::Request(error) =>
				self.error_mapper.map_transport_error(operation, meta, error),
			RequestTokenError::Parse(source, _body) =>
				TransientError::TokenResponseParse { source, status: meta_status(meta) }.into(),
			RequestTokenError::Other(message) => transient(meta, message),
		}
	}
}
#[cfg(feature = "reqwest")]
impl OAuth2Endpoint<ReqwestHttpClient, ReqwestTransportErrorMapper> {
	/// Builds a `reqwest` endpoint with a default client.
	pub fn reqwest(
		descriptor: &ProviderDescriptor,
		client_id: &str,
		client_secret: Option<&str>,
	) -> Result<Self> {
		Self::from_descriptor(
			descriptor,
			client_id,
			client_secret,
			ReqwestHttpClient::default(),
			ReqwestTransportErrorMapper,
		)
	}
}
impl<C, M> TokenEndpoint for OAuth2Endpoint<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	fn exchange_code<'a>(&'a self, exchange: &'a CodeExchange) -> TokenFuture<'a> {
		Box::pin(async move {
			let meta = ResponseMetadataSlot::default();
			let handle = self.http_client.with_metadata(meta.clone());
			let redirect_url = RedirectUrl::new(exchange.redirect_uri.to_string())
				.map_err(|source| ConfigError::InvalidRedirect { source })?;
			let mut request = self
				.oauth_client
				.exchange_code(AuthorizationCode::new(exchange.code.clone()))
				.set_redirect_uri(Cow::Owned(redirect_url));

			if let Some(verifier) = &exchange.pkce_verifier {
				request = request.set_pkce_verifier(PkceCodeVerifier::new(verifier.clone()));
			}

			let response = request
				.request_async(&handle)
				.await
				.map_err(|e| self.map_error(TokenOperation::CodeExchange, meta.take(), e))?;

			token_set(&response)
		})
	}

	fn refresh<'a>(&'a self, refresh_token: &'a TokenSecret) -> TokenFuture<'a> {
		Box::pin(async move {
			let meta = ResponseMetadataSlot::default();
			let handle = self.http_client.with_metadata(meta.clone());
			let secret = RefreshToken::new(refresh_token.expose().to_owned());
			let response = self
				.oauth_client
				.exchange_refresh_token(&secret)
				.request_async(&handle)
				.await
				.map_err(|e| self.map_error(TokenOperation::Refresh, meta.take(), e))?;

			token_set(&response)
		})
	}
}
impl<C, M> Debug for OAuth2Endpoint<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("OAuth2Endpoint")
			.field("token_url", &self.oauth_client.token_uri().url().as_str())
			.finish_non_exhaustive()
	}
}

fn token_set(response: &BasicTokenResponse) -> Result<TokenSet> {
	let expires_in = response.expires_in().ok_or(ConfigError::MissingExpiresIn)?.as_secs();
	let expires_in = i64::try_from(expires_in).map_err(|_| ConfigError::ExpiresInOutOfRange)?;

	if expires_in <= 0 {
		return Err(ConfigError::NonPositiveExpiresIn.into());
	}

	let access = response.access_token().secret().to_owned();
	let expires_in = Duration::seconds(expires_in);

	Ok(match response.refresh_token() {
		Some(refresh) => TokenSet::new(access, refresh.secret().to_owned(), expires_in),
		None => TokenSet::access_only(access, expires_in),
	})
}

fn map_server_response(
	strategy: &dyn ProviderStrategy,
	operation: TokenOperation,
	response: &BasicErrorResponse,
	meta: Option<&ResponseMetadata>,
) -> Error {
	let code = response.error().as_ref().to_string();
	let mut ctx = ProviderErrorContext::new(operation).with_oauth_error(code.clone());

	if let Some(description) = response.error_description() {
		ctx = ctx.with_error_description(description.clone());
	}
	if let Some(status) = meta_status(meta) {
		ctx = ctx.with_http_status(status);
	}

	let message = match response.error_description() {
		Some(description) => format!("{code} ({description})"),
		None => code,
	};

	match strategy.classify_token_error(&ctx) {
		ProviderErrorKind::InvalidGrant => Error::InvalidGrant { reason: message },
		ProviderErrorKind::InvalidClient => Error::InvalidClient { reason: message },
		ProviderErrorKind::Transient => TransientError::TokenEndpoint {
			message,
			status: meta_status(meta),
			retry_after: meta.and_then(|value| value.retry_after),
		}
		.into(),
	}
}

#[cfg(feature = "reqwest")]
fn map_reqwest_error(
	operation: TokenOperation,
	meta: Option<&ResponseMetadata>,
	err: ReqwestError,
) -> Error {
	if err.is_builder() {
		return ConfigError::from(err).into();
	}
	if err.is_timeout() {
		tracing::debug!(operation = %operation, "Token endpoint request timed out.");

		return TransientError::TokenEndpoint {
			message: "request timed out".into(),
			status: meta_status(meta).or_else(|| err.status().map(|code| code.as_u16())),
			retry_after: meta.and_then(|value| value.retry_after),
		}
		.into();
	}

	TransportError::from(err).into()
}

fn transient(meta: Option<&ResponseMetadata>, message: impl Display) -> Error {
	TransientError::TokenEndpoint {
		message: message.to_string(),
		status: meta_status(meta),
		retry_after: meta.and_then(|value| value.retry_after),
	}
	.into()
}

fn meta_status(meta: Option<&ResponseMetadata>) -> Option<u16> {
	meta.and_then(|value| value.status)
}

#[cfg(all(test, feature = "reqwest"))]
mod tests {
	// self
	use super::*;
	use crate::auth::ProviderId;

	fn descriptor(method: ClientAuthMethod) -> ProviderDescriptor {
		ProviderDescriptor::builder(
			ProviderId::new("accounting").expect("Provider fixture should be valid."),
		)
		.authorization_endpoint(
			Url::parse("https://login.example.com/authorize")
				.expect("Authorization endpoint fixture should parse."),
		)
		.token_endpoint(
			Url::parse("https://identity.example.com/token")
				.expect("Token endpoint fixture should parse."),
		)
		.client_auth_method(method)
		.build()
		.expect("Descriptor fixture should build.")
	}

	#[test]
	fn builds_for_every_client_auth_method() {
		for method in [
			ClientAuthMethod::ClientSecretBasic,
			ClientAuthMethod::ClientSecretPost,
			ClientAuthMethod::NoneWithPkce,
		] {
			let endpoint = ReqwestEndpoint::reqwest(&descriptor(method), "client", Some("secret"))
				.expect("Endpoint should build for every auth method.");

			assert!(format!("{endpoint:?}").contains("identity.example.com"));
		}
	}

	#[test]
	fn server_errors_follow_the_strategy() {
		let response = BasicErrorResponse::new(
			oauth2::basic::BasicErrorResponseType::InvalidGrant,
			Some("Refresh token was already used".into()),
			None,
		);
		let meta = ResponseMetadata { status: Some(400), retry_after: None };
		let err = map_server_response(
			&DefaultProviderStrategy,
			TokenOperation::Refresh,
			&response,
			Some(&meta),
		);

		assert!(matches!(err, Error::InvalidGrant { ref reason } if reason.contains("already used")));

		let response = BasicErrorResponse::new(
			oauth2::basic::BasicErrorResponseType::Extension("temporarily_unavailable".into()),
			None,
			None,
		);
		let meta = ResponseMetadata { status: Some(503), retry_after: Some(Duration::seconds(7)) };
		let err = map_server_response(
			&DefaultProviderStrategy,
			TokenOperation::Refresh,
			&response,
			Some(&meta),
		);

		assert!(err.is_retryable());
		assert!(matches!(
			err,
			Error::Transient(ref e) if e.retry_after() == Some(Duration::seconds(7))
		));
	}
}
