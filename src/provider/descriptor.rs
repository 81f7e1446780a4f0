//! Provider descriptor data and its validating builder.

// self
use crate::{_prelude::*, auth::ProviderId};

/// Client authentication modes for token endpoint calls.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientAuthMethod {
	/// HTTP Basic with `client_id`/`client_secret`.
	#[default]
	ClientSecretBasic,
	/// Form POST body parameters for `client_id`/`client_secret`.
	ClientSecretPost,
	/// Public clients that prove possession via PKCE only.
	NoneWithPkce,
}

/// Immutable description of the OAuth provider behind every connection.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderDescriptor {
	/// Descriptor identifier.
	pub id: ProviderId,
	/// Authorization endpoint used to start a grant.
	pub authorization_endpoint: Url,
	/// Token endpoint used for code exchanges and refreshes.
	pub token_endpoint: Url,
	/// Client authentication mechanism.
	pub client_auth_method: ClientAuthMethod,
	/// Character used to join scopes in the authorize URL.
	pub scope_delimiter: char,
}
impl ProviderDescriptor {
	/// Creates a new builder for the provided identifier.
	pub fn builder(id: ProviderId) -> ProviderDescriptorBuilder {
		ProviderDescriptorBuilder::new(id)
	}
}

/// Errors raised while constructing descriptors.
#[derive(Debug, PartialEq, Eq, ThisError)]
pub enum ProviderDescriptorError {
	/// Authorization endpoint is required.
	#[error("Missing authorization endpoint.")]
	MissingAuthorizationEndpoint,
	/// Token endpoint is required.
	#[error("Missing token endpoint.")]
	MissingTokenEndpoint,
	/// Endpoints must use HTTPS.
	#[error("The {endpoint} endpoint must use HTTPS: {url}.")]
	InsecureEndpoint {
		/// Which endpoint failed validation.
		endpoint: &'static str,
		/// Endpoint URL that failed validation.
		url: String,
	},
	/// Scope delimiters cannot be control characters.
	#[error("Scope delimiter must be a printable character.")]
	InvalidScopeDelimiter {
		/// Invalid delimiter that was supplied.
		delimiter: char,
	},
}

/// Builder for [`ProviderDescriptor`] values.
#[derive(Debug)]
pub struct ProviderDescriptorBuilder {
	id: ProviderId,
	authorization_endpoint: Option<Url>,
	token_endpoint: Option<Url>,
	client_auth_method: ClientAuthMethod,
	scope_delimiter: char,
	allow_insecure_endpoints: bool,
}
impl ProviderDescriptorBuilder {
	fn new(id: ProviderId) -> Self {
		Self {
			id,
			authorization_endpoint: None,
			token_endpoint: None,
			client_auth_method: ClientAuthMethod::default(),
			scope_delimiter: ' ',
			allow_insecure_endpoints: false,
		}
	}

	/// Sets the authorization endpoint.
	pub fn authorization_endpoint(mut self, url: Url) -> Self {
		self.authorization_endpoint = Some(url);

		self
	}

	/// Sets the token endpoint.
	pub fn token_endpoint(mut self, url: Url) -> Self {
		self.token_endpoint = Some(url);

		self
	}

	/// Overrides the client authentication method.
	pub fn client_auth_method(mut self, method: ClientAuthMethod) -> Self {
		self.client_auth_method = method;

		self
	}

	/// Overrides the scope delimiter (defaults to a space).
	pub fn scope_delimiter(mut self, delimiter: char) -> Self {
		self.scope_delimiter = delimiter;

		self
	}

	/// Accepts plain-HTTP endpoints; only meant for local mock servers.
	pub fn allow_insecure_endpoints(mut self) -> Self {
		self.allow_insecure_endpoints = true;

		self
	}

	/// Consumes the builder and validates the resulting descriptor.
	pub fn build(self) -> Result<ProviderDescriptor, ProviderDescriptorError> {
		let authorization_endpoint = self
			.authorization_endpoint
			.ok_or(ProviderDescriptorError::MissingAuthorizationEndpoint)?;
		let token_endpoint =
			self.token_endpoint.ok_or(ProviderDescriptorError::MissingTokenEndpoint)?;

		if !self.allow_insecure_endpoints {
			validate_endpoint("authorization", &authorization_endpoint)?;
			validate_endpoint("token", &token_endpoint)?;
		}
		if self.scope_delimiter.is_control() {
			return Err(ProviderDescriptorError::InvalidScopeDelimiter {
				delimiter: self.scope_delimiter,
			});
		}

		Ok(ProviderDescriptor {
			id: self.id,
			authorization_endpoint,
			token_endpoint,
			client_auth_method: self.client_auth_method,
			scope_delimiter: self.scope_delimiter,
		})
	}
}

fn validate_endpoint(name: &'static str, url: &Url) -> Result<(), ProviderDescriptorError> {
	if url.scheme() != "https" {
		Err(ProviderDescriptorError::InsecureEndpoint { endpoint: name, url: url.to_string() })
	} else {
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	fn url(value: &str) -> Url {
		Url::parse(value).expect("Descriptor URL fixture should parse.")
	}

	fn builder() -> ProviderDescriptorBuilder {
		ProviderDescriptor::builder(ProviderId::new("mock").expect("Provider id should be valid."))
	}

	#[test]
	fn rejects_insecure_and_missing_endpoints() {
		let err = builder()
			.authorization_endpoint(url("http://example.com/auth"))
			.token_endpoint(url("https://example.com/token"))
			.build()
			.expect_err("Plain-HTTP authorization endpoints should be rejected.");

		assert!(matches!(
			err,
			ProviderDescriptorError::InsecureEndpoint { endpoint: "authorization", .. }
		));

		let err = builder()
			.authorization_endpoint(url("https://example.com/auth"))
			.build()
			.expect_err("Missing token endpoints should be rejected.");

		assert_eq!(err, ProviderDescriptorError::MissingTokenEndpoint);
	}

	#[test]
	fn insecure_override_and_custom_delimiter() {
		let descriptor = builder()
			.authorization_endpoint(url("http://127.0.0.1:8080/auth"))
			.token_endpoint(url("http://127.0.0.1:8080/token"))
			.client_auth_method(ClientAuthMethod::ClientSecretPost)
			.scope_delimiter(',')
			.allow_insecure_endpoints()
			.build()
			.expect("Insecure endpoints should be accepted when explicitly allowed.");

		assert_eq!(descriptor.scope_delimiter, ',');
		assert_eq!(descriptor.client_auth_method, ClientAuthMethod::ClientSecretPost);

		let err = builder()
			.authorization_endpoint(url("https://example.com/auth"))
			.token_endpoint(url("https://example.com/token"))
			.scope_delimiter('\n')
			.build()
			.expect_err("Control-character delimiters should be rejected.");

		assert!(matches!(err, ProviderDescriptorError::InvalidScopeDelimiter { .. }));
	}
}
