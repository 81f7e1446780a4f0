//! Validated identifiers for connections and providers.

// std
use std::{borrow::Borrow, ops::Deref};
// self
use crate::_prelude::*;

macro_rules! def_id {
	($name:ident, $doc:literal, $kind:literal) => {
		#[doc = $doc]
		#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
		#[serde(try_from = "String", into = "String")]
		pub struct $name(String);
		impl $name {
			/// Creates a new identifier after validation.
			pub fn new(value: impl Into<String>) -> Result<Self, IdentifierError> {
				Self::try_from(value.into())
			}
		}
		impl Deref for $name {
			type Target = str;

			fn deref(&self) -> &Self::Target {
				&self.0
			}
		}
		impl Borrow<str> for $name {
			fn borrow(&self) -> &str {
				&self.0
			}
		}
		impl From<$name> for String {
			fn from(value: $name) -> Self {
				value.0
			}
		}
		impl TryFrom<String> for $name {
			type Error = IdentifierError;

			fn try_from(value: String) -> Result<Self, Self::Error> {
				validate($kind, &value)?;

				Ok(Self(value))
			}
		}
		impl Debug for $name {
			fn fmt(&self, f: &mut Formatter) -> FmtResult {
				write!(f, concat!($kind, "({})"), self.0)
			}
		}
		impl Display for $name {
			fn fmt(&self, f: &mut Formatter) -> FmtResult {
				f.write_str(&self.0)
			}
		}
	};
}

const IDENTIFIER_MAX_LEN: usize = 128;

/// Error returned when identifier validation fails.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, ThisError)]
pub enum IdentifierError {
	/// The identifier was empty.
	#[error("{kind} identifier cannot be empty.")]
	Empty {
		/// Kind of identifier (connection, provider).
		kind: &'static str,
	},
	/// The identifier contains whitespace or control characters.
	#[error("{kind} identifier contains whitespace or control characters.")]
	InvalidCharacter {
		/// Kind of identifier (connection, provider).
		kind: &'static str,
	},
	/// The identifier exceeded the allowed length.
	#[error("{kind} identifier exceeds {max} bytes.")]
	TooLong {
		/// Kind of identifier (connection, provider).
		kind: &'static str,
		/// Maximum permitted length.
		max: usize,
	},
}

def_id! { ConnectionId, "Identifier for one authorized connection to the provider.", "Connection" }
def_id! { ProviderId, "Identifier for an OAuth provider descriptor.", "Provider" }

fn validate(kind: &'static str, view: &str) -> Result<(), IdentifierError> {
	if view.is_empty() {
		return Err(IdentifierError::Empty { kind });
	}
	// Identifiers end up inside cache and lock keys, so separators other than `:` are fine but
	// whitespace and control characters are not.
	if view.chars().any(|c| c.is_whitespace() || c.is_control()) {
		return Err(IdentifierError::InvalidCharacter { kind });
	}
	if view.len() > IDENTIFIER_MAX_LEN {
		return Err(IdentifierError::TooLong { kind, max: IDENTIFIER_MAX_LEN });
	}

	Ok(())
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn identifiers_reject_whitespace_and_empty_values() {
		assert!(ConnectionId::new(" conn-1").is_err(), "Leading whitespace must be rejected.");
		assert!(ConnectionId::new("conn\u{0007}1").is_err(), "Control characters must be rejected.");
		assert!(ConnectionId::new("").is_err());
		assert!(ProviderId::new("with space").is_err());

		let id = ConnectionId::new("org-42:primary").expect("Colon-separated ids should be valid.");

		assert_eq!(&*id, "org-42:primary");
		assert_eq!(format!("{id:?}"), "Connection(org-42:primary)");
	}

	#[test]
	fn serde_round_trip_enforces_validation() {
		let id: ConnectionId =
			serde_json::from_str("\"conn-7\"").expect("Connection id should deserialize.");

		assert_eq!(id.to_string(), "conn-7");
		assert!(serde_json::from_str::<ConnectionId>("\"conn 7\"").is_err());
	}

	#[test]
	fn length_limit_is_inclusive() {
		ConnectionId::new("a".repeat(IDENTIFIER_MAX_LEN)).expect("Exact length should succeed.");

		assert!(ConnectionId::new("a".repeat(IDENTIFIER_MAX_LEN + 1)).is_err());
	}

	#[test]
	fn borrow_supports_fast_lookup() {
		let map: HashMap<ConnectionId, u8> = HashMap::from_iter([(
			ConnectionId::new("conn-123").expect("Connection used for lookup should be valid."),
			7_u8,
		)]);

		assert_eq!(map.get("conn-123"), Some(&7));
	}
}
