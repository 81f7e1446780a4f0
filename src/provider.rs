//! Provider-facing descriptors (data) and strategies (behavior).
//!
//! `descriptor` holds validated metadata ([`ProviderDescriptor`]): HTTPS-only endpoints, the
//! client authentication method, and the scope delimiter. `strategy` defines
//! [`ProviderStrategy`], which maps token-endpoint failures onto the gatekeeper's error
//! taxonomy so the token manager can tell a rejected refresh token from a transient outage.

pub mod descriptor;
pub mod strategy;

pub use descriptor::*;
pub use strategy::*;
