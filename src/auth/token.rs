//! Token secrets and the token sets issued by provider exchanges.

pub mod secret;
pub mod set;
