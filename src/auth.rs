//! Connection-domain identifiers, token material, and the connection lifecycle model.

pub mod connection;
pub mod id;
pub mod session;
pub mod token;

pub use connection::*;
pub use id::*;
pub use session::*;
pub use token::{secret::*, set::*};
