//! Dual-window (per-minute, per-day) quota tracking shared across processes.
//!
//! Three sources feed every check: the state persisted in a [`RateLimitStore`], a short-lived
//! snapshot in a [`SharedCache`], and headers observed on the latest response. They are merged
//! most-restrictive-wins so one process never undercounts usage another process already saw.
//!
//! [`RateLimitStore`]: crate::store::RateLimitStore
//! [`SharedCache`]: crate::cache::SharedCache

pub mod headers;
pub mod state;
pub mod tracker;
pub mod warning;

pub use headers::*;
pub use state::*;
pub use tracker::*;
pub use warning::*;
