//! Switchyard router service
//!
//! The relay half of the broker: authenticates capability tokens, pairs
//! the two arrivals on a stream id, and forwards opaque frames in both
//! directions until either end hangs up.

pub mod auth;
pub mod forward;
pub mod registry;
pub mod service;

pub use registry::{Claim, PendingEntry, PendingRegistry};
pub use service::RouterService;
