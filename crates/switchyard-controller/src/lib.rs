//! Switchyard controller service
//!
//! The rendezvous half of the broker: authenticates principals against the
//! directory, keeps the registry of listening exporters, and on `Dial`
//! mints an audience-bound capability token and hands it to both session
//! ends.

pub mod auth;
pub mod registry;
pub mod service;

pub use registry::{ListenEntry, ListenRegistry};
pub use service::ControllerService;
