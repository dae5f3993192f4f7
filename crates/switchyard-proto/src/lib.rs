//! Protocol buffer definitions for switchyard controller-router sessions.
//!
//! This crate provides the gRPC service and message definitions for the two
//! halves of a rendezvous session:
//!
//! - **Controller**: exporters register and hold a long-lived `Listen`
//!   stream; clients `Dial` an exporter by name and receive a capability
//!   token bound to a freshly minted stream id.
//! - **Router**: both ends call `Stream` with the same capability token and
//!   the router bridges the two byte streams.
//!
//! # Communication Flow
//!
//! ```text
//! ┌──────────┐  Listen (stream)   ┌────────────┐   Dial (unary)  ┌────────┐
//! │ Exporter │───────────────────►│ Controller │◄────────────────│ Client │
//! └────┬─────┘  ◄── offer ────────└────────────┘──── offer ────► └───┬────┘
//!      │                                                             │
//!      │            Stream (bidi, capability token)                  │
//!      └──────────────────────►┌────────┐◄───────────────────────────┘
//!                              │ Router │  pairs by stream id,
//!                              └────────┘  forwards frames both ways
//! ```
//!
//! All connections are initiated **outbound**: exporters never accept
//! inbound connections, which makes the rendezvous work across NAT.

// Generated protobuf code doesn't have docs
#![allow(missing_docs)]

/// Generated protobuf types from switchyard.proto
pub mod v1 {
    tonic::include_proto!("switchyard.v1");
}

pub use v1::*;

/// Path prefix under which the router exposes session streams.
///
/// A capability token's local audience has the shape
/// `https://<routerEndpoint>/stream/<streamId>`; the suffix after this
/// prefix is the stream id used for pairing.
pub const STREAM_PATH_PREFIX: &str = "/stream/";

/// Build the audience URL for a session stream.
///
/// The same string is used by the controller when requesting the token and
/// by the router when filtering audiences, so the two services must agree
/// on `endpoint` exactly.
///
/// # Examples
///
/// ```
/// use switchyard_proto::stream_audience;
///
/// assert_eq!(
///     stream_audience("router.example.com:8083", "b5c1"),
///     "https://router.example.com:8083/stream/b5c1",
/// );
/// ```
pub fn stream_audience(endpoint: &str, stream_id: &str) -> String {
    format!("https://{endpoint}{STREAM_PATH_PREFIX}{stream_id}")
}

/// Extract the stream id from an audience URL path.
///
/// Returns `None` if the path is not under [`STREAM_PATH_PREFIX`] or the
/// suffix is empty.
///
/// # Examples
///
/// ```
/// use switchyard_proto::stream_id_from_path;
///
/// assert_eq!(stream_id_from_path("/stream/b5c1"), Some("b5c1"));
/// assert_eq!(stream_id_from_path("/stream/"), None);
/// assert_eq!(stream_id_from_path("/other/b5c1"), None);
/// ```
pub fn stream_id_from_path(path: &str) -> Option<&str> {
    path.strip_prefix(STREAM_PATH_PREFIX).filter(|id| !id.is_empty())
}
