//! DevTools-protocol bridge for webtap.
//!
//! [`transport::CdpTransport`] is the only seam to the debugged browser; the
//! engine is specified against it, never against a concrete client. The
//! [`bridge::CdpBridge`] pumps raw transport notifications onto a bounded
//! queue and drains them through a typed demux, so the transport loop never
//! blocks on correlation work.

pub mod bridge;
pub mod error;
pub mod metrics;
pub mod params;
pub mod transport;

pub use bridge::{BridgeConfig, CdpBridge, NotificationSink, SessionResolver};
pub use error::BridgeError;
pub use transport::{CommandTarget, CdpTransport, MockTransport, NoopTransport, TransportEvent};
