//! Swarm Feed Adapter
//!
//! Implements the upstream connection to the sportsbook swarm feed:
//!
//! - **session**: one duplex WebSocket with request/reply correlation and
//!   delta routing into the subscription registry
//! - **codec**: inbound frame classification (correlated reply vs delta)
//! - **messages**: command envelopes and query builders
//! - **reconnect**: exponential backoff with jitter
//! - **ring**: rolling 60-second message window

pub mod codec;
pub mod messages;
pub mod reconnect;
pub mod ring;
pub mod session;

pub use codec::{CodecError, SwarmCodec, SwarmFrame};
pub use messages::CommandFrame;
pub use reconnect::Backoff;
pub use ring::RollingWindow;
pub use session::{SessionError, SessionEvent, SessionHealth, SwarmSession};
