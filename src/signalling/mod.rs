/**
 * signalling/mod.rs
 *
 * Direct-dial call signalling: connection racing, wire framing and the
 * offer/answer/ICE session state machine
 */

mod codec;
mod dialer;
mod messages;
mod session;
mod state;
mod types;

pub use codec::{CodecError, SignallingCodec, MAX_FRAME_LEN, PROTOCOL_VERSION};
pub use dialer::{ConnectionDialer, DialConfig, DialFailure, Dialed};
pub use messages::{IceCandidate, MessageKind, SdpType, SessionDescription, SignallingMessage};
pub use session::{SessionError, SessionEvents, SignallingSession};
pub use state::{InvalidState, Outbound, ProtocolError, StateMachine};
pub use types::{CallDirection, SessionEvent, SessionState};
