/**
 * signalling/types.rs
 *
 * Core types for the call signalling channel
 */

use std::fmt;

use super::messages::{IceCandidate, SessionDescription};

/// Which side placed the call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallDirection {
    /// We dialed and send the offer
    Outgoing,
    /// We accepted and send the answer
    Incoming,
}

impl fmt::Display for CallDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallDirection::Outgoing => write!(f, "outgoing"),
            CallDirection::Incoming => write!(f, "incoming"),
        }
    }
}

/// Session state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Idle,
    Connecting,
    Connected,
    Offering,
    Answering,
    IceExchange,
    Active,
    Closed,
    Error,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Closed | SessionState::Error)
    }

    /// A socket is up and messages may flow
    pub fn has_channel(&self) -> bool {
        matches!(
            self,
            SessionState::Connected
                | SessionState::Offering
                | SessionState::Answering
                | SessionState::IceExchange
                | SessionState::Active
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "IDLE",
            SessionState::Connecting => "CONNECTING",
            SessionState::Connected => "CONNECTED",
            SessionState::Offering => "OFFERING",
            SessionState::Answering => "ANSWERING",
            SessionState::IceExchange => "ICE_EXCHANGE",
            SessionState::Active => "ACTIVE",
            SessionState::Closed => "CLOSED",
            SessionState::Error => "ERROR",
        };
        f.write_str(name)
    }
}

/// Events delivered to the call collaborator, in receipt order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Channel ready. Outgoing: create and send the offer. Incoming: an
    /// offer has arrived and follows as `RemoteDescription`.
    ConnectedToRoom { direction: CallDirection },
    RemoteDescription(SessionDescription),
    RemoteIceCandidate(IceCandidate),
    RemoteIceCandidatesRemoved(Vec<IceCandidate>),
    /// Remote end hung up
    ChannelClosed,
    ChannelError(String),
}
