/**
 * signalling/state.rs
 *
 * Transition logic for a signalling session, kept free of I/O so the
 * session task only has to move bytes and forward whatever events this
 * produces.
 *
 * ```text
 *  outgoing: IDLE -> CONNECTING -> CONNECTED -> OFFERING  -> ICE_EXCHANGE -> ACTIVE
 *  incoming:          IDLE      -> CONNECTED -> ANSWERING -> ICE_EXCHANGE -> ACTIVE
 *                           any non-terminal -> CLOSED | ERROR
 * ```
 *
 * Remote candidates that show up before the offer/answer pair is complete
 * are held back and released right after the remote description (outgoing)
 * or right after our answer goes out (incoming).
 */

use thiserror::Error;

use super::messages::{MessageKind, SdpType, SessionDescription, SignallingMessage};
use super::types::{CallDirection, SessionEvent, SessionState};

/// Remote candidate events held before the offer/answer exchange completes
pub const MAX_QUEUED: usize = 256;

/// A local operation the current state does not allow
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cannot {operation} in state {state}")]
pub struct InvalidState {
    pub operation: &'static str,
    pub state: SessionState,
}

/// Why the remote side broke the session
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("{0}")]
    Malformed(String),

    #[error("unexpected {message} in state {state}")]
    Unexpected {
        message: MessageKind,
        state: SessionState,
    },

    #[error("peer reported error: {0}")]
    Remote(String),

    #[error("more than {0} candidates before the offer/answer exchange")]
    QueueFull(usize),
}

/// What to do with an outbound message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outbound {
    Send,
    /// Session already over, drop it quietly
    Discard,
}

#[derive(Debug)]
pub struct StateMachine {
    direction: CallDirection,
    state: SessionState,
    queued: Vec<SessionEvent>,
}

impl StateMachine {
    pub fn new(direction: CallDirection) -> Self {
        Self {
            direction,
            state: SessionState::Idle,
            queued: Vec::new(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn direction(&self) -> CallDirection {
        self.direction
    }

    /// Number of remote candidate events waiting for the description exchange
    pub fn queued(&self) -> usize {
        self.queued.len()
    }

    /// Outgoing only: the dialer has started
    pub fn begin_dial(&mut self) -> Result<(), InvalidState> {
        match (self.direction, self.state) {
            (CallDirection::Outgoing, SessionState::Idle) => {
                self.state = SessionState::Connecting;
                Ok(())
            }
            _ => Err(self.invalid("begin dialing")),
        }
    }

    /// The TCP socket is up
    pub fn socket_connected(&mut self) -> Result<Vec<SessionEvent>, InvalidState> {
        match (self.direction, self.state) {
            (CallDirection::Outgoing, SessionState::Connecting) => {
                self.state = SessionState::Connected;
                Ok(vec![SessionEvent::ConnectedToRoom {
                    direction: CallDirection::Outgoing,
                }])
            }
            // Incoming calls announce themselves once the offer is in
            (CallDirection::Incoming, SessionState::Idle) => {
                self.state = SessionState::Connected;
                Ok(Vec::new())
            }
            _ => Err(self.invalid("attach a socket")),
        }
    }

    /// Check an outbound message against the current state and apply the
    /// transition it causes. Returned events must be delivered after the
    /// message has been written.
    pub fn prepare_send(
        &mut self,
        kind: MessageKind,
    ) -> Result<(Outbound, Vec<SessionEvent>), InvalidState> {
        if self.state.is_terminal() {
            return Ok((Outbound::Discard, Vec::new()));
        }

        let state = self.state;
        match kind {
            MessageKind::Offer => {
                if self.direction == CallDirection::Outgoing && state == SessionState::Connected {
                    self.state = SessionState::Offering;
                    return Ok((Outbound::Send, Vec::new()));
                }
                Err(self.invalid("send an offer"))
            }
            MessageKind::Answer => {
                if self.direction == CallDirection::Incoming && state == SessionState::Answering {
                    self.state = SessionState::IceExchange;
                    return Ok((Outbound::Send, std::mem::take(&mut self.queued)));
                }
                Err(self.invalid("send an answer"))
            }
            MessageKind::Candidate | MessageKind::CandidateRemoval => {
                if state.has_channel() {
                    return Ok((Outbound::Send, Vec::new()));
                }
                Err(self.invalid("send candidates"))
            }
            MessageKind::Bye | MessageKind::Error => {
                if state.has_channel() {
                    return Ok((Outbound::Send, Vec::new()));
                }
                Ok((Outbound::Discard, Vec::new()))
            }
        }
    }

    /// Apply a message received from the peer. On error the machine is in
    /// ERROR and the caller should report and tear down.
    pub fn on_message(
        &mut self,
        msg: SignallingMessage,
    ) -> Result<Vec<SessionEvent>, ProtocolError> {
        if self.state.is_terminal() {
            return Ok(Vec::new());
        }

        let result = self.dispatch(msg);
        if result.is_err() {
            self.state = SessionState::Error;
            self.queued.clear();
        }
        result
    }

    fn dispatch(&mut self, msg: SignallingMessage) -> Result<Vec<SessionEvent>, ProtocolError> {
        let kind = msg.kind();
        let unexpected = ProtocolError::Unexpected {
            message: kind,
            state: self.state,
        };

        if !self.state.has_channel() {
            return Err(unexpected);
        }

        match msg {
            SignallingMessage::Offer { sdp } => {
                if self.direction != CallDirection::Incoming || self.state != SessionState::Connected {
                    return Err(unexpected);
                }
                self.state = SessionState::Answering;
                Ok(vec![
                    SessionEvent::ConnectedToRoom {
                        direction: CallDirection::Incoming,
                    },
                    SessionEvent::RemoteDescription(SessionDescription {
                        sdp_type: SdpType::Offer,
                        sdp,
                    }),
                ])
            }
            SignallingMessage::Answer { sdp } => {
                if self.direction != CallDirection::Outgoing || self.state != SessionState::Offering {
                    return Err(unexpected);
                }
                self.state = SessionState::IceExchange;
                let mut events = vec![SessionEvent::RemoteDescription(SessionDescription {
                    sdp_type: SdpType::Answer,
                    sdp,
                })];
                events.append(&mut self.queued);
                Ok(events)
            }
            SignallingMessage::Candidate(candidate) => {
                self.deliver_or_queue(SessionEvent::RemoteIceCandidate(candidate))
            }
            SignallingMessage::CandidateRemoval { candidates } => {
                self.deliver_or_queue(SessionEvent::RemoteIceCandidatesRemoved(candidates))
            }
            SignallingMessage::Bye => {
                self.state = SessionState::Closed;
                self.queued.clear();
                Ok(vec![SessionEvent::ChannelClosed])
            }
            SignallingMessage::Error { reason } => Err(ProtocolError::Remote(reason)),
        }
    }

    fn deliver_or_queue(
        &mut self,
        event: SessionEvent,
    ) -> Result<Vec<SessionEvent>, ProtocolError> {
        match self.state {
            SessionState::IceExchange | SessionState::Active => Ok(vec![event]),
            _ if self.queued.len() >= MAX_QUEUED => Err(ProtocolError::QueueFull(MAX_QUEUED)),
            _ => {
                self.queued.push(event);
                Ok(Vec::new())
            }
        }
    }

    /// The media engine reports the call is up
    pub fn media_connected(&mut self) -> Result<(), InvalidState> {
        match self.state {
            SessionState::IceExchange | SessionState::Active => {
                self.state = SessionState::Active;
                Ok(())
            }
            _ => Err(self.invalid("mark media connected")),
        }
    }

    /// Socket reached EOF without a bye
    pub fn remote_closed(&mut self) -> Vec<SessionEvent> {
        if self.state.is_terminal() {
            return Vec::new();
        }
        self.state = SessionState::Closed;
        self.queued.clear();
        vec![SessionEvent::ChannelClosed]
    }

    /// Socket or local failure
    pub fn fail(&mut self, description: impl Into<String>) -> Vec<SessionEvent> {
        if self.state.is_terminal() {
            return Vec::new();
        }
        self.state = SessionState::Error;
        self.queued.clear();
        vec![SessionEvent::ChannelError(description.into())]
    }

    /// Local hang up. Returns false if already terminal.
    pub fn close(&mut self) -> bool {
        if self.state.is_terminal() {
            return false;
        }
        self.state = SessionState::Closed;
        self.queued.clear();
        true
    }

    fn invalid(&self, operation: &'static str) -> InvalidState {
        InvalidState {
            operation,
            state: self.state,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signalling::messages::IceCandidate;

    fn ice(n: u32) -> IceCandidate {
        IceCandidate {
            sdp_mid: "0".to_string(),
            sdp_mline_index: 0,
            sdp: format!("candidate:{n} 1 udp 1 10.0.0.{n} 5000 typ host"),
        }
    }

    fn outgoing_connected() -> StateMachine {
        let mut m = StateMachine::new(CallDirection::Outgoing);
        m.begin_dial().unwrap();
        let events = m.socket_connected().unwrap();
        assert_eq!(
            events,
            vec![SessionEvent::ConnectedToRoom {
                direction: CallDirection::Outgoing
            }]
        );
        m
    }

    fn incoming_connected() -> StateMachine {
        let mut m = StateMachine::new(CallDirection::Incoming);
        assert!(m.socket_connected().unwrap().is_empty());
        m
    }

    #[test]
    fn test_outgoing_happy_path() {
        let mut m = outgoing_connected();
        assert_eq!(m.state(), SessionState::Connected);

        let (out, events) = m.prepare_send(MessageKind::Offer).unwrap();
        assert_eq!(out, Outbound::Send);
        assert!(events.is_empty());
        assert_eq!(m.state(), SessionState::Offering);

        let events = m.on_message(SignallingMessage::Answer { sdp: "a".into() }).unwrap();
        assert_eq!(
            events,
            vec![SessionEvent::RemoteDescription(SessionDescription {
                sdp_type: SdpType::Answer,
                sdp: "a".into()
            })]
        );
        assert_eq!(m.state(), SessionState::IceExchange);

        m.media_connected().unwrap();
        assert_eq!(m.state(), SessionState::Active);
        m.media_connected().unwrap();

        let events = m.on_message(SignallingMessage::Bye).unwrap();
        assert_eq!(events, vec![SessionEvent::ChannelClosed]);
        assert_eq!(m.state(), SessionState::Closed);
    }

    #[test]
    fn test_incoming_happy_path() {
        let mut m = incoming_connected();
        assert!(m.prepare_send(MessageKind::Answer).is_err());

        let events = m.on_message(SignallingMessage::Offer { sdp: "o".into() }).unwrap();
        assert_eq!(
            events,
            vec![
                SessionEvent::ConnectedToRoom {
                    direction: CallDirection::Incoming
                },
                SessionEvent::RemoteDescription(SessionDescription {
                    sdp_type: SdpType::Offer,
                    sdp: "o".into()
                }),
            ]
        );
        assert_eq!(m.state(), SessionState::Answering);

        let (out, _) = m.prepare_send(MessageKind::Answer).unwrap();
        assert_eq!(out, Outbound::Send);
        assert_eq!(m.state(), SessionState::IceExchange);
    }

    #[test]
    fn test_early_candidates_are_queued_outgoing() {
        let mut m = outgoing_connected();

        // Before the offer even goes out
        assert!(m.on_message(SignallingMessage::Candidate(ice(1))).unwrap().is_empty());
        m.prepare_send(MessageKind::Offer).unwrap();
        assert!(m
            .on_message(SignallingMessage::CandidateRemoval {
                candidates: vec![ice(1)]
            })
            .unwrap()
            .is_empty());
        assert!(m.on_message(SignallingMessage::Candidate(ice(2))).unwrap().is_empty());
        assert_eq!(m.queued(), 3);

        let events = m.on_message(SignallingMessage::Answer { sdp: "a".into() }).unwrap();
        assert_eq!(events.len(), 4);
        assert!(matches!(events[0], SessionEvent::RemoteDescription(_)));
        assert_eq!(events[1], SessionEvent::RemoteIceCandidate(ice(1)));
        assert_eq!(events[2], SessionEvent::RemoteIceCandidatesRemoved(vec![ice(1)]));
        assert_eq!(events[3], SessionEvent::RemoteIceCandidate(ice(2)));
        assert_eq!(m.queued(), 0);

        let events = m.on_message(SignallingMessage::Candidate(ice(3))).unwrap();
        assert_eq!(events, vec![SessionEvent::RemoteIceCandidate(ice(3))]);
    }

    #[test]
    fn test_early_candidates_are_queued_incoming() {
        let mut m = incoming_connected();
        assert!(m.on_message(SignallingMessage::Candidate(ice(1))).unwrap().is_empty());
        m.on_message(SignallingMessage::Offer { sdp: "o".into() }).unwrap();
        assert!(m.on_message(SignallingMessage::Candidate(ice(2))).unwrap().is_empty());

        let (_, events) = m.prepare_send(MessageKind::Answer).unwrap();
        assert_eq!(
            events,
            vec![
                SessionEvent::RemoteIceCandidate(ice(1)),
                SessionEvent::RemoteIceCandidate(ice(2)),
            ]
        );
    }

    #[test]
    fn test_early_candidate_queue_is_bounded() {
        let mut m = incoming_connected();
        for n in 0..MAX_QUEUED as u32 {
            assert!(m.on_message(SignallingMessage::Candidate(ice(n))).unwrap().is_empty());
        }
        assert_eq!(m.queued(), MAX_QUEUED);

        let err = m
            .on_message(SignallingMessage::CandidateRemoval {
                candidates: vec![ice(1)],
            })
            .unwrap_err();
        assert_eq!(err, ProtocolError::QueueFull(MAX_QUEUED));
        assert_eq!(m.state(), SessionState::Error);
        assert_eq!(m.queued(), 0);
    }

    #[test]
    fn test_wrong_first_message_is_protocol_error() {
        let mut m = outgoing_connected();
        let err = m.on_message(SignallingMessage::Offer { sdp: "o".into() }).unwrap_err();
        assert_eq!(
            err,
            ProtocolError::Unexpected {
                message: MessageKind::Offer,
                state: SessionState::Connected
            }
        );
        assert_eq!(m.state(), SessionState::Error);
        assert_eq!(err.to_string(), "unexpected offer in state CONNECTED");

        let mut m = incoming_connected();
        assert!(m.on_message(SignallingMessage::Answer { sdp: "a".into() }).is_err());
        assert_eq!(m.state(), SessionState::Error);

        // Second offer
        let mut m = incoming_connected();
        m.on_message(SignallingMessage::Offer { sdp: "o".into() }).unwrap();
        assert!(m.on_message(SignallingMessage::Offer { sdp: "o".into() }).is_err());
    }

    #[test]
    fn test_remote_error_frame() {
        let mut m = outgoing_connected();
        m.on_message(SignallingMessage::Candidate(ice(1))).unwrap();
        let err = m
            .on_message(SignallingMessage::Error { reason: "busy".into() })
            .unwrap_err();
        assert_eq!(err, ProtocolError::Remote("busy".into()));
        assert_eq!(m.state(), SessionState::Error);
        assert_eq!(m.queued(), 0);
    }

    #[test]
    fn test_sends_validated() {
        let mut m = outgoing_connected();
        let err = m.prepare_send(MessageKind::Answer).unwrap_err();
        assert_eq!(err.to_string(), "cannot send an answer in state CONNECTED");
        // Rejected sends leave the session alone
        assert_eq!(m.state(), SessionState::Connected);

        assert_eq!(m.prepare_send(MessageKind::Candidate).unwrap().0, Outbound::Send);
        m.prepare_send(MessageKind::Offer).unwrap();
        assert!(m.prepare_send(MessageKind::Offer).is_err());

        let mut idle = StateMachine::new(CallDirection::Outgoing);
        assert!(idle.prepare_send(MessageKind::Candidate).is_err());
        assert_eq!(idle.prepare_send(MessageKind::Bye).unwrap().0, Outbound::Discard);
    }

    #[test]
    fn test_terminal_states() {
        let mut m = outgoing_connected();
        assert!(m.close());
        assert!(!m.close());
        assert_eq!(m.state(), SessionState::Closed);

        for kind in [MessageKind::Offer, MessageKind::Candidate, MessageKind::Bye] {
            assert_eq!(m.prepare_send(kind).unwrap(), (Outbound::Discard, Vec::new()));
        }
        assert!(m.on_message(SignallingMessage::Bye).unwrap().is_empty());
        assert!(m.remote_closed().is_empty());
        assert!(m.fail("late").is_empty());
        assert_eq!(m.state(), SessionState::Closed);
    }

    #[test]
    fn test_failures() {
        let mut m = incoming_connected();
        assert_eq!(
            m.fail("socket error: reset"),
            vec![SessionEvent::ChannelError("socket error: reset".into())]
        );
        assert_eq!(m.state(), SessionState::Error);

        let mut m = outgoing_connected();
        assert_eq!(m.remote_closed(), vec![SessionEvent::ChannelClosed]);
        assert_eq!(m.state(), SessionState::Closed);

        let mut m = incoming_connected();
        assert!(m.media_connected().is_err());
        assert!(m.begin_dial().is_err());
        assert!(m.socket_connected().is_err());
    }
}
