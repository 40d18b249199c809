/**
 * signalling/session.rs
 *
 * One signalling session over one TCP socket
 *
 * A spawned receive task decodes frames and feeds them to the state
 * machine; resulting events go out over an unbounded channel in receipt
 * order. Sends hold the writer lock from state check to flush so frames
 * never interleave and transitions happen in send order.
 */

use futures_util::{SinkExt, StreamExt};
use socket2::{SockRef, Socket, TcpKeepalive};
use std::io;
use std::net::{Shutdown, SocketAddr};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument, Span};

use super::codec::{CodecError, SignallingCodec};
use super::dialer::{ConnectionDialer, DialConfig, DialFailure};
use super::messages::{IceCandidate, SignallingMessage};
use super::state::{InvalidState, Outbound, ProtocolError, StateMachine};
use super::types::{CallDirection, SessionEvent, SessionState};
use crate::addressing::CandidateAddress;

/// Receiving end for session events. Yields `None` once the session has
/// reached CLOSED or ERROR and the final event has been read.
pub type SessionEvents = mpsc::UnboundedReceiver<SessionEvent>;

/// Upper bound for best-effort frames sent while tearing down
const FAREWELL_TIMEOUT: Duration = Duration::from_secs(1);

const KEEPALIVE_IDLE: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    InvalidState(#[from] InvalidState),

    #[error("send failed: {0}")]
    Send(#[source] CodecError),

    #[error("socket error: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Dial(#[from] DialFailure),
}

struct Shared {
    machine: StateMachine,
    /// Dropped once the session is terminal
    events: Option<mpsc::UnboundedSender<SessionEvent>>,
}

struct Inner {
    id: u64,
    peer: SocketAddr,
    direction: CallDirection,
    shared: Mutex<Shared>,
    writer: tokio::sync::Mutex<FramedWrite<OwnedWriteHalf, SignallingCodec>>,
    /// Duplicate handle used only to shut the socket down under the reader
    control: Socket,
    cancel: CancellationToken,
    span: Span,
}

impl Inner {
    /// Run `f` against the state machine and publish the events it produced
    fn update<T>(&self, f: impl FnOnce(&mut StateMachine) -> (T, Vec<SessionEvent>)) -> T {
        let mut shared = self.shared.lock().unwrap_or_else(PoisonError::into_inner);
        let (value, events) = f(&mut shared.machine);

        if let Some(tx) = &shared.events {
            for event in events {
                // Receiver gone means nobody is listening, not an error
                let _ = tx.send(event);
            }
        }
        if shared.machine.state().is_terminal() {
            shared.events = None;
        }
        value
    }

    fn state(&self) -> SessionState {
        self.update(|m| (m.state(), Vec::new()))
    }

    /// Write a frame without consulting the state machine, giving up quickly
    async fn send_farewell(&self, msg: SignallingMessage) {
        let kind = msg.kind();
        let write = async {
            let mut writer = self.writer.lock().await;
            writer.send(msg).await
        };
        match timeout(FAREWELL_TIMEOUT, write).await {
            Ok(Ok(())) => debug!(%kind, "sent"),
            Ok(Err(e)) => debug!(%kind, error = %e, "could not send"),
            Err(_) => debug!(%kind, "timed out sending"),
        }
    }

    fn shutdown(&self) {
        self.cancel.cancel();
        if let Err(e) = self.control.shutdown(Shutdown::Both) {
            if e.kind() != io::ErrorKind::NotConnected {
                debug!(error = %e, "socket shutdown");
            }
        }
    }
}

/// A direct signalling channel to one peer
pub struct SignallingSession {
    inner: Arc<Inner>,
}

impl SignallingSession {
    /// Dial ranked candidates and start an outgoing session on the winner.
    /// Also returns the address that answered so the caller can remember it.
    pub async fn dial(
        candidates: &[CandidateAddress],
        config: &DialConfig,
    ) -> Result<(Self, SessionEvents, CandidateAddress), SessionError> {
        let mut machine = StateMachine::new(CallDirection::Outgoing);
        machine.begin_dial()?;

        let dialed = ConnectionDialer::new(config.clone()).dial(candidates).await?;
        let (session, events) = Self::start(dialed.stream, machine)?;
        Ok((session, events, dialed.address))
    }

    /// Outgoing session on a socket that is already connected
    pub fn outgoing(stream: TcpStream) -> Result<(Self, SessionEvents), SessionError> {
        let mut machine = StateMachine::new(CallDirection::Outgoing);
        machine.begin_dial()?;
        Self::start(stream, machine)
    }

    /// Incoming session on an accepted socket
    pub fn incoming(stream: TcpStream) -> Result<(Self, SessionEvents), SessionError> {
        Self::start(stream, StateMachine::new(CallDirection::Incoming))
    }

    /// Must be called inside a tokio runtime
    fn start(
        stream: TcpStream,
        mut machine: StateMachine,
    ) -> Result<(Self, SessionEvents), SessionError> {
        let peer = stream.peer_addr()?;
        stream.set_nodelay(true)?;

        let sock = SockRef::from(&stream);
        sock.set_tcp_keepalive(&TcpKeepalive::new().with_time(KEEPALIVE_IDLE))?;
        let control = sock.try_clone()?;

        let direction = machine.direction();
        let initial = machine.socket_connected()?;

        let (tx, rx) = mpsc::unbounded_channel();
        for event in initial {
            let _ = tx.send(event);
        }

        let id = rand::random::<u64>();
        let span = info_span!("session", id = %format_args!("{id:016x}"), %direction, %peer);

        let (read_half, write_half) = stream.into_split();
        let inner = Arc::new(Inner {
            id,
            peer,
            direction,
            shared: Mutex::new(Shared {
                machine,
                events: Some(tx),
            }),
            writer: tokio::sync::Mutex::new(FramedWrite::new(write_half, SignallingCodec::new())),
            control,
            cancel: CancellationToken::new(),
            span: span.clone(),
        });

        let reader = FramedRead::new(read_half, SignallingCodec::new());
        tokio::spawn(receive_loop(inner.clone(), reader).instrument(span.clone()));
        span.in_scope(|| info!("session started"));

        Ok((Self { inner }, rx))
    }

    pub async fn send_offer(&self, sdp: impl Into<String>) -> Result<(), SessionError> {
        self.send(SignallingMessage::Offer { sdp: sdp.into() }).await
    }

    pub async fn send_answer(&self, sdp: impl Into<String>) -> Result<(), SessionError> {
        self.send(SignallingMessage::Answer { sdp: sdp.into() }).await
    }

    pub async fn send_ice_candidate(&self, candidate: IceCandidate) -> Result<(), SessionError> {
        self.send(SignallingMessage::Candidate(candidate)).await
    }

    pub async fn send_ice_candidate_removals(
        &self,
        candidates: Vec<IceCandidate>,
    ) -> Result<(), SessionError> {
        self.send(SignallingMessage::CandidateRemoval { candidates }).await
    }

    async fn send(&self, msg: SignallingMessage) -> Result<(), SessionError> {
        let span = self.inner.span.clone();
        self.send_in_order(msg).instrument(span).await
    }

    async fn send_in_order(&self, msg: SignallingMessage) -> Result<(), SessionError> {
        let inner = &self.inner;
        let kind = msg.kind();
        let mut writer = inner.writer.lock().await;

        let outbound = inner.update(|m| match m.prepare_send(kind) {
            Ok((outbound, events)) => (Ok(outbound), events),
            Err(e) => (Err(e), Vec::new()),
        })?;
        if outbound == Outbound::Discard {
            debug!(%kind, "session over, not sending");
            return Ok(());
        }

        let Err(e) = writer.send(msg).await else {
            debug!(%kind, "sent");
            return Ok(());
        };
        drop(writer);

        let description = e.to_string();
        let failed = inner.update(|m| {
            let events = m.fail(description);
            (!events.is_empty(), events)
        });
        inner.shutdown();
        if failed {
            warn!(%kind, error = %e, "send failed");
            Err(SessionError::Send(e))
        } else {
            // Lost a race with teardown
            debug!(%kind, error = %e, "send after close");
            Ok(())
        }
    }

    /// The media engine has connected; ICE_EXCHANGE -> ACTIVE
    pub fn media_connected(&self) -> Result<(), InvalidState> {
        self.inner.update(|m| (m.media_connected(), Vec::new()))?;
        self.inner.span.in_scope(|| info!("media connected"));
        Ok(())
    }

    /// Hang up: move to CLOSED, send a best-effort bye, then shut the
    /// socket down. Safe to call more than once.
    pub async fn close(&self) {
        let inner = &self.inner;
        async move {
            // Terminal before the bye goes out, so a reply racing the
            // farewell cannot surface as ChannelClosed
            let (had_channel, closed) = inner.update(|m| {
                let had_channel = m.state().has_channel();
                ((had_channel, m.close()), Vec::new())
            });
            if closed {
                info!("session closed");
            }
            if had_channel {
                inner.send_farewell(SignallingMessage::Bye).await;
            }
            inner.shutdown();
        }
        .instrument(inner.span.clone())
        .await
    }

    pub fn state(&self) -> SessionState {
        self.inner.state()
    }

    pub fn direction(&self) -> CallDirection {
        self.inner.direction
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.inner.peer
    }
}

impl std::fmt::Debug for SignallingSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignallingSession")
            .field("id", &format_args!("{:016x}", self.inner.id))
            .field("direction", &self.inner.direction)
            .field("peer", &self.inner.peer)
            .field("state", &self.state())
            .finish()
    }
}

impl Drop for SignallingSession {
    fn drop(&mut self) {
        if self.inner.update(|m| (m.close(), Vec::new())) {
            self.inner.span.in_scope(|| debug!("session dropped"));
        }
        self.inner.shutdown();
    }
}

async fn receive_loop(inner: Arc<Inner>, mut reader: FramedRead<OwnedReadHalf, SignallingCodec>) {
    loop {
        let next = tokio::select! {
            _ = inner.cancel.cancelled() => break,
            next = reader.next() => next,
        };

        match next {
            Some(Ok(msg)) => {
                let kind = msg.kind();
                debug!(%kind, "received");

                let result = inner.update(|m| match m.on_message(msg) {
                    Ok(events) => (Ok(()), events),
                    Err(e) => {
                        let description = e.to_string();
                        (Err(e), vec![SessionEvent::ChannelError(description)])
                    }
                });

                match result {
                    Ok(()) => {
                        if inner.state().is_terminal() {
                            info!("peer hung up");
                            break;
                        }
                    }
                    Err(ProtocolError::Remote(reason)) => {
                        warn!(%reason, "peer reported error");
                        break;
                    }
                    Err(e) => {
                        warn!(error = %e, "protocol error");
                        inner.send_farewell(SignallingMessage::Error { reason: e.to_string() }).await;
                        break;
                    }
                }
            }
            Some(Err(e)) if e.is_protocol_violation() => {
                let e = ProtocolError::Malformed(e.to_string());
                warn!(error = %e, "bad frame");
                let description = e.to_string();
                inner.update(|m| ((), m.fail(description)));
                inner.send_farewell(SignallingMessage::Error { reason: e.to_string() }).await;
                break;
            }
            Some(Err(e)) => {
                let reported = inner.update(|m| {
                    let events = m.fail(e.to_string());
                    (!events.is_empty(), events)
                });
                if reported {
                    warn!(error = %e, "socket error");
                }
                break;
            }
            None => {
                if inner.update(|m| {
                    let events = m.remote_closed();
                    (!events.is_empty(), events)
                }) {
                    info!("peer closed the connection");
                }
                break;
            }
        }
    }

    inner.shutdown();
    debug!("receive loop finished");
}
