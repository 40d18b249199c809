/**
 * call.rs
 *
 * Placing and accepting calls
 *
 * Ties address discovery to the signalling session. Nothing here keeps a
 * notion of "the current call": every call is a value owned by whoever
 * placed or accepted it.
 */

use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use crate::addressing::{ranked_candidates, CandidateAddress, CandidateGenerator};
use crate::config::DEFAULT_PORT;
use crate::signalling::{DialConfig, DialFailure, SessionError, SessionEvents, SignallingSession};

const LISTEN_BACKLOG: i32 = 128;

#[derive(Debug, Error)]
pub enum CallError {
    #[error("contact {0} has no usable addresses")]
    NoCandidates(String),

    #[error("candidate generation failed: {0}")]
    Generation(#[from] tokio::task::JoinError),

    #[error(transparent)]
    Unreachable(#[from] DialFailure),

    #[error(transparent)]
    Session(SessionError),

    #[error("socket error: {0}")]
    Io(#[from] io::Error),
}

impl From<SessionError> for CallError {
    fn from(e: SessionError) -> Self {
        match e {
            SessionError::Dial(failure) => CallError::Unreachable(failure),
            other => CallError::Session(other),
        }
    }
}

/// What the contact store knows about a peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Contact {
    pub name: String,
    /// MAC addresses and/or literal host addresses
    pub addresses: Vec<String>,
    pub last_working: Option<CandidateAddress>,
    pub port: u16,
}

impl Contact {
    pub fn new(name: impl Into<String>, addresses: Vec<String>) -> Self {
        Self {
            name: name.into(),
            addresses,
            last_working: None,
            port: DEFAULT_PORT,
        }
    }
}

/// A connected outgoing call
#[derive(Debug)]
pub struct OutgoingCall {
    pub session: SignallingSession,
    pub events: SessionEvents,
    /// Store as the contact's new last working address
    pub working_address: CandidateAddress,
}

/// A call accepted by `CallListener`
#[derive(Debug)]
pub struct IncomingCall {
    pub session: SignallingSession,
    pub events: SessionEvents,
    pub peer: SocketAddr,
}

/// Generate, rank and dial the contact's candidates
pub async fn place_call(
    contact: &Contact,
    generator: Arc<CandidateGenerator>,
    config: &DialConfig,
) -> Result<OutgoingCall, CallError> {
    let addresses = contact.addresses.clone();
    let last_working = contact.last_working.clone();
    let port = contact.port;

    // Interface and neighbor queries block
    let candidates = tokio::task::spawn_blocking(move || {
        ranked_candidates(&generator, &addresses, last_working.as_ref(), port)
    })
    .await?;

    if candidates.is_empty() {
        return Err(CallError::NoCandidates(contact.name.clone()));
    }
    info!(contact = %contact.name, candidates = candidates.len(), "placing call");

    let (session, events, working_address) = SignallingSession::dial(&candidates, config).await?;
    Ok(OutgoingCall {
        session,
        events,
        working_address,
    })
}

/// Accepts incoming signalling connections
#[derive(Debug)]
pub struct CallListener {
    listener: TcpListener,
}

impl CallListener {
    /// Listen on `[::]:port` accepting IPv4 too, or on `0.0.0.0:port` where
    /// the host has no IPv6
    pub fn bind(port: u16) -> io::Result<Self> {
        let socket = match dual_stack_socket(port) {
            Ok(socket) => socket,
            Err(e) => {
                warn!(error = %e, "IPv6 listener unavailable, falling back to IPv4");
                listen_socket(Domain::IPV4, SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port))?
            }
        };

        let listener = TcpListener::from_std(socket.into())?;
        info!(addr = %listener.local_addr()?, "listening for calls");
        Ok(Self { listener })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Wait for the next caller
    pub async fn accept(&self) -> Result<IncomingCall, CallError> {
        let (stream, peer) = self.listener.accept().await?;
        let peer = canonical(peer);
        debug!(%peer, "incoming connection");

        let (session, events) = SignallingSession::incoming(stream)?;
        Ok(IncomingCall {
            session,
            events,
            peer,
        })
    }
}

fn dual_stack_socket(port: u16) -> io::Result<Socket> {
    listen_socket(Domain::IPV6, SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), port))
}

fn listen_socket(domain: Domain, addr: SocketAddr) -> io::Result<Socket> {
    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
    if domain == Domain::IPV6 {
        socket.set_only_v6(false)?;
    }
    socket.set_reuse_address(true)?;
    socket.bind(&addr.into())?;
    socket.listen(LISTEN_BACKLOG)?;
    socket.set_nonblocking(true)?;
    Ok(socket)
}

/// Show IPv4 callers on a dual-stack socket as plain IPv4
fn canonical(addr: SocketAddr) -> SocketAddr {
    match addr {
        SocketAddr::V6(v6) => match v6.ip().to_ipv4_mapped() {
            Some(v4) => SocketAddr::new(IpAddr::V4(v4), v6.port()),
            None => addr,
        },
        SocketAddr::V4(_) => addr,
    }
}
