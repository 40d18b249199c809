/**
 * signalling/dialer.rs
 *
 * Races TCP connects across ranked candidates
 *
 * At most `fan_out` attempts are in flight; as soon as one fails the next
 * candidate in rank order takes its slot. The first connect to succeed
 * wins and every other attempt is dropped, which closes its socket.
 */

use futures_util::stream::{FuturesUnordered, StreamExt};
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info};

use crate::addressing::CandidateAddress;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DialConfig {
    /// Concurrent attempts
    pub fan_out: usize,
    pub attempt_timeout: Duration,
    pub overall_timeout: Duration,
}

impl Default for DialConfig {
    fn default() -> Self {
        Self {
            fan_out: 3,
            attempt_timeout: Duration::from_secs(3),
            overall_timeout: Duration::from_secs(10),
        }
    }
}

/// A winning connection
#[derive(Debug)]
pub struct Dialed {
    pub stream: TcpStream,
    pub address: CandidateAddress,
    pub remote: SocketAddr,
}

/// Nothing answered
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error(
    "could not reach peer ({tried} candidates tried): {}",
    .last_error.as_deref().unwrap_or("no candidates")
)]
pub struct DialFailure {
    pub tried: usize,
    pub last_error: Option<String>,
    pub timed_out: bool,
}

pub struct ConnectionDialer {
    config: DialConfig,
}

impl ConnectionDialer {
    pub fn new(config: DialConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DialConfig {
        &self.config
    }

    /// Dial candidates in the given order. Individual failures are only
    /// logged; the caller sees a failure once everything is exhausted or
    /// the overall timeout has passed.
    pub async fn dial(&self, candidates: &[CandidateAddress]) -> Result<Dialed, DialFailure> {
        if candidates.is_empty() {
            return Err(DialFailure {
                tried: 0,
                last_error: None,
                timed_out: false,
            });
        }

        let mut tried = 0;
        let mut last_error = None;

        let race = self.race(candidates, &mut tried, &mut last_error);
        let outcome = timeout(self.config.overall_timeout, race).await;

        match outcome {
            Ok(Some(dialed)) => {
                info!(address = %dialed.address, remote = %dialed.remote, tried, "connected");
                Ok(dialed)
            }
            Ok(None) => Err(DialFailure {
                tried,
                last_error,
                timed_out: false,
            }),
            Err(_) => {
                debug!(tried, "overall dial timeout");
                Err(DialFailure {
                    tried,
                    last_error: last_error.or_else(|| Some("overall timeout elapsed".to_string())),
                    timed_out: true,
                })
            }
        }
    }

    async fn race(
        &self,
        candidates: &[CandidateAddress],
        tried: &mut usize,
        last_error: &mut Option<String>,
    ) -> Option<Dialed> {
        let fan_out = self.config.fan_out.max(1);
        let mut pending = candidates.iter();
        let mut in_flight = FuturesUnordered::new();

        loop {
            while in_flight.len() < fan_out {
                let Some(candidate) = pending.next() else { break };
                *tried += 1;
                debug!(%candidate, source = %candidate.source(), "dialing");
                in_flight.push(self.attempt(candidate));
            }

            match in_flight.next().await {
                // Returning drops in_flight and with it every loser
                Some(Ok(dialed)) => return Some(dialed),
                Some(Err(e)) => {
                    debug!(error = %e, "candidate dead");
                    *last_error = Some(e);
                }
                None => return None,
            }
        }
    }

    async fn attempt(&self, candidate: &CandidateAddress) -> Result<Dialed, String> {
        let limit = self.config.attempt_timeout;
        match timeout(limit, connect(candidate)).await {
            Ok(Ok((stream, remote))) => Ok(Dialed {
                stream,
                address: candidate.clone(),
                remote,
            }),
            Ok(Err(e)) => Err(format!("{candidate}: {e}")),
            Err(_) => Err(format!("{candidate}: timed out after {}ms", limit.as_millis())),
        }
    }
}

impl Default for ConnectionDialer {
    fn default() -> Self {
        Self::new(DialConfig::default())
    }
}

/// Resolve and connect, trying each resolved address in turn
async fn connect(candidate: &CandidateAddress) -> io::Result<(TcpStream, SocketAddr)> {
    let addrs = candidate.resolve().await?;

    let mut last = None;
    for addr in addrs {
        match TcpStream::connect(addr).await {
            Ok(stream) => return Ok((stream, addr)),
            Err(e) => last = Some(e),
        }
    }
    Err(last.unwrap_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no addresses resolved")))
}
