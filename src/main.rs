/**
 * main.rs
 *
 * meshcall command line: inspect address discovery and run a signalling
 * session against another instance without any media attached
 */

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use meshcall::addressing::{ranked_candidates, AddressBook, CandidateAddress, CandidateGenerator};
use meshcall::call::{place_call, CallListener, Contact};
use meshcall::config::Config;
use meshcall::signalling::{CallDirection, SessionEvent, SessionEvents, SignallingSession};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "meshcall", version, about = "Serverless direct-dial call signalling")]
struct Cli {
    /// Config file (TOML); defaults to $MESHCALL_CONFIG
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Signalling port, overrides the config file
    #[arg(long, short, global = true)]
    port: Option<u16>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print own interface addresses and MACs
    Addresses,
    /// Print ranked dial candidates for a contact
    Candidates {
        /// MAC addresses and/or host addresses of the contact
        #[arg(required = true)]
        addresses: Vec<String>,
        #[arg(long)]
        last_working: Option<CandidateAddress>,
    },
    /// Wait for one call and answer it
    Listen {
        #[arg(long, default_value = "v=0 meshcall-answer")]
        answer_sdp: String,
    },
    /// Call a contact and print signalling events
    Call {
        #[arg(required = true)]
        addresses: Vec<String>,
        #[arg(long, default_value = "v=0 meshcall-offer")]
        offer_sdp: String,
        #[arg(long)]
        last_working: Option<CandidateAddress>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("meshcall=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = Config::load(cli.config.as_deref()).context("Failed to load config")?;
    if let Some(port) = cli.port {
        config.port = port;
    }

    match cli.command {
        Command::Addresses => run_addresses().await,
        Command::Candidates {
            addresses,
            last_working,
        } => run_candidates(&config, addresses, last_working).await,
        Command::Listen { answer_sdp } => run_listen(&config, &answer_sdp).await,
        Command::Call {
            addresses,
            offer_sdp,
            last_working,
        } => run_call(&config, addresses, last_working, &offer_sdp).await,
    }
}

async fn run_addresses() -> Result<()> {
    let entries = tokio::task::spawn_blocking(|| AddressBook::system().list_own_addresses())
        .await
        .context("Address enumeration panicked")?;

    if entries.is_empty() {
        println!("No addresses found");
    }
    for entry in entries {
        let kind = if entry.multicast { " (multicast)" } else { "" };
        println!("{:<40} {}{}", entry.address, entry.device, kind);
    }
    Ok(())
}

async fn run_candidates(
    config: &Config,
    addresses: Vec<String>,
    last_working: Option<CandidateAddress>,
) -> Result<()> {
    let port = config.port;
    let ranked = tokio::task::spawn_blocking(move || {
        let generator = CandidateGenerator::system();
        ranked_candidates(&generator, &addresses, last_working.as_ref(), port)
    })
    .await
    .context("Candidate generation panicked")?;

    if ranked.is_empty() {
        println!("No candidates");
    }
    for (i, candidate) in ranked.iter().enumerate() {
        println!("{:>3}. {:<48} {}", i + 1, candidate.to_string(), candidate.source());
    }
    Ok(())
}

async fn run_listen(config: &Config, answer_sdp: &str) -> Result<()> {
    let listener = CallListener::bind(config.port)
        .with_context(|| format!("Failed to listen on port {}", config.port))?;
    println!("Waiting for a call on {}", listener.local_addr()?);

    let mut call = listener.accept().await?;
    println!("Incoming call from {}", call.peer);

    drive(&call.session, &mut call.events, answer_sdp).await
}

async fn run_call(
    config: &Config,
    addresses: Vec<String>,
    last_working: Option<CandidateAddress>,
    offer_sdp: &str,
) -> Result<()> {
    let contact = Contact {
        name: "peer".to_string(),
        addresses,
        last_working,
        port: config.port,
    };
    let generator = Arc::new(CandidateGenerator::system());

    let mut call = place_call(&contact, generator, &config.dial_config())
        .await
        .context("Call failed")?;
    println!("Connected via {}", call.working_address);

    drive(&call.session, &mut call.events, offer_sdp).await
}

/// Print events and stand in for the media engine: send our description
/// when due and consider media up once descriptions are exchanged
async fn drive(session: &SignallingSession, events: &mut SessionEvents, sdp: &str) -> Result<()> {
    loop {
        let event = tokio::select! {
            event = events.recv() => event,
            _ = tokio::signal::ctrl_c() => {
                println!("Hanging up");
                session.close().await;
                return Ok(());
            }
        };
        let Some(event) = event else {
            println!("Session ended ({})", session.state());
            return Ok(());
        };

        match event {
            SessionEvent::ConnectedToRoom { direction } => {
                println!("Channel ready ({})", direction);
                if direction == CallDirection::Outgoing {
                    session.send_offer(sdp).await?;
                }
            }
            SessionEvent::RemoteDescription(desc) => {
                println!("Remote {:?}: {}", desc.sdp_type, desc.sdp);
                if session.direction() == CallDirection::Incoming {
                    session.send_answer(sdp).await?;
                }
                session.media_connected()?;
                println!("Call active, Ctrl-C to hang up");
            }
            SessionEvent::RemoteIceCandidate(candidate) => {
                println!("Remote candidate [{}:{}] {}", candidate.sdp_mid, candidate.sdp_mline_index, candidate.sdp);
            }
            SessionEvent::RemoteIceCandidatesRemoved(candidates) => {
                println!("Remote removed {} candidate(s)", candidates.len());
            }
            SessionEvent::ChannelClosed => println!("Peer hung up"),
            SessionEvent::ChannelError(description) => bail!("Channel error: {}", description),
        }
    }
}
