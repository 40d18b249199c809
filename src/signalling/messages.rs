/**
 * signalling/messages.rs
 *
 * Messages exchanged over the direct signalling channel
 *
 * SDP and candidate strings are opaque here; they are passed to and from
 * the media engine untouched.
 */

use serde::{Deserialize, Serialize};
use std::fmt;

/// An ICE candidate as produced by the media engine
///
/// Field names on the wire follow the AppRTC direct-call format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    #[serde(rename = "id")]
    pub sdp_mid: String,
    #[serde(rename = "label")]
    pub sdp_mline_index: u32,
    #[serde(rename = "candidate")]
    pub sdp: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
}

/// A remote session description, handed to the media engine as is
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionDescription {
    pub sdp_type: SdpType,
    pub sdp: String,
}

/// Signalling message types
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SignallingMessage {
    Offer {
        sdp: String,
    },
    Answer {
        sdp: String,
    },
    Candidate(IceCandidate),
    CandidateRemoval {
        candidates: Vec<IceCandidate>,
    },
    Bye,
    Error {
        reason: String,
    },
}

impl SignallingMessage {
    pub fn kind(&self) -> MessageKind {
        match self {
            SignallingMessage::Offer { .. } => MessageKind::Offer,
            SignallingMessage::Answer { .. } => MessageKind::Answer,
            SignallingMessage::Candidate(_) => MessageKind::Candidate,
            SignallingMessage::CandidateRemoval { .. } => MessageKind::CandidateRemoval,
            SignallingMessage::Bye => MessageKind::Bye,
            SignallingMessage::Error { .. } => MessageKind::Error,
        }
    }
}

/// Message type without payload, for state checks and logs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Offer,
    Answer,
    Candidate,
    CandidateRemoval,
    Bye,
    Error,
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self {
            MessageKind::Offer => "offer",
            MessageKind::Answer => "answer",
            MessageKind::Candidate => "candidate",
            MessageKind::CandidateRemoval => "candidate-removal",
            MessageKind::Bye => "bye",
            MessageKind::Error => "error",
        };
        f.write_str(tag)
    }
}
