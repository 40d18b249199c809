/**
 * signalling/codec.rs
 *
 * Wire framing for the signalling channel
 *
 * ```text
 * ┌──────────────────┬─────────────┬──────────────────────────┐
 * │ Length (4B, BE)  │ Version (1B)│ JSON message (UTF-8)     │
 * └──────────────────┴─────────────┴──────────────────────────┘
 * ```
 *
 * Length covers the version byte and the JSON body. Both ends must speak
 * the same version; bump PROTOCOL_VERSION on any incompatible change.
 */

use bytes::{BufMut, Bytes, BytesMut};
use std::io;
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder, LengthDelimitedCodec};

use super::messages::SignallingMessage;

/// Current wire version
pub const PROTOCOL_VERSION: u8 = 1;

/// Maximum frame payload (version byte + JSON)
pub const MAX_FRAME_LEN: usize = 64 * 1024;

/// Length of the frame header
pub const HEADER_LEN: usize = 4;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("socket error: {0}")]
    Io(#[from] io::Error),

    #[error("frame exceeds maximum size")]
    FrameTooLarge,

    #[error("empty frame")]
    EmptyFrame,

    #[error("unsupported protocol version {0}")]
    UnsupportedVersion(u8),

    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),
}

impl CodecError {
    /// Everything except transport failures is the peer's fault
    pub fn is_protocol_violation(&self) -> bool {
        !matches!(self, CodecError::Io(_))
    }
}

/// Length-prefixed, versioned JSON frames
#[derive(Debug)]
pub struct SignallingCodec {
    frames: LengthDelimitedCodec,
}

impl SignallingCodec {
    pub fn new() -> Self {
        let frames = LengthDelimitedCodec::builder()
            .length_field_length(HEADER_LEN)
            .big_endian()
            .max_frame_length(MAX_FRAME_LEN)
            .new_codec();
        Self { frames }
    }
}

impl Default for SignallingCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for SignallingCodec {
    type Item = SignallingMessage;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let frame = match self.frames.decode(src) {
            Ok(Some(frame)) => frame,
            Ok(None) => return Ok(None),
            // LengthDelimitedCodec reports oversized frames as InvalidData
            Err(e) if e.kind() == io::ErrorKind::InvalidData => return Err(CodecError::FrameTooLarge),
            Err(e) => return Err(CodecError::Io(e)),
        };

        let (&version, body) = frame.split_first().ok_or(CodecError::EmptyFrame)?;
        if version != PROTOCOL_VERSION {
            return Err(CodecError::UnsupportedVersion(version));
        }

        Ok(Some(serde_json::from_slice(body)?))
    }
}

impl Encoder<SignallingMessage> for SignallingCodec {
    type Error = CodecError;

    fn encode(&mut self, msg: SignallingMessage, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let json = serde_json::to_vec(&msg)?;
        if json.len() + 1 > MAX_FRAME_LEN {
            return Err(CodecError::FrameTooLarge);
        }

        let mut payload = BytesMut::with_capacity(json.len() + 1);
        payload.put_u8(PROTOCOL_VERSION);
        payload.extend_from_slice(&json);

        self.frames.encode(Bytes::from(payload), dst)?;
        Ok(())
    }
}
