#![allow(unused_doc_comments)]
/**
 * This style of comments threw out warnings.
 * This allow statement fixes that
 */

/**
 * lib.rs
 */

pub mod addressing;
pub mod call;
pub mod config;
pub mod ffi;
pub mod signalling;

pub use addressing::{CandidateAddress, CandidateGenerator};
pub use call::{place_call, CallError, CallListener, Contact, IncomingCall, OutgoingCall};
pub use config::Config;
pub use signalling::{SessionEvent, SessionState, SignallingSession};
