/**
 * addressing/errors.rs
 *
 * Error types shared by the address discovery code
 */

use thiserror::Error;

/// A contact address string could not be understood
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressParseError {
    #[error("invalid MAC address: {0:?}")]
    InvalidMac(String),

    #[error("invalid address: {0:?}")]
    InvalidAddress(String),

    #[error("invalid port in {0:?}")]
    InvalidPort(String),

    #[error("invalid zone {zone:?} in {address:?}")]
    InvalidZone { address: String, zone: String },
}

/// Querying the OS for interfaces or neighbors failed
#[derive(Debug, Error)]
pub enum EnumerationError {
    #[error("{what} failed: {source}")]
    Io {
        what: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("{what} exited with {status}")]
    CommandFailed {
        what: &'static str,
        status: std::process::ExitStatus,
    },

    #[error("{0} is not supported on this platform")]
    Unsupported(&'static str),
}

impl EnumerationError {
    pub(crate) fn io(what: &'static str, source: std::io::Error) -> Self {
        EnumerationError::Io { what, source }
    }
}
