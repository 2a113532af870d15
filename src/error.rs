//! Error types for roster-core

use thiserror::Error;

/// Result type alias for roster operations
pub type Result<T> = std::result::Result<T, RosterError>;

/// Main error type for roster operations
///
/// Protocol anomalies (stale notification versions, duplicate inserts and the
/// like) are deliberately *not* represented here; they are logged and
/// processing continues with best-effort semantics. Only caller-contract
/// violations and structural decode failures surface as errors.
#[derive(Error, Debug)]
pub enum RosterError {
    /// The contact cannot be used for the requested operation
    /// (e.g. it already belongs to a list, or it has no address)
    #[error("Invalid contact: {0}")]
    InvalidContact(String),

    /// The contact is not a member of this list
    #[error("Contact not found: {0}")]
    ContactNotFound(String),

    /// An address string could not be interpreted as a SIP address
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// The outer notification body is not the multipart/related structure
    /// an aggregated subscription delivers
    #[error("Malformed notification body: {0}")]
    MalformedBody(String),

    /// The RLMI or PIDF payload could not be decoded
    #[error("Decode error: {0}")]
    DecodeError(String),
}

impl From<quick_xml::Error> for RosterError {
    fn from(err: quick_xml::Error) -> Self {
        RosterError::DecodeError(err.to_string())
    }
}

impl From<std::str::Utf8Error> for RosterError {
    fn from(err: std::str::Utf8Error) -> Self {
        RosterError::MalformedBody(format!("body is not valid UTF-8: {}", err))
    }
}
