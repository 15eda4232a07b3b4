//! Error types for the SOCKS5 relay
//!
//! Every error is local to one client connection. `class()` buckets each
//! variant into the failure taxonomy; the server picks the log level of a
//! failed connection from it.

use std::io;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Socks5Error>;

/// SOCKS5 specific errors
#[derive(Error, Debug)]
pub enum Socks5Error {
    /// IO error on the client or destination transport
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Transport ended before a declared field was fully read
    #[error("truncated message")]
    TruncatedMessage,

    #[error("protocol version not supported: {0:#04x}")]
    VersionMismatch(u8),

    #[error("sub-negotiation version not supported: {0:#04x}")]
    SubVersionMismatch(u8),

    /// A field holds a value the protocol forbids
    #[error("invalid field: {0}")]
    InvalidField(&'static str),

    #[error("request command not supported: {0:#04x}")]
    CommandUnsupported(u8),

    #[error("address type not supported: {0:#04x}")]
    AddressTypeUnsupported(u8),

    /// Client offered none of the methods the server requires
    #[error("authentication method not acceptable")]
    MethodNotAcceptable,

    #[error("error authenticating username/password")]
    AuthenticationFailed,

    /// Password method configured without a verifier
    #[error("password verifier not set")]
    PasswordVerifierMissing,

    /// Policy names a method the server cannot carry out
    #[error("authentication method not supported by the server: {0:#04x}")]
    AuthMethodUnsupported(u8),

    #[error("destination connect timed out")]
    ConnectTimeout,
}

/// Failure classes a connection can end with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Transport,
    ProtocolViolation,
    UnsupportedCapability,
    AuthenticationFailed,
    Configuration,
}

impl Socks5Error {
    pub fn class(&self) -> ErrorClass {
        match self {
            Socks5Error::Io(_) | Socks5Error::TruncatedMessage | Socks5Error::ConnectTimeout => {
                ErrorClass::Transport
            }
            Socks5Error::VersionMismatch(_)
            | Socks5Error::SubVersionMismatch(_)
            | Socks5Error::InvalidField(_) => ErrorClass::ProtocolViolation,
            Socks5Error::CommandUnsupported(_)
            | Socks5Error::AddressTypeUnsupported(_)
            | Socks5Error::MethodNotAcceptable => ErrorClass::UnsupportedCapability,
            Socks5Error::AuthenticationFailed => ErrorClass::AuthenticationFailed,
            Socks5Error::PasswordVerifierMissing | Socks5Error::AuthMethodUnsupported(_) => {
                ErrorClass::Configuration
            }
        }
    }

    /// read_error maps an exact-read failure: a short read becomes
    /// `TruncatedMessage`, anything else stays an IO error
    pub(crate) fn read_error(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::UnexpectedEof => Socks5Error::TruncatedMessage,
            _ => Socks5Error::Io(e),
        }
    }
}
