//! Error types for the endpoint.
//!
//! Three tiers: local programming errors ([`RegisterError`]) surface
//! synchronously at the registration site; transport failures reject the
//! affected call and come back out of the send site; remote failures travel
//! as `RespErr` envelopes and reject the caller's future with both `code`
//! and message preserved.

use patchbay_wire::codes;

/// A call-level error: what a pending call rejects with, and what an
/// implementation returns to fail a call.
///
/// `code` is a stable machine-readable tag (see [`patchbay_wire::codes`]);
/// implementations may carry their own codes, which propagate verbatim to
/// the remote caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcError {
    pub code: Option<String>,
    pub message: String,
}

impl RpcError {
    /// An error with a message and no code.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
        }
    }

    /// An error with a stable code.
    pub fn coded(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: Some(code.into()),
            message: message.into(),
        }
    }

    /// The error an invoker returns for a method it does not have.
    pub fn unknown_method(meth: &str) -> Self {
        Self::coded(codes::UNKNOWN_METHOD, format!("unknown method `{meth}`"))
    }

    pub(crate) fn endpoint_closed() -> Self {
        Self::coded(codes::ENDPOINT_CLOSED, "endpoint was shut down")
    }

    /// The stable code, if any.
    pub fn code(&self) -> Option<&str> {
        self.code.as_deref()
    }
}

impl std::fmt::Display for RpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.code {
            Some(code) => write!(f, "{code}: {}", self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for RpcError {}

/// Error from a registration-site operation. These throw synchronously to
/// the user; nothing travels on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegisterError {
    /// An implementation is already registered under this name.
    DuplicateImpl(String),
    /// No implementation is registered under this name.
    UnknownImpl(String),
    /// A forwarder is already registered under this name.
    DuplicateForwarder(String),
    /// No forwarder is registered under this name.
    UnknownForwarder(String),
}

impl std::fmt::Display for RegisterError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegisterError::DuplicateImpl(name) => {
                write!(f, "implementation `{name}` is already registered")
            }
            RegisterError::UnknownImpl(name) => {
                write!(f, "no implementation `{name}` is registered")
            }
            RegisterError::DuplicateForwarder(name) => {
                write!(f, "forwarder `{name}` is already registered")
            }
            RegisterError::UnknownForwarder(name) => {
                write!(f, "no forwarder `{name}` is registered")
            }
        }
    }
}

impl std::error::Error for RegisterError {}
