#![deny(unsafe_code)]

//! Wire-level envelope types for the patchbay RPC protocol.
//!
//! An [`Envelope`] is the unit every transport carries. Serialization is
//! delegated to the transport; the contract is a structurally equivalent
//! object (most transports use JSON). Tag values and field names are
//! wire-stable: tags are never renumbered, fields are never renamed or
//! retyped, and extensions are additive optional fields only.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Stable message tags. Never renumber these.
pub mod tags {
    pub const CALL: u8 = 1;
    pub const RESP_DATA: u8 = 2;
    pub const RESP_ERR: u8 = 3;
    pub const CUSTOM: u8 = 4;
    pub const READY: u8 = 5;
}

/// Stable error codes carried in [`Envelope::RespErr`] and surfaced on the
/// caller side. Implementations may propagate their own codes verbatim;
/// these are the ones the endpoint itself produces.
pub mod codes {
    /// Call named an interface the responder does not have.
    pub const UNKNOWN_INTERFACE: &str = "RPC_UNKNOWN_INTERFACE";
    /// Call named a method the target interface does not have.
    pub const UNKNOWN_METHOD: &str = "RPC_UNKNOWN_METHOD";
    /// Envelope carried a `fwdDest` with no matching forwarder (and no
    /// wildcard).
    pub const UNKNOWN_FORWARD_DEST: &str = "RPC_UNKNOWN_FORWARD_DEST";
    /// Argument tuple failed validation against the interface checker.
    pub const INVALID_ARGS: &str = "RPC_INVALID_ARGS";
    /// Response data failed validation against the result checker.
    pub const INVALID_RESULT: &str = "RPC_INVALID_RESULT";
    /// Call arrived without a request id.
    pub const MISSING_REQID: &str = "RPC_MISSING_REQID";
    /// The user send function failed while emitting the call.
    pub const SEND_FAILED: &str = "RPC_SEND_FAILED";
    /// Response arrived for a request id with no pending call. Log-only;
    /// never travels on the wire.
    pub const UNKNOWN_REQID: &str = "RPC_UNKNOWN_REQID";
    /// The endpoint was shut down while the call was pending.
    pub const ENDPOINT_CLOSED: &str = "RPC_ENDPOINT_CLOSED";
}

/// Protocol envelope.
///
/// Variant tags are wire-significant; see [`tags`].
#[repr(u8)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawEnvelope", into = "RawEnvelope")]
pub enum Envelope {
    /// An RPC call. `req_id` is `None` for fire-and-forget calls, which the
    /// responder currently rejects as a protocol error.
    Call {
        req_id: Option<u64>,
        iface: String,
        meth: String,
        args: Vec<Value>,
        /// Multi-hop routing hint: names a forwarder on the receiving
        /// endpoint. Absent means deliver locally.
        fwd_dest: Option<String>,
    } = 1,

    /// Success reply. `data` is absent when the implementation returned
    /// nothing.
    RespData { req_id: u64, data: Option<Value> } = 2,

    /// Failure reply. `code` is stable; `mesg` is human-readable.
    RespErr {
        req_id: u64,
        mesg: String,
        code: Option<String>,
    } = 3,

    /// Opaque user payload sharing the RPC channel.
    Custom {
        data: Option<Value>,
        fwd_dest: Option<String>,
    } = 4,

    /// Peer-ready signal, used only with the gated outbound queue.
    Ready = 5,
}

impl Envelope {
    /// The wire tag for this envelope.
    pub fn mtype(&self) -> u8 {
        match self {
            Envelope::Call { .. } => tags::CALL,
            Envelope::RespData { .. } => tags::RESP_DATA,
            Envelope::RespErr { .. } => tags::RESP_ERR,
            Envelope::Custom { .. } => tags::CUSTOM,
            Envelope::Ready => tags::READY,
        }
    }

    /// The forwarding destination, if any.
    pub fn fwd_dest(&self) -> Option<&str> {
        match self {
            Envelope::Call { fwd_dest, .. } | Envelope::Custom { fwd_dest, .. } => {
                fwd_dest.as_deref()
            }
            _ => None,
        }
    }

    /// The request id of a `Call`, if present.
    pub fn call_req_id(&self) -> Option<u64> {
        match self {
            Envelope::Call { req_id, .. } => *req_id,
            _ => None,
        }
    }
}

/// Flat wire form of [`Envelope`]: one struct, all fields optional except
/// the tag. This is what actually crosses serde, so the JSON field names
/// (`reqId`, `fwdDest`, `mesg`) stay pinned independently of the Rust enum.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct RawEnvelope {
    mtype: u8,
    #[serde(rename = "reqId", default, skip_serializing_if = "Option::is_none")]
    req_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    iface: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    meth: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    args: Option<Vec<Value>>,
    #[serde(rename = "fwdDest", default, skip_serializing_if = "Option::is_none")]
    fwd_dest: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    mesg: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    code: Option<String>,
}

/// Error decoding a [`RawEnvelope`] into an [`Envelope`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvelopeError {
    /// Unrecognized `mtype` value.
    UnknownTag(u8),
    /// A field required by the tag was absent.
    MissingField { tag: u8, field: &'static str },
}

impl std::fmt::Display for EnvelopeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EnvelopeError::UnknownTag(t) => write!(f, "unknown envelope tag: {t}"),
            EnvelopeError::MissingField { tag, field } => {
                write!(f, "envelope tag {tag} missing required field `{field}`")
            }
        }
    }
}

impl std::error::Error for EnvelopeError {}

impl From<Envelope> for RawEnvelope {
    fn from(env: Envelope) -> Self {
        match env {
            Envelope::Call {
                req_id,
                iface,
                meth,
                args,
                fwd_dest,
            } => RawEnvelope {
                mtype: tags::CALL,
                req_id,
                iface: Some(iface),
                meth: Some(meth),
                args: Some(args),
                fwd_dest,
                ..Default::default()
            },
            Envelope::RespData { req_id, data } => RawEnvelope {
                mtype: tags::RESP_DATA,
                req_id: Some(req_id),
                data,
                ..Default::default()
            },
            Envelope::RespErr { req_id, mesg, code } => RawEnvelope {
                mtype: tags::RESP_ERR,
                req_id: Some(req_id),
                mesg: Some(mesg),
                code,
                ..Default::default()
            },
            Envelope::Custom { data, fwd_dest } => RawEnvelope {
                mtype: tags::CUSTOM,
                data,
                fwd_dest,
                ..Default::default()
            },
            Envelope::Ready => RawEnvelope {
                mtype: tags::READY,
                ..Default::default()
            },
        }
    }
}

impl TryFrom<RawEnvelope> for Envelope {
    type Error = EnvelopeError;

    fn try_from(raw: RawEnvelope) -> Result<Self, Self::Error> {
        fn require<T>(
            value: Option<T>,
            tag: u8,
            field: &'static str,
        ) -> Result<T, EnvelopeError> {
            value.ok_or(EnvelopeError::MissingField { tag, field })
        }

        match raw.mtype {
            tags::CALL => Ok(Envelope::Call {
                req_id: raw.req_id,
                iface: require(raw.iface, tags::CALL, "iface")?,
                meth: require(raw.meth, tags::CALL, "meth")?,
                args: raw.args.unwrap_or_default(),
                fwd_dest: raw.fwd_dest,
            }),
            tags::RESP_DATA => Ok(Envelope::RespData {
                req_id: require(raw.req_id, tags::RESP_DATA, "reqId")?,
                data: raw.data,
            }),
            tags::RESP_ERR => Ok(Envelope::RespErr {
                req_id: require(raw.req_id, tags::RESP_ERR, "reqId")?,
                mesg: require(raw.mesg, tags::RESP_ERR, "mesg")?,
                code: raw.code,
            }),
            tags::CUSTOM => Ok(Envelope::Custom {
                data: raw.data,
                fwd_dest: raw.fwd_dest,
            }),
            tags::READY => Ok(Envelope::Ready),
            other => Err(EnvelopeError::UnknownTag(other)),
        }
    }
}
