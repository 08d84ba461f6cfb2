#![deny(unsafe_code)]

//! Transport-agnostic, bidirectional, future-based RPC multiplexer.
//!
//! Supply a function that emits an [`Envelope`] and feed received
//! envelopes back in through [`Endpoint::receive`]; in exchange, either
//! side of the channel can register named interfaces (optionally validated
//! against an [`InterfaceChecker`]) or bare functions, and call the other
//! side's as if local. Custom non-RPC messages share the channel.
//! Forwarders let a node connected to several peers expose one peer's
//! endpoints to another without knowing their contents, so calls can hop
//! across chains and stars of channels.
//!
//! ```no_run
//! use patchbay::Endpoint;
//! use serde_json::json;
//!
//! # async fn demo(transport_send: patchbay::SendFn) -> Result<(), Box<dyn std::error::Error>> {
//! let ep = Endpoint::new();
//! ep.register_func("add", |args| async move {
//!     let x = args[0].as_f64().unwrap_or_default();
//!     let y = args[1].as_f64().unwrap_or_default();
//!     Ok(json!(x + y))
//! })?;
//! ep.set_send(Some(transport_send)).await?;
//! let nine = ep.call_remote("add", vec![json!(4), json!(5)]).await?;
//! # Ok(())
//! # }
//! ```
//!
//! Wire-level types live in [`patchbay_wire`], re-exported as [`wire`].

use std::sync::atomic::{AtomicU64, Ordering};

pub use patchbay_wire as wire;
pub use patchbay_wire::{codes, Envelope, EnvelopeError};
pub use serde_json::Value;

mod dispatch;
mod endpoint;
mod errors;
mod events;
mod forwarding;
mod schema;
mod stub;

pub use endpoint::{
    send_fn, BoxCallFuture, CallWrapper, DynError, Endpoint, EndpointBuilder, Implementation,
    Logger, SendFn, SendFuture, TracingLogger,
};
pub use errors::{RegisterError, RpcError};
pub use schema::{
    ArgsChecker, CheckError, InterfaceChecker, InterfaceSchema, MethodSpec, ResultChecker,
    ValueType,
};
pub use stub::{MethodStub, Stub};

/// Generates request ids for one endpoint: monotonically increasing from
/// 1, unique only locally (the responder echoes them verbatim).
pub struct RequestIdGenerator {
    next: AtomicU64,
}

impl RequestIdGenerator {
    /// Create a new generator starting at 1.
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    /// Generate the next request id.
    pub fn next(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for RequestIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}
