//! Forwarder records: route tagged envelopes to a sibling endpoint.
//!
//! A forwarder registered on endpoint X under `name` handles every inbound
//! envelope whose `fwdDest` is `name` (or any unmatched destination, for
//! the wildcard `"*"`). It rewrites the destination per its policy and
//! hands the envelope to the peer endpoint's forward API, which sends it
//! out on the peer's own channel under a freshly allocated request id.
//! Responses come back the same way: the peer correlates its own id and
//! the forwarding hop answers the original caller with the original id.
//!
//! Forwarders never check arguments; checking is the terminal endpoint's
//! job.

use serde_json::Value;

use crate::{Endpoint, RpcError};

/// How a forwarder rewrites the destination tag before handing off.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ForwardPolicy {
    /// Leave `fwdDest` untouched so the downstream hop can dispatch it.
    PassThrough,
    /// Replace `fwdDest`. The empty string means deliver locally at the
    /// peer (the tag is cleared on the rewritten envelope).
    Rewrite(String),
}

/// Resolve the policy for a registration. An omitted policy means deliver
/// locally, except when registering the wildcard itself, which defaults to
/// pass-through so unmapped destinations survive the hop.
pub(crate) fn policy_for(name: &str, fwd_dest: Option<&str>) -> ForwardPolicy {
    match fwd_dest {
        Some("*") => ForwardPolicy::PassThrough,
        Some(dest) => ForwardPolicy::Rewrite(dest.to_string()),
        None if name == "*" => ForwardPolicy::PassThrough,
        None => ForwardPolicy::Rewrite(String::new()),
    }
}

#[derive(Clone)]
pub(crate) struct Forwarder {
    peer: Endpoint,
    policy: ForwardPolicy,
}

impl Forwarder {
    pub(crate) fn new(peer: Endpoint, policy: ForwardPolicy) -> Self {
        Self { peer, policy }
    }

    /// The destination the rewritten envelope carries. `None` means the
    /// peer's peer delivers locally.
    pub(crate) fn next_dest(&self, current: &str) -> Option<String> {
        match &self.policy {
            ForwardPolicy::PassThrough => Some(current.to_string()),
            ForwardPolicy::Rewrite(dest) if dest.is_empty() => None,
            ForwardPolicy::Rewrite(dest) => Some(dest.clone()),
        }
    }

    /// Relay a call through the peer endpoint and await its result.
    pub(crate) async fn invoke_call(
        &self,
        iface: String,
        meth: String,
        args: Vec<Value>,
        current: &str,
    ) -> Result<Value, RpcError> {
        let dest = self.next_dest(current);
        self.peer.forward_call(iface, meth, args, dest).await
    }

    /// Relay a custom message through the peer endpoint.
    pub(crate) async fn invoke_custom(
        &self,
        data: Option<Value>,
        current: &str,
    ) -> Result<(), RpcError> {
        let dest = self.next_dest(current);
        self.peer.forward_post(data, dest).await
    }
}
