//! Stub factory: local handles whose method invocations become remote
//! calls.
//!
//! A checked stub enumerates its checker's method-typed members and
//! exposes exactly those; each captured method carries the checker's
//! result checker, run against response data on this side. An unchecked
//! stub yields a callable for any name except `"then"`, which reads as
//! absent so a stub returned from an async producer is never mistaken for
//! a thenable by promise-style plumbing.

use std::sync::Arc;

use serde_json::Value;

use patchbay_wire::codes;

use crate::schema::{InterfaceChecker, ResultChecker};
use crate::{Endpoint, RpcError};

/// Split `"iface@forwarder"` sugar. Only the last `@` separates; earlier
/// ones stay part of the interface name. An empty trailing segment means
/// no forwarder.
pub(crate) fn split_call_name(name: &str) -> (&str, Option<&str>) {
    match name.rsplit_once('@') {
        Some((iface, forwarder)) if !forwarder.is_empty() => (iface, Some(forwarder)),
        Some((iface, _)) => (iface, None),
        None => (name, None),
    }
}

/// A dynamic handle to a remote interface.
#[derive(Clone)]
pub struct Stub {
    endpoint: Endpoint,
    iface: String,
    forwarder: Option<String>,
    checker: Option<Arc<dyn InterfaceChecker>>,
}

impl Stub {
    pub(crate) fn new(
        endpoint: Endpoint,
        iface: String,
        forwarder: Option<String>,
        checker: Option<Arc<dyn InterfaceChecker>>,
    ) -> Self {
        Self {
            endpoint,
            iface,
            forwarder,
            checker,
        }
    }

    /// The remote interface name.
    pub fn iface(&self) -> &str {
        &self.iface
    }

    /// Method names a checked stub exposes. Empty for unchecked stubs,
    /// which accept any name.
    pub fn methods(&self) -> Vec<String> {
        self.checker
            .as_ref()
            .map(|checker| checker.method_names())
            .unwrap_or_default()
    }

    /// Look a method up. Checked stubs expose exactly the checker's
    /// method-typed members; unchecked stubs yield a callable for any
    /// name except `"then"`.
    pub fn method(&self, name: &str) -> Option<MethodStub> {
        let result_checker = match &self.checker {
            Some(checker) => {
                // Absent from the checker means not a method: no callable.
                Some(checker.result_checker(name)?)
            }
            None => {
                if name == "then" {
                    return None;
                }
                None
            }
        };
        Some(MethodStub {
            endpoint: self.endpoint.clone(),
            iface: self.iface.clone(),
            meth: name.to_string(),
            forwarder: self.forwarder.clone(),
            result_checker,
        })
    }

    /// Invoke a method by name. Names the stub does not expose fail
    /// locally with `RPC_UNKNOWN_METHOD` without sending anything.
    pub async fn call(&self, meth: &str, args: Vec<Value>) -> Result<Value, RpcError> {
        match self.method(meth) {
            Some(method) => method.invoke(args).await,
            None => Err(RpcError::coded(
                codes::UNKNOWN_METHOD,
                format!("stub for `{}` has no method `{meth}`", self.iface),
            )),
        }
    }
}

/// One method of a [`Stub`], bound to `(iface, meth, result checker)`.
#[derive(Clone)]
pub struct MethodStub {
    endpoint: Endpoint,
    iface: String,
    meth: String,
    forwarder: Option<String>,
    result_checker: Option<Arc<dyn ResultChecker>>,
}

impl MethodStub {
    /// The method name this callable is bound to.
    pub fn name(&self) -> &str {
        &self.meth
    }

    /// Issue the remote call.
    pub async fn invoke(&self, args: Vec<Value>) -> Result<Value, RpcError> {
        self.endpoint
            .call_raw(
                self.iface.clone(),
                self.meth.clone(),
                args,
                self.forwarder.clone(),
                self.result_checker.clone(),
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_name_has_no_forwarder() {
        assert_eq!(split_call_name("calc"), ("calc", None));
    }

    #[test]
    fn last_at_separates() {
        assert_eq!(split_call_name("calc@fwd"), ("calc", Some("fwd")));
        assert_eq!(split_call_name("a@b@c"), ("a@b", Some("c")));
    }

    #[test]
    fn leading_at_means_empty_interface() {
        assert_eq!(split_call_name("@fwd"), ("", Some("fwd")));
    }

    #[test]
    fn trailing_lone_at_means_no_forwarder() {
        assert_eq!(split_call_name("calc@"), ("calc", None));
    }
}
