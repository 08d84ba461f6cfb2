//! Inbound envelope dispatch.
//!
//! [`Endpoint::receive`] lands here once queueing is out of the way. The
//! dispatcher branches on the envelope tag: calls go to an implementation
//! or a forwarder, responses resolve the pending table, custom messages
//! emit `"message"` events or forward, and `Ready` lifts the outbound
//! gate.
//!
//! Call invocations and forward relays run as spawned tasks. That keeps
//! the receive path non-blocking and lets an implementation issue nested
//! calls through the same endpoint without deadlocking on its own
//! dispatch.

use serde_json::Value;
use tracing::debug;

use patchbay_wire::{codes, Envelope};

use crate::endpoint::Endpoint;
use crate::forwarding::Forwarder;
use crate::RpcError;

impl Endpoint {
    /// Dispatch one envelope. Called exactly once per accepted envelope.
    pub(crate) async fn dispatch(&self, env: Envelope) {
        match env {
            Envelope::Call {
                req_id,
                iface,
                meth,
                args,
                fwd_dest,
            } => self.handle_call(req_id, iface, meth, args, fwd_dest).await,
            Envelope::RespData { req_id, data } => self.handle_resp_data(req_id, data),
            Envelope::RespErr { req_id, mesg, code } => self.handle_resp_err(req_id, mesg, code),
            Envelope::Custom { data, fwd_dest } => self.handle_custom(data, fwd_dest).await,
            Envelope::Ready => self.handle_ready().await,
        }
    }

    async fn handle_call(
        &self,
        req_id: Option<u64>,
        iface: String,
        meth: String,
        args: Vec<Value>,
        fwd_dest: Option<String>,
    ) {
        // Tagged envelopes go to the named forwarder, or to the wildcard.
        if let Some(dest) = fwd_dest {
            match self.lookup_forwarder(&dest) {
                Some(forwarder) => {
                    let Some(req_id) = req_id else {
                        self.inner.logger.warn(&format!(
                            "dropping forwarded call to `{iface}.{meth}` without request id"
                        ));
                        return;
                    };
                    debug!(req_id, dest = %dest, "relaying call through forwarder");
                    let ep = self.clone();
                    tokio::spawn(async move {
                        let result = forwarder.invoke_call(iface, meth, args, &dest).await;
                        ep.respond(req_id, result).await;
                    });
                }
                None => {
                    self.respond_error_or_drop(
                        req_id,
                        codes::UNKNOWN_FORWARD_DEST,
                        format!("no forwarder registered for `{dest}`"),
                    )
                    .await;
                }
            }
            return;
        }

        // Local delivery. An empty interface name (from a leading `@` in a
        // sugared call name) falls out here as unknown.
        let record = {
            let st = self.inner.state.lock().unwrap();
            st.impls.get(&iface).cloned()
        };
        let Some(record) = record else {
            self.respond_error_or_drop(
                req_id,
                codes::UNKNOWN_INTERFACE,
                format!("unknown interface `{iface}`"),
            )
            .await;
            return;
        };

        if let Some(checker) = &record.checker {
            match checker.args_checker(&meth) {
                None => {
                    self.respond_error_or_drop(
                        req_id,
                        codes::UNKNOWN_METHOD,
                        format!("interface `{iface}` has no method `{meth}`"),
                    )
                    .await;
                    return;
                }
                Some(args_checker) => {
                    if let Err(err) = args_checker.check_args(&args) {
                        self.respond_error_or_drop(req_id, codes::INVALID_ARGS, err.0).await;
                        return;
                    }
                }
            }
        }

        // Fire-and-forget is currently a protocol error. The rejection
        // echoes request id 0, an id no caller ever allocates.
        let Some(req_id) = req_id else {
            self.respond(
                0,
                Err(RpcError::coded(
                    codes::MISSING_REQID,
                    format!("call to `{iface}.{meth}` without request id"),
                )),
            )
            .await;
            return;
        };

        debug!(req_id, iface = %iface, meth = %meth, "invoking implementation");
        let fut = record.invoker.invoke(&meth, args);
        let ep = self.clone();
        tokio::spawn(async move {
            let result = fut.await;
            ep.respond(req_id, result).await;
        });
    }

    fn handle_resp_data(&self, req_id: u64, data: Option<Value>) {
        let Some(pending) = self.take_pending(req_id) else {
            self.inner.logger.warn(&format!(
                "{}: response data for unknown request id {req_id}",
                codes::UNKNOWN_REQID
            ));
            return;
        };
        let value = data.unwrap_or(Value::Null);
        let result = match &pending.result_checker {
            Some(checker) => match checker.check_result(&value) {
                Ok(()) => Ok(value),
                Err(err) => Err(RpcError::coded(
                    codes::INVALID_RESULT,
                    format!("result of `{}.{}`: {}", pending.iface, pending.meth, err.0),
                )),
            },
            None => Ok(value),
        };
        let _ = pending.tx.send(result);
    }

    fn handle_resp_err(&self, req_id: u64, mesg: String, code: Option<String>) {
        let Some(pending) = self.take_pending(req_id) else {
            self.inner.logger.warn(&format!(
                "{}: error response for unknown request id {req_id}",
                codes::UNKNOWN_REQID
            ));
            return;
        };
        let _ = pending.tx.send(Err(RpcError { code, message: mesg }));
    }

    async fn handle_custom(&self, data: Option<Value>, fwd_dest: Option<String>) {
        if let Some(dest) = fwd_dest {
            match self.lookup_forwarder(&dest) {
                Some(forwarder) => {
                    if let Err(err) = forwarder.invoke_custom(data, &dest).await {
                        self.inner
                            .logger
                            .warn(&format!("forwarding custom message to `{dest}`: {err}"));
                    }
                }
                None => {
                    self.inner.logger.warn(&format!(
                        "{}: no forwarder registered for `{dest}`, dropping custom message",
                        codes::UNKNOWN_FORWARD_DEST
                    ));
                }
            }
            return;
        }
        self.emit_message(&data.unwrap_or(Value::Null));
    }

    /// Lift the outbound gate and flush what queued up behind it. Drain
    /// errors are swallowed: the send path already emitted `"error"`.
    async fn handle_ready(&self) {
        {
            let mut st = self.inner.state.lock().unwrap();
            st.awaiting_ready = false;
        }
        debug!("peer ready, draining outbound queue");
        let mut slot = self.inner.send.lock().await;
        if slot.is_some() {
            let _ = self.drain_outbound(&mut slot).await;
        }
    }

    fn lookup_forwarder(&self, dest: &str) -> Option<Forwarder> {
        let st = self.inner.state.lock().unwrap();
        st.forwarders
            .get(dest)
            .or_else(|| st.forwarders.get("*"))
            .cloned()
    }

    /// Reply to a call with success data or an error envelope.
    pub(crate) async fn respond(&self, req_id: u64, result: Result<Value, RpcError>) {
        let env = match result {
            Ok(data) => Envelope::RespData {
                req_id,
                data: Some(data),
            },
            Err(err) => Envelope::RespErr {
                req_id,
                mesg: err.message,
                code: err.code,
            },
        };
        if self.send_envelope(env).await.is_err() {
            // An "error" event already fired from the send path.
        }
    }

    /// Reply with an error, or drop when the call was fire-and-forget.
    async fn respond_error_or_drop(&self, req_id: Option<u64>, code: &str, mesg: String) {
        match req_id {
            Some(req_id) => {
                self.respond(req_id, Err(RpcError::coded(code, mesg))).await;
            }
            None => {
                self.inner.logger.warn(&format!("{code}: {mesg} (dropped, no request id)"));
            }
        }
    }
}
