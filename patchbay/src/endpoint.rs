//! The endpoint façade: one instance of the RPC multiplexer, owning one
//! channel.
//!
//! An [`Endpoint`] is a cheap-to-clone handle over shared state, the way a
//! connection handle wraps its driver state. The user supplies a send
//! function ([`SendFn`]) and feeds received envelopes into
//! [`Endpoint::receive`]; the registries, pending calls, queues and
//! events all live inside.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::debug;

use patchbay_wire::{codes, Envelope};

use crate::events::Listeners;
use crate::forwarding::{policy_for, Forwarder};
use crate::schema::{InterfaceChecker, ResultChecker};
use crate::stub::{split_call_name, Stub};
use crate::{RegisterError, RequestIdGenerator, RpcError};

/// The method name behind [`Endpoint::register_func`] /
/// [`Endpoint::call_remote`]: a bare function is a synthetic interface with
/// this single method.
pub(crate) const FUNC_METHOD: &str = "invoke";

/// Error type a user send function may fail with.
pub type DynError = Box<dyn std::error::Error + Send + Sync>;

/// Future returned by a user send function.
pub type SendFuture = BoxFuture<'static, Result<(), DynError>>;

/// The user-supplied send callback. Invoked exclusively: never
/// re-entrantly, never concurrently with itself.
pub type SendFn = Box<dyn FnMut(Envelope) -> SendFuture + Send>;

/// Box an async closure into a [`SendFn`].
pub fn send_fn<F, Fut>(mut f: F) -> SendFn
where
    F: FnMut(Envelope) -> Fut + Send + 'static,
    Fut: std::future::Future<Output = Result<(), DynError>> + Send + 'static,
{
    Box::new(move |env| Box::pin(f(env)))
}

/// Future of one outgoing call.
pub type BoxCallFuture = BoxFuture<'static, Result<Value, RpcError>>;

/// Around-advice applied to every outgoing call. The inner future is lazy:
/// nothing is sent until the wrapper polls it, and the wrapper may suspend
/// both before and after.
pub type CallWrapper = Arc<dyn Fn(BoxCallFuture) -> BoxCallFuture + Send + Sync>;

/// Logging hooks recognized by the endpoint configuration.
pub trait Logger: Send + Sync {
    fn info(&self, message: &str);
    fn warn(&self, message: &str);
}

/// Default [`Logger`]: forwards to `tracing` at the matching levels.
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn info(&self, message: &str) {
        tracing::info!(target: "patchbay", "{message}");
    }

    fn warn(&self, message: &str) {
        tracing::warn!(target: "patchbay", "{message}");
    }
}

/// A named interface implementation.
///
/// `invoke` receives the method name and the positional arguments and
/// returns the call's future. For a method the implementation does not
/// have, return [`RpcError::unknown_method`]; when the implementation is
/// registered without a checker that is the only missing-method signal the
/// remote caller gets.
pub trait Implementation: Send + Sync {
    fn invoke(&self, meth: &str, args: Vec<Value>) -> BoxFuture<'static, Result<Value, RpcError>>;
}

/// Implementation registry entry: invoker plus optional arg checkers.
#[derive(Clone)]
pub(crate) struct ImplRecord {
    pub(crate) invoker: Arc<dyn Implementation>,
    pub(crate) checker: Option<Arc<dyn InterfaceChecker>>,
}

/// One unresolved outgoing call.
pub(crate) struct PendingCall {
    pub(crate) iface: String,
    pub(crate) meth: String,
    pub(crate) tx: oneshot::Sender<Result<Value, RpcError>>,
    pub(crate) result_checker: Option<Arc<dyn ResultChecker>>,
}

/// Mutable endpoint state. Held behind a synchronous lock that is never
/// kept across an await.
pub(crate) struct State {
    pub(crate) impls: HashMap<String, ImplRecord>,
    pub(crate) forwarders: HashMap<String, Forwarder>,
    pub(crate) pending: HashMap<u64, PendingCall>,
    /// `Some` while inbound dispatch is suspended via `queue_incoming`.
    pub(crate) inbound: Option<VecDeque<Envelope>>,
    /// Envelopes waiting for a send function (or for peer-ready).
    pub(crate) outbound: VecDeque<Envelope>,
    pub(crate) awaiting_ready: bool,
    pub(crate) closed: bool,
}

pub(crate) struct EndpointInner {
    pub(crate) state: Mutex<State>,
    /// The send slot doubles as the send lock: holding it guarantees the
    /// user function is never invoked re-entrantly.
    pub(crate) send: tokio::sync::Mutex<Option<SendFn>>,
    pub(crate) request_ids: RequestIdGenerator,
    pub(crate) listeners: Mutex<Listeners>,
    pub(crate) logger: Arc<dyn Logger>,
    pub(crate) call_wrapper: CallWrapper,
}

/// Builder for [`Endpoint`].
pub struct EndpointBuilder {
    logger: Option<Arc<dyn Logger>>,
    send: Option<SendFn>,
    call_wrapper: Option<CallWrapper>,
}

impl EndpointBuilder {
    /// Install logging hooks. Defaults to [`TracingLogger`].
    pub fn logger(mut self, logger: Arc<dyn Logger>) -> Self {
        self.logger = Some(logger);
        self
    }

    /// Install the send function up front. Without one the endpoint starts
    /// with outbound queueing on.
    pub fn send(mut self, send: SendFn) -> Self {
        self.send = Some(send);
        self
    }

    /// Wrap every outgoing call. Default is pass-through.
    pub fn call_wrapper(mut self, wrapper: CallWrapper) -> Self {
        self.call_wrapper = Some(wrapper);
        self
    }

    pub fn build(self) -> Endpoint {
        Endpoint {
            inner: Arc::new(EndpointInner {
                state: Mutex::new(State {
                    impls: HashMap::new(),
                    forwarders: HashMap::new(),
                    pending: HashMap::new(),
                    inbound: None,
                    outbound: VecDeque::new(),
                    awaiting_ready: false,
                    closed: false,
                }),
                send: tokio::sync::Mutex::new(self.send),
                request_ids: RequestIdGenerator::new(),
                listeners: Mutex::new(Listeners::default()),
                logger: self.logger.unwrap_or_else(|| Arc::new(TracingLogger)),
                call_wrapper: self.call_wrapper.unwrap_or_else(|| Arc::new(|fut| fut)),
            }),
        }
    }
}

/// One instance of the RPC multiplexer. Clones share state.
#[derive(Clone)]
pub struct Endpoint {
    pub(crate) inner: Arc<EndpointInner>,
}

impl Default for Endpoint {
    fn default() -> Self {
        Self::new()
    }
}

impl Endpoint {
    /// An endpoint with default configuration and no send function:
    /// outgoing envelopes queue until [`Endpoint::set_send`].
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> EndpointBuilder {
        EndpointBuilder {
            logger: None,
            send: None,
            call_wrapper: None,
        }
    }

    // ========================================================================
    // Receive side
    // ========================================================================

    /// Feed one received envelope in. Either enqueues it (while inbound
    /// dispatch is suspended) or dispatches it immediately. Every accepted
    /// envelope is dispatched exactly once.
    pub async fn receive(&self, env: Envelope) {
        {
            let mut st = self.inner.state.lock().unwrap();
            if let Some(queue) = st.inbound.as_mut() {
                queue.push_back(env);
                return;
            }
        }
        self.dispatch(env).await;
    }

    /// Suspend inbound dispatch; subsequent [`Endpoint::receive`] calls
    /// enqueue. Lets the user register implementations after traffic has
    /// begun, then [`Endpoint::process_incoming`].
    pub fn queue_incoming(&self) {
        let mut st = self.inner.state.lock().unwrap();
        if st.inbound.is_none() {
            st.inbound = Some(VecDeque::new());
        }
    }

    /// Resume inbound dispatch, draining queued envelopes in arrival
    /// order. Draining an already-drained queue is a no-op.
    pub async fn process_incoming(&self) {
        loop {
            let env = {
                let mut st = self.inner.state.lock().unwrap();
                match st.inbound.as_mut().and_then(|queue| queue.pop_front()) {
                    Some(env) => env,
                    None => {
                        st.inbound = None;
                        return;
                    }
                }
            };
            self.dispatch(env).await;
        }
    }

    // ========================================================================
    // Send side
    // ========================================================================

    /// Install or clear the send function. Installing drains the outbound
    /// queue in arrival order unless the ready gate is up; the first send
    /// failure stops the drain, consumes the failed envelope, and returns
    /// the error (a later `set_send` resumes with the next envelope).
    pub async fn set_send(&self, send: Option<SendFn>) -> Result<(), RpcError> {
        let mut slot = self.inner.send.lock().await;
        *slot = send;
        if slot.is_some() {
            let gated = self.inner.state.lock().unwrap().awaiting_ready;
            if !gated {
                self.drain_outbound(&mut slot).await?;
            }
        }
        Ok(())
    }

    /// Legacy alias: install the send function and drain both queues.
    pub async fn start(&self, send: SendFn) -> Result<(), RpcError> {
        self.set_send(Some(send)).await?;
        self.process_incoming().await;
        Ok(())
    }

    /// Declare that nothing will be emitted until the peer has sent
    /// `Ready`. At most one side of a channel may gate; gating both sides
    /// deadlocks.
    pub fn queue_outgoing_until_ready(&self) {
        let mut st = self.inner.state.lock().unwrap();
        st.awaiting_ready = true;
    }

    /// Signal readiness to a peer that gates its outbound queue.
    pub async fn send_ready(&self) -> Result<(), RpcError> {
        self.send_envelope(Envelope::Ready).await
    }

    /// Send one envelope: queue it while queueing is active, otherwise
    /// emit through the user send function.
    pub(crate) async fn send_envelope(&self, env: Envelope) -> Result<(), RpcError> {
        let mut slot = self.inner.send.lock().await;
        {
            let mut st = self.inner.state.lock().unwrap();
            if st.closed {
                return Err(RpcError::endpoint_closed());
            }
            // A non-empty queue means an earlier drain aborted; appending
            // keeps emission order intact.
            if slot.is_none() || st.awaiting_ready || !st.outbound.is_empty() {
                debug!(mtype = env.mtype(), "queueing outbound envelope");
                st.outbound.push_back(env);
                return Ok(());
            }
        }
        let send = slot.as_mut().expect("send slot checked above");
        self.emit_now(send, env).await
    }

    /// Invoke the user send function for one envelope. Failure rejects the
    /// affected pending call (when the envelope was a call), emits an
    /// `"error"` event, and returns the error to the send site.
    async fn emit_now(&self, send: &mut SendFn, env: Envelope) -> Result<(), RpcError> {
        let req_id = env.call_req_id();
        match (send)(env).await {
            Ok(()) => Ok(()),
            Err(cause) => {
                let err = RpcError::coded(codes::SEND_FAILED, format!("send failed: {cause}"));
                if let Some(req_id) = req_id {
                    self.reject_pending(req_id, err.clone());
                }
                self.emit_error(&err);
                Err(err)
            }
        }
    }

    /// Drain the outbound queue through the installed send function. Each
    /// envelope is removed from the queue before it is dispatched, so a
    /// failing envelope is consumed and not retried on the next drain.
    pub(crate) async fn drain_outbound(
        &self,
        slot: &mut Option<SendFn>,
    ) -> Result<(), RpcError> {
        let mut drained = 0usize;
        loop {
            let env = {
                let mut st = self.inner.state.lock().unwrap();
                if st.awaiting_ready {
                    return Ok(());
                }
                match st.outbound.pop_front() {
                    Some(env) => env,
                    None => {
                        if drained > 0 {
                            self.inner
                                .logger
                                .info(&format!("drained {drained} queued envelope(s)"));
                        }
                        return Ok(());
                    }
                }
            };
            let send = match slot.as_mut() {
                Some(send) => send,
                None => return Ok(()),
            };
            drained += 1;
            self.emit_now(send, env).await?;
        }
    }

    // ========================================================================
    // Registration
    // ========================================================================

    /// Register a named interface implementation, optionally validated by
    /// a checker. Duplicate names are a synchronous error.
    pub fn register_impl(
        &self,
        name: &str,
        implementation: impl Implementation + 'static,
        checker: Option<Arc<dyn InterfaceChecker>>,
    ) -> Result<(), RegisterError> {
        let mut st = self.inner.state.lock().unwrap();
        if st.impls.contains_key(name) {
            return Err(RegisterError::DuplicateImpl(name.to_string()));
        }
        st.impls.insert(
            name.to_string(),
            ImplRecord {
                invoker: Arc::new(implementation),
                checker,
            },
        );
        Ok(())
    }

    pub fn unregister_impl(&self, name: &str) -> Result<(), RegisterError> {
        let mut st = self.inner.state.lock().unwrap();
        match st.impls.remove(name) {
            Some(_) => Ok(()),
            None => Err(RegisterError::UnknownImpl(name.to_string())),
        }
    }

    /// Register a bare function under `name`: sugar over a synthetic
    /// interface with the single method `invoke`.
    pub fn register_func<F, Fut>(&self, name: &str, func: F) -> Result<(), RegisterError>
    where
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<Value, RpcError>> + Send + 'static,
    {
        struct FuncImpl<F>(F);

        impl<F, Fut> Implementation for FuncImpl<F>
        where
            F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
            Fut: std::future::Future<Output = Result<Value, RpcError>> + Send + 'static,
        {
            fn invoke(
                &self,
                meth: &str,
                args: Vec<Value>,
            ) -> BoxFuture<'static, Result<Value, RpcError>> {
                if meth != FUNC_METHOD {
                    let err = RpcError::unknown_method(meth);
                    return Box::pin(async move { Err(err) });
                }
                Box::pin((self.0)(args))
            }
        }

        self.register_impl(name, FuncImpl(func), None)
    }

    pub fn unregister_func(&self, name: &str) -> Result<(), RegisterError> {
        self.unregister_impl(name)
    }

    /// Register a forwarder: inbound envelopes tagged `name` are rewritten
    /// per `fwd_dest` and relayed through `peer`. An omitted policy means
    /// deliver locally at the peer; registering under `"*"` installs the
    /// wildcard, which defaults to pass-through.
    pub fn register_forwarder(
        &self,
        name: &str,
        peer: &Endpoint,
        fwd_dest: Option<&str>,
    ) -> Result<(), RegisterError> {
        let mut st = self.inner.state.lock().unwrap();
        if st.forwarders.contains_key(name) {
            return Err(RegisterError::DuplicateForwarder(name.to_string()));
        }
        st.forwarders.insert(
            name.to_string(),
            Forwarder::new(peer.clone(), policy_for(name, fwd_dest)),
        );
        Ok(())
    }

    pub fn unregister_forwarder(&self, name: &str) -> Result<(), RegisterError> {
        let mut st = self.inner.state.lock().unwrap();
        match st.forwarders.remove(name) {
            Some(_) => Ok(()),
            None => Err(RegisterError::UnknownForwarder(name.to_string())),
        }
    }

    // ========================================================================
    // Calls
    // ========================================================================

    /// A stub for a named interface. `"iface@forwarder"` sugar applies:
    /// the part after the last `@` names a forwarder on the peer.
    pub fn get_stub(&self, name: &str, checker: Option<Arc<dyn InterfaceChecker>>) -> Stub {
        let (iface, forwarder) = split_call_name(name);
        Stub::new(
            self.clone(),
            iface.to_string(),
            forwarder.map(str::to_string),
            checker,
        )
    }

    /// A stub whose calls are tagged for `forwarder` on the peer. The name
    /// is taken verbatim; the explicit forwarder wins over `@` sugar.
    pub fn get_stub_via(
        &self,
        forwarder: &str,
        name: &str,
        checker: Option<Arc<dyn InterfaceChecker>>,
    ) -> Stub {
        Stub::new(
            self.clone(),
            name.to_string(),
            Some(forwarder.to_string()),
            checker,
        )
    }

    /// Call a bare function registered with
    /// [`register_func`](Endpoint::register_func) on the peer.
    /// `"name@forwarder"` sugar applies.
    pub async fn call_remote(&self, name: &str, args: Vec<Value>) -> Result<Value, RpcError> {
        let (iface, forwarder) = split_call_name(name);
        self.call_raw(
            iface.to_string(),
            FUNC_METHOD.to_string(),
            args,
            forwarder.map(str::to_string),
            None,
        )
        .await
    }

    /// [`call_remote`](Endpoint::call_remote) tagged for a forwarder on
    /// the peer.
    pub async fn call_remote_via(
        &self,
        forwarder: &str,
        name: &str,
        args: Vec<Value>,
    ) -> Result<Value, RpcError> {
        self.call_raw(
            name.to_string(),
            FUNC_METHOD.to_string(),
            args,
            Some(forwarder.to_string()),
            None,
        )
        .await
    }

    /// Send a custom (non-RPC) message to the peer.
    pub async fn post(&self, data: Value) -> Result<(), RpcError> {
        self.send_envelope(Envelope::Custom {
            data: Some(data),
            fwd_dest: None,
        })
        .await
    }

    /// Send a custom message tagged for a forwarder on the peer.
    pub async fn post_via(&self, forwarder: &str, data: Value) -> Result<(), RpcError> {
        self.send_envelope(Envelope::Custom {
            data: Some(data),
            fwd_dest: Some(forwarder.to_string()),
        })
        .await
    }

    // ========================================================================
    // Forward API (used by forwarders on sibling endpoints, and by any
    // overlay gluing endpoints into a mesh)
    // ========================================================================

    /// Emit a call on this endpoint's channel under a freshly allocated
    /// request id and await the result. No argument or result checking:
    /// checking is the terminal endpoint's job.
    pub async fn forward_call(
        &self,
        iface: String,
        meth: String,
        args: Vec<Value>,
        fwd_dest: Option<String>,
    ) -> Result<Value, RpcError> {
        self.call_raw(iface, meth, args, fwd_dest, None).await
    }

    /// Emit a custom message on this endpoint's channel.
    pub async fn forward_post(
        &self,
        data: Option<Value>,
        fwd_dest: Option<String>,
    ) -> Result<(), RpcError> {
        self.send_envelope(Envelope::Custom { data, fwd_dest }).await
    }

    /// The shared outgoing-call path: allocate a request id, insert the
    /// pending record, compose the call envelope, hand it to the send
    /// path, and await the response. The whole call runs inside the
    /// configured call wrapper; the inner future is lazy.
    pub(crate) async fn call_raw(
        &self,
        iface: String,
        meth: String,
        args: Vec<Value>,
        fwd_dest: Option<String>,
        result_checker: Option<Arc<dyn ResultChecker>>,
    ) -> Result<Value, RpcError> {
        let ep = self.clone();
        let fut: BoxCallFuture = Box::pin(async move {
            let (tx, rx) = oneshot::channel();
            let req_id = {
                let mut st = ep.inner.state.lock().unwrap();
                if st.closed {
                    return Err(RpcError::endpoint_closed());
                }
                let req_id = ep.inner.request_ids.next();
                st.pending.insert(
                    req_id,
                    PendingCall {
                        iface: iface.clone(),
                        meth: meth.clone(),
                        tx,
                        result_checker,
                    },
                );
                req_id
            };
            debug!(req_id, iface = %iface, meth = %meth, "issuing call");
            let env = Envelope::Call {
                req_id: Some(req_id),
                iface,
                meth,
                args,
                fwd_dest,
            };
            if ep.send_envelope(env).await.is_err() {
                // The send path already rejected the pending record; the
                // rejection arrives through rx below.
            }
            match rx.await {
                Ok(result) => result,
                Err(_) => Err(RpcError::endpoint_closed()),
            }
        });
        (self.inner.call_wrapper)(fut).await
    }

    // ========================================================================
    // Events
    // ========================================================================

    /// Observe custom messages delivered to this endpoint.
    pub fn on_message(&self, listener: impl Fn(&Value) + Send + Sync + 'static) {
        self.inner
            .listeners
            .lock()
            .unwrap()
            .add_message(Arc::new(listener));
    }

    /// Observe errors: send failures and other conditions that do not
    /// belong to a specific call.
    pub fn on_error(&self, listener: impl Fn(&RpcError) + Send + Sync + 'static) {
        self.inner
            .listeners
            .lock()
            .unwrap()
            .add_error(Arc::new(listener));
    }

    pub(crate) fn emit_message(&self, data: &Value) {
        let listeners = self.inner.listeners.lock().unwrap().message_listeners();
        for listener in listeners {
            listener(data);
        }
    }

    pub(crate) fn emit_error(&self, err: &RpcError) {
        let listeners = self.inner.listeners.lock().unwrap().error_listeners();
        for listener in listeners {
            listener(err);
        }
    }

    // ========================================================================
    // Pending table
    // ========================================================================

    pub(crate) fn take_pending(&self, req_id: u64) -> Option<PendingCall> {
        self.inner.state.lock().unwrap().pending.remove(&req_id)
    }

    pub(crate) fn reject_pending(&self, req_id: u64, err: RpcError) {
        if let Some(pending) = self.take_pending(req_id) {
            let _ = pending.tx.send(Err(err));
        }
    }

    // ========================================================================
    // Teardown
    // ========================================================================

    /// Tear the endpoint down: clear the send slot and queues, and reject
    /// every pending call. Subsequent calls fail fast with the same code.
    pub async fn shutdown(&self) {
        let mut slot = self.inner.send.lock().await;
        *slot = None;
        let pending: Vec<PendingCall> = {
            let mut st = self.inner.state.lock().unwrap();
            st.closed = true;
            st.outbound.clear();
            st.inbound = None;
            st.pending.drain().map(|(_, pending)| pending).collect()
        };
        if !pending.is_empty() {
            self.inner
                .logger
                .info(&format!("shutdown: rejecting {} pending call(s)", pending.len()));
        }
        for call in pending {
            let _ = call.tx.send(Err(RpcError::endpoint_closed()));
        }
    }
}
