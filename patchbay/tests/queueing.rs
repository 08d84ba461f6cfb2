//! Lifecycle queueing: outbound queue draining, send-failure semantics,
//! the ready handshake, and ordering guarantees.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use patchbay::{codes, send_fn, DynError, Endpoint, Envelope, SendFn, Value};
use patchbay_memory::endpoint_pair;
use serde_json::json;

async fn wait_until(mut cond: impl FnMut() -> bool) {
    for _ in 0..500 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    panic!("condition not reached in time");
}

/// A send function whose n-th invocation (1-based) fails with `message`;
/// every other envelope lands in `sink`.
fn failing_on(n: usize, message: &'static str, sink: Arc<Mutex<Vec<Envelope>>>) -> SendFn {
    let count = AtomicUsize::new(0);
    send_fn(move |env| {
        let sink = sink.clone();
        let invocation = count.fetch_add(1, Ordering::SeqCst) + 1;
        async move {
            if invocation == n {
                return Err::<(), DynError>(message.into());
            }
            sink.lock().unwrap().push(env);
            Ok(())
        }
    })
}

/// A send function that answers every call envelope with response data by
/// feeding it straight back into the endpoint.
fn fake_responder(ep: Endpoint, reply: Value, sink: Arc<Mutex<Vec<Envelope>>>) -> SendFn {
    send_fn(move |env| {
        let ep = ep.clone();
        let reply = reply.clone();
        let sink = sink.clone();
        async move {
            let req_id = env.call_req_id();
            sink.lock().unwrap().push(env);
            if let Some(req_id) = req_id {
                ep.receive(Envelope::RespData {
                    req_id,
                    data: Some(reply),
                })
                .await;
            }
            Ok(())
        }
    })
}

#[tokio::test]
async fn send_failure_during_drain_consumes_the_failed_envelope() {
    let ep = Endpoint::new();

    // Queue three posts and two calls while no send function exists.
    ep.post(json!("x")).await.unwrap();
    ep.post(json!("y")).await.unwrap();
    ep.post(json!("z")).await.unwrap();
    let call_f = {
        let ep = ep.clone();
        tokio::spawn(async move { ep.call_remote("f", vec![json!(1)]).await })
    };
    tokio::task::yield_now().await;
    let call_g = {
        let ep = ep.clone();
        tokio::spawn(async move { ep.call_remote("g", vec![json!(2)]).await })
    };
    tokio::task::yield_now().await;

    // First install: the second invocation ("y") throws. The drain stops,
    // "y" is consumed, and the error comes back out of set_send.
    let sink1 = Arc::new(Mutex::new(Vec::new()));
    let err = ep
        .set_send(Some(failing_on(2, "y throws", sink1.clone())))
        .await
        .unwrap_err();
    assert!(err.message.contains("y throws"), "got: {}", err.message);
    assert_eq!(sink1.lock().unwrap().len(), 1); // only "x" was emitted

    // Second install: "z" goes through, then the call to `f` throws. Its
    // pending call rejects with RPC_SEND_FAILED wrapping the cause.
    let sink2 = Arc::new(Mutex::new(Vec::new()));
    let err = ep
        .set_send(Some(failing_on(2, "f throws", sink2.clone())))
        .await
        .unwrap_err();
    assert!(err.message.contains("f throws"), "got: {}", err.message);
    assert_eq!(sink2.lock().unwrap().len(), 1); // only "z" was emitted

    let f_err = call_f.await.unwrap().unwrap_err();
    assert_eq!(f_err.code(), Some(codes::SEND_FAILED));
    assert!(f_err.message.contains("f throws"), "got: {}", f_err.message);

    // Third install with a fake responder: the remaining call to `g`
    // drains and completes.
    let sink3 = Arc::new(Mutex::new(Vec::new()));
    ep.set_send(Some(fake_responder(ep.clone(), json!(42), sink3.clone())))
        .await
        .unwrap();
    assert_eq!(call_g.await.unwrap().unwrap(), json!(42));

    let sent = sink3.lock().unwrap();
    assert_eq!(sent.len(), 1);
    match &sent[0] {
        Envelope::Call { iface, .. } => assert_eq!(iface, "g"),
        other => panic!("expected the call to g, got {other:?}"),
    }
}

#[tokio::test]
async fn error_event_fires_for_each_send_failure() {
    let ep = Endpoint::new();
    let errors = Arc::new(Mutex::new(Vec::new()));
    {
        let errors = errors.clone();
        ep.on_error(move |err| errors.lock().unwrap().push(err.clone()));
    }

    ep.post(json!("a")).await.unwrap();
    let sink = Arc::new(Mutex::new(Vec::new()));
    let _ = ep
        .set_send(Some(failing_on(1, "down", sink)))
        .await
        .unwrap_err();

    let errors = errors.lock().unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].code(), Some(codes::SEND_FAILED));
}

#[tokio::test]
async fn ready_handshake_gates_the_outbound_queue() {
    let ep = Endpoint::new();
    let sink = Arc::new(Mutex::new(Vec::new()));
    ep.set_send(Some({
        let sink = sink.clone();
        send_fn(move |env| {
            let sink = sink.clone();
            async move {
                sink.lock().unwrap().push(env);
                Ok(())
            }
        })
    }))
    .await
    .unwrap();

    ep.queue_outgoing_until_ready();
    ep.post(json!("hello")).await.unwrap();

    // Nothing is emitted until the peer signals readiness.
    assert!(sink.lock().unwrap().is_empty());

    ep.receive(Envelope::Ready).await;

    let sent = sink.lock().unwrap();
    assert_eq!(
        *sent,
        vec![Envelope::Custom {
            data: Some(json!("hello")),
            fwd_dest: None
        }]
    );
}

#[tokio::test]
async fn ready_handshake_between_two_real_endpoints() {
    let (a, b) = endpoint_pair(64).await.unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    {
        let seen = seen.clone();
        b.on_message(move |data| seen.lock().unwrap().push(data.clone()));
    }

    a.queue_outgoing_until_ready();
    a.post(json!("early")).await.unwrap();

    // Give the channel a moment: nothing may arrive before Ready.
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(seen.lock().unwrap().is_empty());

    b.send_ready().await.unwrap();
    wait_until(|| !seen.lock().unwrap().is_empty()).await;
    assert_eq!(*seen.lock().unwrap(), vec![json!("early")]);
}

#[tokio::test]
async fn posts_are_observed_in_order() {
    let (a, b) = endpoint_pair(64).await.unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    {
        let seen = seen.clone();
        b.on_message(move |data| seen.lock().unwrap().push(data.clone()));
    }

    for i in 0..10 {
        a.post(json!(i)).await.unwrap();
    }
    wait_until(|| seen.lock().unwrap().len() == 10).await;
    let seen = seen.lock().unwrap();
    let expected: Vec<Value> = (0..10).map(|i| json!(i)).collect();
    assert_eq!(*seen, expected);
}

#[tokio::test]
async fn suspended_inbound_dispatch_lets_registration_catch_up() {
    let (a, b) = endpoint_pair(64).await.unwrap();

    // B suspends dispatch before A's call arrives, registers the
    // implementation late, then resumes.
    b.queue_incoming();

    let call = {
        let a = a.clone();
        tokio::spawn(async move { a.call_remote("late", vec![]).await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;

    b.register_func("late", |_| async { Ok(json!("made it")) }).unwrap();
    b.process_incoming().await;

    assert_eq!(call.await.unwrap().unwrap(), json!("made it"));
}
