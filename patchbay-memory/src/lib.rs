#![deny(unsafe_code)]

//! In-memory channel between two patchbay endpoints.
//!
//! This crate wires a pair of [`Endpoint`]s back to back over in-process
//! channels. It is useful for tests, benchmarks, and embedding scenarios
//! where no OS transport is needed: each endpoint's send function pushes
//! into an mpsc channel, and one pump task per direction feeds the peer's
//! receive entry, so receive is never invoked from two tasks at once.
//!
//! ```ignore
//! use patchbay_memory::endpoint_pair;
//! use serde_json::json;
//!
//! let (a, b) = endpoint_pair(64).await?;
//! b.register_func("add", |args| async move { /* ... */ }).unwrap();
//! let nine = a.call_remote("add", vec![json!(4), json!(5)]).await?;
//! ```

use std::io;

use patchbay::{send_fn, Endpoint, RpcError};
use patchbay_wire::Envelope;
use tokio::sync::mpsc;

/// Connect two existing endpoints over in-process channels.
///
/// `buffer` is the channel capacity for each direction. Installs a send
/// function on both endpoints (draining anything they queued) and spawns
/// one pump task per direction. The pumps end when the opposite endpoint's
/// send function is dropped.
pub async fn link(a: &Endpoint, b: &Endpoint, buffer: usize) -> Result<(), RpcError> {
    let (a_to_b_tx, mut a_to_b_rx) = mpsc::channel::<Envelope>(buffer);
    let (b_to_a_tx, mut b_to_a_rx) = mpsc::channel::<Envelope>(buffer);

    {
        let b = b.clone();
        tokio::spawn(async move {
            while let Some(env) = a_to_b_rx.recv().await {
                b.receive(env).await;
            }
        });
    }
    {
        let a = a.clone();
        tokio::spawn(async move {
            while let Some(env) = b_to_a_rx.recv().await {
                a.receive(env).await;
            }
        });
    }

    a.set_send(Some(send_fn(move |env| {
        let tx = a_to_b_tx.clone();
        async move { tx.send(env).await.map_err(|_| disconnected()) }
    })))
    .await?;
    b.set_send(Some(send_fn(move |env| {
        let tx = b_to_a_tx.clone();
        async move { tx.send(env).await.map_err(|_| disconnected()) }
    })))
    .await?;

    Ok(())
}

/// Create a connected pair of endpoints with default configuration.
pub async fn endpoint_pair(buffer: usize) -> Result<(Endpoint, Endpoint), RpcError> {
    let a = Endpoint::new();
    let b = Endpoint::new();
    link(&a, &b, buffer).await?;
    Ok((a, b))
}

fn disconnected() -> patchbay::DynError {
    io::Error::new(io::ErrorKind::BrokenPipe, "peer disconnected").into()
}
