//! Event surface: `"message"` and `"error"` observations for user code.

use std::sync::Arc;

use serde_json::Value;

use crate::RpcError;

pub(crate) type MessageListener = Arc<dyn Fn(&Value) + Send + Sync>;
pub(crate) type ErrorListener = Arc<dyn Fn(&RpcError) + Send + Sync>;

/// Registered listeners. Lives behind the endpoint's listener lock;
/// emission clones the listener list so user callbacks run without any
/// endpoint lock held.
#[derive(Default)]
pub(crate) struct Listeners {
    message: Vec<MessageListener>,
    error: Vec<ErrorListener>,
}

impl Listeners {
    pub(crate) fn add_message(&mut self, listener: MessageListener) {
        self.message.push(listener);
    }

    pub(crate) fn add_error(&mut self, listener: ErrorListener) {
        self.error.push(listener);
    }

    pub(crate) fn message_listeners(&self) -> Vec<MessageListener> {
        self.message.clone()
    }

    pub(crate) fn error_listeners(&self) -> Vec<ErrorListener> {
        self.error.clone()
    }
}
