//! Hook Bus
//!
//! Fan-out notification channel around command execution. The core
//! emits `command:before`, `command:after`, `command:error`, and
//! `directory:change` with structured JSON payloads; external handlers
//! (plugins, prompt integrations) subscribe through [`HookBus::on`].
//! A failing or panicking handler is logged and isolated: it can
//! never break the command pipeline.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use serde_json::Value;

pub const COMMAND_BEFORE: &str = "command:before";
pub const COMMAND_AFTER: &str = "command:after";
pub const COMMAND_ERROR: &str = "command:error";
pub const DIRECTORY_CHANGE: &str = "directory:change";

/// Subscription token returned by [`HookBus::on`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HookId(u64);

type Handler = Box<dyn Fn(&Value) -> Result<(), String> + Send + Sync>;

/// Keyed handler registry.
#[derive(Default)]
pub struct HookBus {
    handlers: Mutex<HashMap<String, Vec<(HookId, Handler)>>>,
    next_id: AtomicU64,
}

impl HookBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for an event; returns a token for [`off`].
    ///
    /// [`off`]: HookBus::off
    pub fn on(
        &self,
        event: &str,
        handler: impl Fn(&Value) -> Result<(), String> + Send + Sync + 'static,
    ) -> HookId {
        let id = HookId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        self.handlers
            .lock()
            .unwrap()
            .entry(event.to_string())
            .or_default()
            .push((id, Box::new(handler)));
        id
    }

    /// Remove a previously registered handler.
    pub fn off(&self, id: HookId) -> bool {
        let mut handlers = self.handlers.lock().unwrap();
        let mut removed = false;
        for list in handlers.values_mut() {
            let before = list.len();
            list.retain(|(existing, _)| *existing != id);
            removed |= list.len() != before;
        }
        removed
    }

    /// Deliver an event to every handler registered for it.
    pub fn emit(&self, event: &str, payload: &Value) {
        let handlers = self.handlers.lock().unwrap();
        let Some(list) = handlers.get(event) else { return };
        for (id, handler) in list {
            let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| handler(payload)));
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(message)) => {
                    log::warn!("hook handler {:?} for {} failed: {}", id, event, message);
                }
                Err(_) => {
                    log::warn!("hook handler {:?} for {} panicked", id, event);
                }
            }
        }
    }

    pub fn handler_count(&self, event: &str) -> usize {
        self.handlers
            .lock()
            .unwrap()
            .get(event)
            .map(Vec::len)
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    #[test]
    fn test_emit_reaches_handlers() {
        let bus = HookBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let seen = count.clone();
        bus.on(COMMAND_BEFORE, move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        bus.emit(COMMAND_BEFORE, &serde_json::json!({"command": "ls"}));
        bus.emit(COMMAND_AFTER, &serde_json::json!({}));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_off_unsubscribes() {
        let bus = HookBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let seen = count.clone();
        let id = bus.on(COMMAND_AFTER, move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        assert!(bus.off(id));
        assert!(!bus.off(id));
        bus.emit(COMMAND_AFTER, &serde_json::json!({}));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_handler_error_does_not_stop_others() {
        let bus = HookBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        bus.on(COMMAND_ERROR, |_| Err("handler failed".into()));
        let seen = count.clone();
        bus.on(COMMAND_ERROR, move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        bus.emit(COMMAND_ERROR, &serde_json::json!({}));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_handler_panic_is_isolated() {
        let bus = HookBus::new();
        bus.on(DIRECTORY_CHANGE, |_| panic!("handler bug"));
        bus.emit(DIRECTORY_CHANGE, &serde_json::json!({"cwd": "/tmp"}));
    }

    #[test]
    fn test_payload_contents() {
        let bus = HookBus::new();
        let seen = Arc::new(Mutex::new(None));
        let sink = seen.clone();
        bus.on(COMMAND_BEFORE, move |payload| {
            *sink.lock().unwrap() = Some(payload.clone());
            Ok(())
        });
        bus.emit(COMMAND_BEFORE, &serde_json::json!({"command": "pwd"}));
        let payload = seen.lock().unwrap().clone().unwrap();
        assert_eq!(payload["command"], "pwd");
    }
}
