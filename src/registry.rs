/*
 *  Copyright 2025-2026 Colliery Software
 *
 *  Licensed under the Apache License, Version 2.0 (the "License");
 *  you may not use this file except in compliance with the License.
 *  You may obtain a copy of the License at
 *
 *      http://www.apache.org/licenses/LICENSE-2.0
 *
 *  Unless required by applicable law or agreed to in writing, software
 *  distributed under the License is distributed on an "AS IS" BASIS,
 *  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *  See the License for the specific language governing permissions and
 *  limitations under the License.
 */

//! Handler Registry
//!
//! Maps an event type string to its handler. Handlers see only the payload:
//! they never touch the event row's status columns, and a handler needing
//! database access opens its own connection because the worker's connection
//! is engine-owned.
//!
//! The registry is built before workers start and read-only afterwards, so
//! concurrent lookup needs no locking. There is no process-global registry:
//! the registry is passed to each worker's constructor, which also lets tests
//! substitute their own handlers.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use crate::error::HandlerError;

/// A handler for one event type.
///
/// Returning `Ok` marks the row `done`; returning `Err` sends it down the
/// retry/dead path. Handlers run concurrently within a batch and must not
/// rely on start or finish order.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, payload: &JsonValue) -> Result<(), HandlerError>;
}

type BoxedHandlerFuture = Pin<Box<dyn Future<Output = Result<(), HandlerError>> + Send>>;
type BoxedHandlerFn = Box<dyn Fn(JsonValue) -> BoxedHandlerFuture + Send + Sync>;

struct FnHandler {
    f: BoxedHandlerFn,
}

#[async_trait]
impl EventHandler for FnHandler {
    async fn handle(&self, payload: &JsonValue) -> Result<(), HandlerError> {
        (self.f)(payload.clone()).await
    }
}

/// Mapping from event type to handler.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn EventHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler for an event type, replacing any previous one.
    pub fn register(&mut self, event_type: impl Into<String>, handler: Arc<dyn EventHandler>) {
        self.handlers.insert(event_type.into(), handler);
    }

    /// Registers an async function or closure as a handler.
    pub fn register_fn<F, Fut>(&mut self, event_type: impl Into<String>, f: F)
    where
        F: Fn(JsonValue) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        let boxed: BoxedHandlerFn = Box::new(move |payload| Box::pin(f(payload)));
        self.register(event_type, Arc::new(FnHandler { f: boxed }));
    }

    /// Looks up the handler for an event type.
    pub fn resolve(&self, event_type: &str) -> Option<Arc<dyn EventHandler>> {
        self.handlers.get(event_type).cloned()
    }

    /// Event types with a registered handler.
    pub fn event_types(&self) -> Vec<&str> {
        self.handlers.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn registered_handler_receives_payload() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();

        let mut registry = HandlerRegistry::new();
        registry.register_fn("order.created", move |payload: JsonValue| {
            let seen = seen.clone();
            async move {
                assert_eq!(payload["orderId"], "1001");
                seen.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

        let handler = registry.resolve("order.created").unwrap();
        handler
            .handle(&json!({"orderId": "1001"}))
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn handler_errors_are_surfaced() {
        let mut registry = HandlerRegistry::new();
        registry.register_fn("order.created", |_payload: JsonValue| async {
            Err(HandlerError::Execution(anyhow!("smtp unavailable")))
        });

        let handler = registry.resolve("order.created").unwrap();
        let err = handler.handle(&json!({})).await.unwrap_err();
        assert!(err.to_string().contains("smtp unavailable"));
    }

    #[test]
    fn unknown_event_type_resolves_to_none() {
        let registry = HandlerRegistry::new();
        assert!(registry.resolve("order.created").is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn re_registering_replaces_the_handler() {
        let mut registry = HandlerRegistry::new();
        registry.register_fn("a", |_| async { Ok(()) });
        registry.register_fn("a", |_| async { Ok(()) });
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn event_types_lists_registered_keys() {
        let mut registry = HandlerRegistry::new();
        registry.register_fn("a", |_| async { Ok(()) });
        registry.register_fn("b", |_| async { Ok(()) });
        let mut types = registry.event_types();
        types.sort_unstable();
        assert_eq!(types, vec!["a", "b"]);
    }
}
