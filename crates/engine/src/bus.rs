//! Event Bus
//!
//! In-process typed publish/subscribe decoupling the pipeline stages.
//! Synchronous handlers run first, in registration order; asynchronous
//! handlers run concurrently. `publish` resolves only after every handler
//! for the event has finished, so sequential publishes from one producer
//! keep their order end to end. A panic in one handler is caught, logged,
//! and never aborts its peers.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use parking_lot::RwLock;

use voxline_core::Event;

type ErasedSyncHandler = Arc<dyn Fn(&dyn Event) + Send + Sync>;
type ErasedAsyncHandler =
    Arc<dyn Fn(Arc<dyn Any + Send + Sync>) -> BoxFuture<'static, ()> + Send + Sync>;

/// Token returned by `subscribe`; required to unsubscribe.
///
/// Rust closures have no identity, so removal goes through this token
/// instead of handler equality.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionId {
    type_id: TypeId,
    id: u64,
}

/// Typed in-process event bus.
pub struct EventBus {
    sync_handlers: RwLock<HashMap<TypeId, Vec<(u64, ErasedSyncHandler)>>>,
    async_handlers: RwLock<HashMap<TypeId, Vec<(u64, ErasedAsyncHandler)>>>,
    next_id: AtomicU64,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            sync_handlers: RwLock::new(HashMap::new()),
            async_handlers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a synchronous handler for events of type `E`.
    ///
    /// Duplicate registrations are not deduplicated; that is the caller's
    /// responsibility.
    pub fn subscribe<E, F>(&self, handler: F) -> SubscriptionId
    where
        E: Event,
        F: Fn(&E) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let type_id = TypeId::of::<E>();
        let wrapped: ErasedSyncHandler = Arc::new(move |event: &dyn Event| {
            if let Some(event) = event.as_any().downcast_ref::<E>() {
                handler(event);
            }
        });
        self.sync_handlers
            .write()
            .entry(type_id)
            .or_default()
            .push((id, wrapped));
        SubscriptionId { type_id, id }
    }

    /// Register an asynchronous handler for events of type `E`.
    pub fn subscribe_async<E, F, Fut>(&self, handler: F) -> SubscriptionId
    where
        E: Event,
        F: Fn(Arc<E>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let type_id = TypeId::of::<E>();
        let wrapped: ErasedAsyncHandler = Arc::new(move |event: Arc<dyn Any + Send + Sync>| {
            match event.downcast::<E>() {
                Ok(event) => handler(event).boxed(),
                Err(_) => futures::future::ready(()).boxed(),
            }
        });
        self.async_handlers
            .write()
            .entry(type_id)
            .or_default()
            .push((id, wrapped));
        SubscriptionId { type_id, id }
    }

    /// Remove a subscription.
    pub fn unsubscribe(&self, subscription: SubscriptionId) {
        if let Some(handlers) = self.sync_handlers.write().get_mut(&subscription.type_id) {
            handlers.retain(|(id, _)| *id != subscription.id);
        }
        if let Some(handlers) = self.async_handlers.write().get_mut(&subscription.type_id) {
            handlers.retain(|(id, _)| *id != subscription.id);
        }
    }

    /// Dispatch an event to every handler registered for its type.
    ///
    /// Completes after all handlers have finished. Handler panics are caught
    /// and logged; they never propagate to the publisher or to peers.
    pub async fn publish<E: Event>(&self, event: E) {
        let type_id = TypeId::of::<E>();
        let event = Arc::new(event);

        tracing::trace!(event = std::any::type_name::<E>(), "publishing event");

        let sync: Vec<ErasedSyncHandler> = self
            .sync_handlers
            .read()
            .get(&type_id)
            .map(|v| v.iter().map(|(_, h)| h.clone()).collect())
            .unwrap_or_default();

        for handler in sync {
            let result = std::panic::catch_unwind(AssertUnwindSafe(|| {
                handler(event.as_ref() as &dyn Event)
            }));
            if result.is_err() {
                tracing::error!(
                    event = std::any::type_name::<E>(),
                    "synchronous event handler panicked"
                );
            }
        }

        let async_list: Vec<ErasedAsyncHandler> = self
            .async_handlers
            .read()
            .get(&type_id)
            .map(|v| v.iter().map(|(_, h)| h.clone()).collect())
            .unwrap_or_default();

        if async_list.is_empty() {
            return;
        }

        let futures: Vec<_> = async_list
            .into_iter()
            .map(|handler| {
                let any: Arc<dyn Any + Send + Sync> = event.clone();
                AssertUnwindSafe(handler(any)).catch_unwind()
            })
            .collect();

        for result in join_all(futures).await {
            if result.is_err() {
                tracing::error!(
                    event = std::any::type_name::<E>(),
                    "asynchronous event handler panicked"
                );
            }
        }
    }

    /// Drop every subscription. Used at process shutdown.
    pub fn clear(&self) {
        self.sync_handlers.write().clear();
        self.async_handlers.write().clear();
    }
}
