//! Consumer callbacks and consumer liveness.
//!
//! # Design
//! A callback may outlive the consumer that created it (a screen that was
//! closed, a session that ended). Instead of weak pointers, consumers get a
//! `ConsumerId` from a `ConsumerRegistry` and bind their callbacks to it.
//! Releasing the id makes every bound callback report itself dead, and the
//! engine skips it on the delivery thread.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use crate::result::ApiResult;

/// Receives the result of one task, on the delivery thread.
pub trait Callback<T>: Send {
    /// `false` once the consumer behind this callback is gone.
    fn is_alive(&self) -> bool {
        true
    }

    fn on_result(self: Box<Self>, result: ApiResult<T>);
}

impl<T, F> Callback<T> for F
where
    F: FnOnce(ApiResult<T>) + Send,
{
    fn on_result(self: Box<Self>, result: ApiResult<T>) {
        (*self)(result)
    }
}

/// Handle identifying one registered consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConsumerId(u64);

/// Tracks which consumers are still interested in results.
#[derive(Debug, Clone, Default)]
pub struct ConsumerRegistry {
    inner: Arc<RegistryInner>,
}

#[derive(Debug, Default)]
struct RegistryInner {
    next_id: AtomicU64,
    live: RwLock<HashSet<ConsumerId>>,
}

impl ConsumerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self) -> ConsumerId {
        let id = ConsumerId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        self.live_mut(|live| {
            live.insert(id);
        });
        id
    }

    /// Mark the consumer gone. Bound callbacks stop firing.
    pub fn release(&self, id: ConsumerId) {
        self.live_mut(|live| {
            live.remove(&id);
        });
    }

    pub fn is_alive(&self, id: ConsumerId) -> bool {
        match self.inner.live.read() {
            Ok(live) => live.contains(&id),
            Err(poisoned) => poisoned.into_inner().contains(&id),
        }
    }

    /// Wrap `callback` so it only fires while `id` is registered.
    pub fn bind<C>(&self, id: ConsumerId, callback: C) -> Bound<C> {
        Bound {
            registry: self.clone(),
            id,
            callback,
        }
    }

    fn live_mut(&self, f: impl FnOnce(&mut HashSet<ConsumerId>)) {
        match self.inner.live.write() {
            Ok(mut live) => f(&mut live),
            Err(poisoned) => f(&mut poisoned.into_inner()),
        }
    }
}

/// A callback tied to a registered consumer.
pub struct Bound<C> {
    registry: ConsumerRegistry,
    id: ConsumerId,
    callback: C,
}

impl<T, C> Callback<T> for Bound<C>
where
    C: Callback<T>,
{
    fn is_alive(&self) -> bool {
        self.registry.is_alive(self.id) && self.callback.is_alive()
    }

    fn on_result(self: Box<Self>, result: ApiResult<T>) {
        Box::new(self.callback).on_result(result)
    }
}
