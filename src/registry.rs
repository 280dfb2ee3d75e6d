//! Process-wide table of running proxy instances.
//!
//! [`ProxyRegistry::get_or_create`] hands every caller asking for the same
//! [`InstanceKey`] the same [`ProxyInstance`]. The first caller for a key
//! inserts a shared creation future into the table before any binding
//! happens; concurrent callers await that same future instead of starting
//! their own. Failed or cancelled creations remove their slot, and a
//! stopped instance removes its slot through the release callback, so a
//! later call for the key starts over.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use tokio_util::sync::CancellationToken;

use crate::error::ProxyError;
use crate::instance::{OnStop, ProxyInstance};
use crate::settings::{InstanceKey, ProxySettings};

pub type CreateResult = Result<Arc<ProxyInstance>, Arc<ProxyError>>;

type Creation = Shared<BoxFuture<'static, CreateResult>>;

struct Slot {
    generation: u64,
    creation: Creation,
}

#[derive(Default)]
struct Slots {
    map: DashMap<InstanceKey, Slot>,
    next_generation: AtomicU64,
}

impl Slots {
    /// Remove `key` only if it still holds the slot from `generation`.
    fn release(&self, key: &InstanceKey, generation: u64) {
        self.map.remove_if(key, |_, slot| slot.generation == generation);
    }
}

/// Cloning yields another handle onto the same table.
#[derive(Clone, Default)]
pub struct ProxyRegistry {
    slots: Arc<Slots>,
}

impl ProxyRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the instance for `settings.key()`, creating it if needed.
    ///
    /// Cancelling `cancel` abandons this caller's wait. If this caller is
    /// the one that started creation, the pending bind is aborted as well
    /// and every waiter for the key receives [`ProxyError::Cancelled`].
    /// A creation that has already finished is returned even when `cancel`
    /// is cancelled.
    pub async fn get_or_create(
        &self,
        settings: ProxySettings,
        cancel: &CancellationToken,
    ) -> CreateResult {
        let key = settings.key();

        let creation = self
            .slots
            .map
            .entry(key.clone())
            .or_insert_with(|| {
                let generation = self.slots.next_generation.fetch_add(1, Ordering::Relaxed);
                Slot {
                    generation,
                    creation: self.spawn_creation(key.clone(), generation, settings, cancel.clone()),
                }
            })
            .creation
            .clone();

        tokio::select! {
            biased;
            result = creation => result,
            () = cancel.cancelled() => Err(Arc::new(ProxyError::Cancelled)),
        }
    }

    fn spawn_creation(
        &self,
        key: InstanceKey,
        generation: u64,
        settings: ProxySettings,
        cancel: CancellationToken,
    ) -> Creation {
        let slots: Weak<Slots> = Arc::downgrade(&self.slots);

        // Spawned so creation runs to completion even if every waiter leaves.
        let task = tokio::spawn(async move {
            let release: OnStop = {
                let slots = slots.clone();
                let key = key.clone();
                Box::new(move || {
                    if let Some(slots) = slots.upgrade() {
                        slots.release(&key, generation);
                    }
                })
            };

            match ProxyInstance::start(settings, &cancel, Some(release)).await {
                Ok(instance) => Ok(Arc::new(instance)),
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "proxy creation failed");
                    if let Some(slots) = slots.upgrade() {
                        slots.release(&key, generation);
                    }
                    Err(Arc::new(e))
                }
            }
        });

        async move {
            match task.await {
                Ok(result) => result,
                Err(e) => Err(Arc::new(ProxyError::CreationAborted(e.to_string()))),
            }
        }
        .boxed()
        .shared()
    }

    /// The running instance for `key`, if creation has already finished.
    #[must_use]
    pub fn get(&self, key: &InstanceKey) -> Option<Arc<ProxyInstance>> {
        self.slots
            .map
            .get(key)
            .and_then(|slot| slot.creation.peek().and_then(|r| r.as_ref().ok().cloned()))
    }

    /// Number of keys with a running or pending instance.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.map.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.map.is_empty()
    }

    /// Stop every running instance. Pending creations are left alone.
    pub async fn stop_all(&self) {
        let running: Vec<Arc<ProxyInstance>> = self
            .slots
            .map
            .iter()
            .filter_map(|slot| slot.creation.peek().and_then(|r| r.as_ref().ok().cloned()))
            .collect();

        for instance in running {
            instance.stop().await;
        }
    }
}

impl std::fmt::Debug for ProxyRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyRegistry")
            .field("instances", &self.len())
            .finish()
    }
}
