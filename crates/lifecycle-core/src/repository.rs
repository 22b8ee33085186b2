//! Active entity repository
//!
//! Owns the set of live entities of one kind (calls, file transfers), keyed
//! by id. The repository subscribes to each entity's own state changes and
//! drops the entity as soon as it reaches a terminal state, then tells its
//! own listeners which entity ended.
//!
//! Collection mutation happens under one coarse lock. Listener delivery
//! always happens after that lock is released, so listeners may call back
//! into the repository.

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::call::{Call, CallId};
use crate::errors::{LifecycleError, Result};
use crate::events::{EventBroadcaster, ListenerRef};
use crate::file_transfer::{FileTransfer, TransferId};
use crate::state::{EntityState, Lifecycle, StateChange};

/// An entity whose lifecycle a repository can follow
pub trait TrackedEntity: Send + Sync + 'static {
    type State: EntityState;

    /// The entity's lifecycle component
    fn lifecycle(&self) -> &Lifecycle<Self::State>;
}

/// Repository-level lifecycle notification
pub enum RepositoryEvent<K, V: TrackedEntity> {
    /// The entity is now tracked
    Added { key: K, entity: Arc<V> },
    /// A tracked entity moved to a non-terminal state
    StateChanged {
        key: K,
        entity: Arc<V>,
        change: StateChange<V::State>,
    },
    /// The entity reached a terminal state and is no longer tracked
    Ended {
        key: K,
        entity: Arc<V>,
        change: StateChange<V::State>,
    },
}

impl<K, V: TrackedEntity> RepositoryEvent<K, V> {
    pub fn key(&self) -> &K {
        match self {
            RepositoryEvent::Added { key, .. }
            | RepositoryEvent::StateChanged { key, .. }
            | RepositoryEvent::Ended { key, .. } => key,
        }
    }

    pub fn entity(&self) -> &Arc<V> {
        match self {
            RepositoryEvent::Added { entity, .. }
            | RepositoryEvent::StateChanged { entity, .. }
            | RepositoryEvent::Ended { entity, .. } => entity,
        }
    }

    pub fn is_ended(&self) -> bool {
        matches!(self, RepositoryEvent::Ended { .. })
    }
}

impl<K: Clone, V: TrackedEntity> Clone for RepositoryEvent<K, V> {
    fn clone(&self) -> Self {
        match self {
            RepositoryEvent::Added { key, entity } => RepositoryEvent::Added {
                key: key.clone(),
                entity: Arc::clone(entity),
            },
            RepositoryEvent::StateChanged { key, entity, change } => RepositoryEvent::StateChanged {
                key: key.clone(),
                entity: Arc::clone(entity),
                change: change.clone(),
            },
            RepositoryEvent::Ended { key, entity, change } => RepositoryEvent::Ended {
                key: key.clone(),
                entity: Arc::clone(entity),
                change: change.clone(),
            },
        }
    }
}

impl<K: fmt::Debug, V: TrackedEntity> fmt::Debug for RepositoryEvent<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RepositoryEvent::Added { key, entity } => f
                .debug_struct("Added")
                .field("key", key)
                .field("state", &entity.lifecycle().state())
                .finish(),
            RepositoryEvent::StateChanged { key, change, .. } => f
                .debug_struct("StateChanged")
                .field("key", key)
                .field("change", change)
                .finish(),
            RepositoryEvent::Ended { key, change, .. } => f
                .debug_struct("Ended")
                .field("key", key)
                .field("change", change)
                .finish(),
        }
    }
}

/// Counters kept by a repository
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RepositoryStats {
    /// Entities currently tracked
    pub active: usize,
    /// Entities ever added
    pub total_added: u64,
    /// Entities removed after reaching a terminal state
    pub total_ended: u64,
}

struct Tracked<V: TrackedEntity> {
    entity: Arc<V>,
    watcher: ListenerRef<StateChange<V::State>>,
}

struct Registry<K, V: TrackedEntity> {
    entities: HashMap<K, Tracked<V>>,
    total_added: u64,
    total_ended: u64,
}

struct RepositoryInner<K, V: TrackedEntity> {
    name: &'static str,
    registry: Mutex<Registry<K, V>>,
    listeners: EventBroadcaster<RepositoryEvent<K, V>>,
}

/// Keyed, concurrent collection of live entities
pub struct ActiveEntityRepository<K, V: TrackedEntity> {
    inner: Arc<RepositoryInner<K, V>>,
}

/// Repository of active calls
pub type ActiveCallsRepository = ActiveEntityRepository<CallId, Call>;

/// Repository of active file transfers
pub type ActiveFileTransfers = ActiveEntityRepository<TransferId, FileTransfer>;

impl<K, V> ActiveEntityRepository<K, V>
where
    K: Clone + Eq + Hash + fmt::Debug + Send + Sync + 'static,
    V: TrackedEntity,
{
    /// Create an empty repository; `name` only appears in log output
    pub fn new(name: &'static str) -> Self {
        Self {
            inner: Arc::new(RepositoryInner {
                name,
                registry: Mutex::new(Registry {
                    entities: HashMap::new(),
                    total_added: 0,
                    total_ended: 0,
                }),
                listeners: EventBroadcaster::new(name),
            }),
        }
    }

    /// Start tracking `entity` under `key`
    ///
    /// Fails if the key is already tracked or the entity has already
    /// reached a terminal state. On success an `Added` event is published
    /// once the entity's delivery lock is released, so a transition racing
    /// with `add` may be reported before it.
    pub fn add(&self, key: K, entity: Arc<V>) -> Result<()> {
        let lifecycle = entity.lifecycle();

        // No transition of this entity can be published while we register,
        // so the terminal check and the subscription cannot race.
        let added = lifecycle.exclusive(|state| {
            if state.is_terminal() {
                return Err(LifecycleError::already_terminated(&key, state));
            }

            let watcher = self.watcher(key.clone(), &entity);
            {
                let mut registry = self.inner.registry.lock();
                if registry.entities.contains_key(&key) {
                    return Err(LifecycleError::duplicate(&key));
                }
                registry.entities.insert(
                    key.clone(),
                    Tracked {
                        entity: Arc::clone(&entity),
                        watcher: Arc::clone(&watcher),
                    },
                );
                registry.total_added += 1;
            }
            lifecycle.subscribe(watcher);

            debug!(repository = self.inner.name, key = ?key, state = %state, "Entity added");
            Ok(RepositoryEvent::Added {
                key,
                entity: Arc::clone(&entity),
            })
        })?;

        self.inner.listeners.broadcast(&added);
        Ok(())
    }

    fn watcher(&self, key: K, entity: &Arc<V>) -> ListenerRef<StateChange<V::State>> {
        let repository = Arc::downgrade(&self.inner);
        let entity = Arc::downgrade(entity);
        Arc::new(move |change: &StateChange<V::State>| {
            let (Some(repository), Some(entity)) = (repository.upgrade(), entity.upgrade()) else {
                return;
            };
            repository.on_state_change(&key, entity, change);
        })
    }

    /// Number of tracked entities
    pub fn count(&self) -> usize {
        self.inner.registry.lock().entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    /// Whether `key` is tracked
    pub fn contains(&self, key: &K) -> bool {
        self.inner.registry.lock().entities.contains_key(key)
    }

    /// The entity tracked under `key`
    pub fn get(&self, key: &K) -> Option<Arc<V>> {
        self.inner
            .registry
            .lock()
            .entities
            .get(key)
            .map(|tracked| Arc::clone(&tracked.entity))
    }

    /// Keys of every tracked entity
    pub fn keys(&self) -> Vec<K> {
        self.inner.registry.lock().entities.keys().cloned().collect()
    }

    /// Point-in-time copy of the tracked entities
    ///
    /// Changes to the returned map do not affect the repository.
    pub fn snapshot(&self) -> HashMap<K, Arc<V>> {
        self.inner
            .registry
            .lock()
            .entities
            .iter()
            .map(|(key, tracked)| (key.clone(), Arc::clone(&tracked.entity)))
            .collect()
    }

    pub fn stats(&self) -> RepositoryStats {
        let registry = self.inner.registry.lock();
        RepositoryStats {
            active: registry.entities.len(),
            total_added: registry.total_added,
            total_ended: registry.total_ended,
        }
    }

    /// Register a repository listener
    pub fn subscribe(&self, listener: ListenerRef<RepositoryEvent<K, V>>) -> bool {
        self.inner.listeners.subscribe(listener)
    }

    /// Remove a repository listener
    pub fn unsubscribe(&self, listener: &ListenerRef<RepositoryEvent<K, V>>) -> bool {
        self.inner.listeners.unsubscribe(listener)
    }

    /// Broadcaster carrying repository events
    pub fn listeners(&self) -> &EventBroadcaster<RepositoryEvent<K, V>> {
        &self.inner.listeners
    }
}

impl<K, V> RepositoryInner<K, V>
where
    K: Clone + Eq + Hash + fmt::Debug + Send + Sync + 'static,
    V: TrackedEntity,
{
    fn is_tracking(registry: &Registry<K, V>, key: &K, entity: &Arc<V>) -> bool {
        registry
            .entities
            .get(key)
            .is_some_and(|tracked| Arc::ptr_eq(&tracked.entity, entity))
    }

    fn on_state_change(&self, key: &K, entity: Arc<V>, change: &StateChange<V::State>) {
        if !change.is_terminal() {
            if !Self::is_tracking(&self.registry.lock(), key, &entity) {
                return;
            }
            self.listeners.broadcast(&RepositoryEvent::StateChanged {
                key: key.clone(),
                entity,
                change: change.clone(),
            });
            return;
        }

        let removed = {
            let mut registry = self.registry.lock();
            if !Self::is_tracking(&registry, key, &entity) {
                return;
            }
            registry.total_ended += 1;
            registry.entities.remove(key)
        };
        let Some(tracked) = removed else {
            return;
        };

        tracked.entity.lifecycle().unsubscribe(&tracked.watcher);
        debug!(repository = self.name, key = ?key, state = %change.new_state, "Entity ended");

        self.listeners.broadcast(&RepositoryEvent::Ended {
            key: key.clone(),
            entity,
            change: change.clone(),
        });
    }
}

impl<K, V: TrackedEntity> Drop for RepositoryInner<K, V> {
    fn drop(&mut self) {
        for tracked in self.registry.get_mut().entities.values() {
            tracked.entity.lifecycle().unsubscribe(&tracked.watcher);
        }
    }
}

impl<K, V: TrackedEntity> Clone for ActiveEntityRepository<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, V: TrackedEntity> fmt::Debug for ActiveEntityRepository<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActiveEntityRepository")
            .field("name", &self.inner.name)
            .field("active", &self.inner.registry.lock().entities.len())
            .finish()
    }
}
