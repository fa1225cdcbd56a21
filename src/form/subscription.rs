use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Debug;
use std::sync::Arc;

use super::config::IsEqual;

/// Identity of a form subscriber or field registration. Allocated from one
/// counter per form, so ordering by id is registration order.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct SubscriberId(pub u64);

/// A key of some observable snapshot.
pub trait StateKey: Copy + Ord + Debug + Send + Sync + 'static {
    const ALL: &'static [Self];
}

/// Snapshot type whose keys can be compared one at a time.
pub trait KeyedSnapshot: Send + Sync + 'static {
    type Key: StateKey;

    fn key_changed(&self, next: &Self, key: Self::Key, is_equal: Option<&IsEqual>) -> bool;
}

/// The set of keys an observer wants to hear about.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Subscription<K: StateKey> {
    keys: BTreeSet<K>,
}

impl<K: StateKey> Subscription<K> {
    pub fn all() -> Self {
        Self {
            keys: K::ALL.iter().copied().collect(),
        }
    }

    pub fn none() -> Self {
        Self {
            keys: BTreeSet::new(),
        }
    }

    pub fn only(keys: impl IntoIterator<Item = K>) -> Self {
        Self {
            keys: keys.into_iter().collect(),
        }
    }

    pub fn with(mut self, key: K) -> Self {
        self.keys.insert(key);
        self
    }

    pub fn contains(&self, key: K) -> bool {
        self.keys.contains(&key)
    }

    pub fn keys(&self) -> impl Iterator<Item = K> + '_ {
        self.keys.iter().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl<K: StateKey> Default for Subscription<K> {
    fn default() -> Self {
        Self::all()
    }
}

pub type Listener<S> = Arc<dyn Fn(&S) + Send + Sync>;

struct SubscriberEntry<S: KeyedSnapshot> {
    subscription: Subscription<S::Key>,
    listener: Listener<S>,
    is_equal: Option<IsEqual>,
    last_seen: Option<Arc<S>>,
}

/// One planned callback invocation, executed after the state lock is released.
pub(super) struct Delivery<S> {
    pub(super) id: SubscriberId,
    pub(super) listener: Listener<S>,
    pub(super) snapshot: Arc<S>,
}

impl<S> Delivery<S> {
    pub(super) fn deliver(&self) {
        (self.listener)(&self.snapshot);
    }
}

/// Subscriber id to (mask, callback, last snapshot handed to it).
pub(super) struct SubscriberTable<S: KeyedSnapshot> {
    entries: BTreeMap<SubscriberId, SubscriberEntry<S>>,
}

impl<S: KeyedSnapshot> Default for SubscriberTable<S> {
    fn default() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }
}

impl<S: KeyedSnapshot> SubscriberTable<S> {
    pub(super) fn insert(
        &mut self,
        id: SubscriberId,
        subscription: Subscription<S::Key>,
        listener: Listener<S>,
        is_equal: Option<IsEqual>,
    ) {
        self.entries.insert(
            id,
            SubscriberEntry {
                subscription,
                listener,
                is_equal,
                last_seen: None,
            },
        );
    }

    pub(super) fn remove(&mut self, id: SubscriberId) -> bool {
        self.entries.remove(&id).is_some()
    }

    /// Subscribers whose mask includes `key`, in registration order.
    pub(super) fn interested_in(&self, key: S::Key) -> Vec<SubscriberId> {
        self.entries
            .iter()
            .filter(|(_, entry)| entry.subscription.contains(key))
            .map(|(id, _)| *id)
            .collect()
    }

    /// Records `next` as seen by every subscriber with a changed subscribed
    /// key (or that has seen nothing yet) and returns their deliveries in
    /// registration order.
    pub(super) fn plan(&mut self, next: &Arc<S>) -> Vec<Delivery<S>> {
        let mut deliveries = Vec::new();
        for (id, entry) in &mut self.entries {
            let wake = match &entry.last_seen {
                None => true,
                Some(previous) => entry.subscription.keys().any(|key| {
                    previous.key_changed(next, key, entry.is_equal.as_ref())
                }),
            };
            if !wake {
                continue;
            }
            entry.last_seen = Some(next.clone());
            deliveries.push(Delivery {
                id: *id,
                listener: entry.listener.clone(),
                snapshot: next.clone(),
            });
        }
        deliveries
    }
}
