//! Keyed arena registry.
//!
//! Board types, interfaces, DSP images, FPGA images and parameter defaults
//! all live in a [`Registry`]: an arena of entries with a key index on the
//! side. Entries are addressed by copyable [`Handle`]s that modules store in
//! their channel slots, so one image can be shared by any number of
//! channels while the registry remains its only owner.
//!
//! - **Dedup**: [`Registry::insert_or_find`] returns the existing handle for
//!   a known key and never calls the loader in that case
//! - **Atomic insert**: the loader runs before anything is stored, so a
//!   failed load leaves the registry exactly as it was
//! - **Stale handles**: slots are never reused and [`Registry::clear`] bumps
//!   a generation counter, so a handle to a removed entry resolves to `None`
//!   rather than to some other entry
//!
//! # Example
//!
//! ```rust,ignore
//! let mut dsps: Registry<String, DspImage> = Registry::new("DSP image");
//! let (first, created) = dsps.insert_or_find("x10p.dsp".into(), |name| load(name))?;
//! let (second, again) = dsps.insert_or_find("x10p.dsp".into(), |name| load(name))?;
//! assert!(created && !again && first == second);
//! ```

use std::borrow::Borrow;
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

/// Stable reference to an entry of a `Registry<_, T>`.
pub struct Handle<T> {
    index: u32,
    generation: u32,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Handle<T> {
    fn new(index: usize, generation: u32) -> Self {
        Self {
            index: index as u32,
            generation,
            _marker: PhantomData,
        }
    }

    /// Arena slot, for diagnostics.
    pub fn index(self) -> usize {
        self.index as usize
    }
}

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Handle<T> {}

impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index && self.generation == other.generation
    }
}

impl<T> Eq for Handle<T> {}

impl<T> Hash for Handle<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.index.hash(state);
        self.generation.hash(state);
    }
}

impl<T> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle({}@{})", self.index, self.generation)
    }
}

/// Arena of `T` indexed by key `K`.
pub struct Registry<K, T> {
    kind: &'static str,
    slots: Vec<Option<(K, T)>>,
    by_key: HashMap<K, Handle<T>>,
    generation: u32,
}

impl<K, T> Registry<K, T>
where
    K: Eq + Hash + Clone,
{
    /// Empty registry; `kind` names the entity in diagnostics.
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            slots: Vec::new(),
            by_key: HashMap::new(),
            generation: 0,
        }
    }

    /// Entity name used in diagnostics.
    pub fn kind(&self) -> &'static str {
        self.kind
    }

    /// Handle of the entry for `key`.
    pub fn find<Q>(&self, key: &Q) -> Option<Handle<T>>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.by_key.get(key).copied()
    }

    /// True if an entry for `key` exists.
    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.by_key.contains_key(key)
    }

    fn slot(&self, handle: Handle<T>) -> Option<&(K, T)> {
        if handle.generation != self.generation {
            return None;
        }
        self.slots.get(handle.index()).and_then(Option::as_ref)
    }

    /// Entry behind `handle`, `None` if it was removed or cleared.
    pub fn get(&self, handle: Handle<T>) -> Option<&T> {
        self.slot(handle).map(|(_, value)| value)
    }

    /// Mutable access to the entry behind `handle`.
    pub fn get_mut(&mut self, handle: Handle<T>) -> Option<&mut T> {
        if handle.generation != self.generation {
            return None;
        }
        self.slots
            .get_mut(handle.index())
            .and_then(Option::as_mut)
            .map(|(_, value)| value)
    }

    /// Key the entry behind `handle` was stored under.
    pub fn key(&self, handle: Handle<T>) -> Option<&K> {
        self.slot(handle).map(|(key, _)| key)
    }

    /// Return the entry for `key`, creating it with `loader` if absent.
    ///
    /// The boolean is `true` when a new entry was created. If the loader
    /// fails its error is returned and the registry is untouched.
    pub fn insert_or_find<E>(
        &mut self,
        key: K,
        loader: impl FnOnce(&K) -> Result<T, E>,
    ) -> Result<(Handle<T>, bool), E> {
        if let Some(handle) = self.find(&key) {
            return Ok((handle, false));
        }
        let value = loader(&key)?;
        let handle = Handle::new(self.slots.len(), self.generation);
        self.slots.push(Some((key.clone(), value)));
        self.by_key.insert(key, handle);
        Ok((handle, true))
    }

    /// Remove the entry for `key`, returning its value.
    pub fn remove<Q>(&mut self, key: &Q) -> Option<T>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let handle = self.by_key.remove(key)?;
        self.slots
            .get_mut(handle.index())
            .and_then(Option::take)
            .map(|(_, value)| value)
    }

    /// Drop every entry and invalidate all outstanding handles.
    pub fn clear(&mut self) {
        self.slots.clear();
        self.by_key.clear();
        self.generation = self.generation.wrapping_add(1);
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    /// True if no entry is live.
    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }

    /// Live entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (Handle<T>, &K, &T)> {
        let generation = self.generation;
        self.slots.iter().enumerate().filter_map(move |(index, slot)| {
            slot.as_ref()
                .map(|(key, value)| (Handle::new(index, generation), key, value))
        })
    }

    /// Live keys in insertion order.
    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.iter().map(|(_, key, _)| key)
    }
}

impl<K, T> fmt::Debug for Registry<K, T>
where
    K: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let keys: Vec<&K> = self
            .slots
            .iter()
            .filter_map(|slot| slot.as_ref().map(|(key, _)| key))
            .collect();
        f.debug_struct("Registry")
            .field("kind", &self.kind)
            .field("keys", &keys)
            .finish()
    }
}
