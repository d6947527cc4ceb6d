use serde::{Deserialize, Serialize};
use std::marker::PhantomData;
use std::ops::{Index, IndexMut};

/// Slot storage addressed by typed integer ids.
///
/// Ids are never reused while a session is live: removing an object leaves a
/// hole, so an id held by a stale reference resolves to `None` instead of to
/// some newer object. Loading a stored session compacts the holes away.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Arena<I, T> {
    slots: Vec<Option<T>>,
    #[serde(skip)]
    _id: PhantomData<I>,
}

impl<I, T> Default for Arena<I, T> {
    fn default() -> Self {
        Self {
            slots: Vec::new(),
            _id: PhantomData,
        }
    }
}

impl<I, T> Arena<I, T>
where
    I: Copy + From<usize> + Into<usize>,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Id the next `insert` will hand out.
    pub fn next_id(&self) -> I {
        I::from(self.slots.len())
    }

    pub fn insert(&mut self, value: T) -> I {
        let id = I::from(self.slots.len());
        self.slots.push(Some(value));
        id
    }

    pub fn remove(&mut self, id: I) -> Option<T> {
        self.slots.get_mut(id.into()).and_then(Option::take)
    }

    pub fn get(&self, id: I) -> Option<&T> {
        self.slots.get(id.into()).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, id: I) -> Option<&mut T> {
        self.slots.get_mut(id.into()).and_then(Option::as_mut)
    }

    pub fn contains(&self, id: I) -> bool {
        self.get(id).is_some()
    }

    /// Number of live objects.
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = (I, &T)> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().map(|v| (I::from(i), v)))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (I, &mut T)> + '_ {
        self.slots
            .iter_mut()
            .enumerate()
            .filter_map(|(i, s)| s.as_mut().map(|v| (I::from(i), v)))
    }

    /// Moves every live object down over the holes, keeping their order.
    /// Returns the new id of each old slot, `None` for the holes.
    pub fn compact(&mut self) -> Vec<Option<I>> {
        let mut remap = Vec::with_capacity(self.slots.len());
        let mut live = Vec::with_capacity(self.len());
        for slot in self.slots.drain(..) {
            match slot {
                Some(v) => {
                    remap.push(Some(I::from(live.len())));
                    live.push(Some(v));
                }
                None => remap.push(None),
            }
        }
        self.slots = live;
        remap
    }

    /// Snapshot of live ids, for loops that mutate the arena.
    pub fn ids(&self) -> Vec<I> {
        self.iter().map(|(id, _)| id).collect()
    }
}

impl<I, T> Index<I> for Arena<I, T>
where
    I: Copy + From<usize> + Into<usize>,
{
    type Output = T;
    fn index(&self, id: I) -> &T {
        let i: usize = id.into();
        match self.slots.get(i) {
            Some(Some(v)) => v,
            _ => panic!("dangling arena id {i}"),
        }
    }
}

impl<I, T> IndexMut<I> for Arena<I, T>
where
    I: Copy + From<usize> + Into<usize>,
{
    fn index_mut(&mut self, id: I) -> &mut T {
        let i: usize = id.into();
        match self.slots.get_mut(i) {
            Some(Some(v)) => v,
            _ => panic!("dangling arena id {i}"),
        }
    }
}
