use std::cell::RefCell;
use std::fmt;
use std::ops::Range;
use std::rc::Rc;

use by_address::ByThinAddress;
use itertools::Itertools;

use crate::backing::{shared, Backing, Shared};
use crate::error::ViewError;
use crate::store::KeyStore;

use super::cursor::Cursor;

/// Identity token of a concrete backing instance. Compared by address, so
/// value-equal but distinct collections still count as different backings.
pub(crate) type BackingId<C> = ByThinAddress<Shared<C>>;

pub(crate) fn backing_id<C>(backing: &Shared<C>) -> BackingId<C> {
    ByThinAddress(Rc::clone(backing))
}

/// Mutable collection facade over the values stored under one key of a
/// [`KeyStore`].
///
/// A root view owns the relationship with the store: inserting the first
/// value installs the backing collection under the view's key, removing the
/// last one evicts the entry, and an emptied view transparently re-attaches
/// to whatever collection the store holds for its key. A derived view (see
/// [`View::sub_view`]) delegates those duties up its ancestor chain instead
/// and becomes permanently [stale](ViewError::Stale) once the ancestor's
/// backing is replaced by a different instance.
///
/// Handles are cheap to clone and alias the same view state. No internal
/// locking exists: concurrent structural interference is detected on a best
/// effort basis, never prevented.
pub struct View<K, C, S> {
    inner: Rc<RefCell<Inner<K, C, S>>>,
}

struct Inner<K, C, S> {
    key: K,
    backing: Shared<C>,
    ancestry: Option<Ancestry<K, C, S>>,
    store: Shared<S>,
    // Sub-range views address backing[window]; positions are absolute.
    window: Option<Range<usize>>,
    // Incremental bookkeeping only: reported lengths always re-derive from
    // the live backing after a refresh.
    tracked: isize,
}

struct Ancestry<K, C, S> {
    view: View<K, C, S>,
    snapshot: BackingId<C>,
}

impl<K, C, S> Clone for View<K, C, S> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<K, C, S> View<K, C, S>
where
    K: Clone,
    C: Backing,
    S: KeyStore<Key = K, Backing = C>,
{
    /// Root view over a caller-supplied backing collection. The store learns
    /// about the backing once the first value is inserted.
    pub fn new(key: K, backing: Shared<C>, store: Shared<S>) -> Self {
        Self::assemble(key, backing, None, store, None)
    }

    /// Root view that adopts the collection currently stored under `key`, or
    /// starts out empty.
    pub fn attach(key: K, store: Shared<S>) -> Self
    where
        C: Default,
    {
        let backing = store
            .borrow()
            .fetch(&key)
            .unwrap_or_else(|| shared(C::default()));
        Self::new(key, backing, store)
    }

    fn assemble(
        key: K,
        backing: Shared<C>,
        ancestry: Option<Ancestry<K, C, S>>,
        store: Shared<S>,
        window: Option<Range<usize>>,
    ) -> Self {
        Self {
            inner: Rc::new(RefCell::new(Inner {
                key,
                backing,
                ancestry,
                store,
                window,
                tracked: 0,
            })),
        }
    }

    /// Derived view over `range` of this view's current values, counted in
    /// iteration order (and relative to this view's own range if it is
    /// itself derived).
    ///
    /// The derived view reads and writes the same shared backing, so
    /// in-place mutations flow both ways. Once this view's backing is
    /// replaced by a different instance, every operation on the derived view
    /// fails with [`ViewError::Stale`]; there is no recovery path for it.
    /// Ranges are positional and therefore most useful for backings with
    /// caller-controlled order; value-ordered backings keep ordering values
    /// their own way on insert.
    pub fn sub_view(&self, range: Range<usize>) -> Result<Self, ViewError> {
        self.refresh_if_empty()?;
        let inner = self.inner.borrow();
        let len = inner.live_len();
        if range.start > range.end || range.end > len {
            return Err(ViewError::OutOfBounds {
                start: range.start,
                end: range.end,
                len,
            });
        }
        let base = inner.window.as_ref().map_or(0, |w| w.start);
        Ok(Self::assemble(
            inner.key.clone(),
            Rc::clone(&inner.backing),
            Some(Ancestry {
                view: self.clone(),
                snapshot: backing_id(&inner.backing),
            }),
            Rc::clone(&inner.store),
            Some(base + range.start..base + range.end),
        ))
    }

    /// If the backing collection is empty but the store holds values for the
    /// key, adopt the stored collection. A derived view refreshes its
    /// ancestor instead and verifies that the ancestor still reads the
    /// backing this view was derived from.
    pub(crate) fn refresh_if_empty(&self) -> Result<(), ViewError> {
        let ancestry = {
            let inner = self.inner.borrow();
            inner
                .ancestry
                .as_ref()
                .map(|a| (a.view.clone(), a.snapshot.clone()))
        };
        match ancestry {
            Some((ancestor, snapshot)) => {
                ancestor.refresh_if_empty()?;
                if ancestor.backing_id() != snapshot {
                    log::debug!("derived view went stale: ancestor backing was replaced");
                    return Err(ViewError::Stale);
                }
                Ok(())
            }
            None => {
                let mut inner = self.inner.borrow_mut();
                if inner.backing.borrow().is_empty() {
                    let found = inner.store.borrow().fetch(&inner.key);
                    if let Some(found) = found {
                        if !Rc::ptr_eq(&inner.backing, &found) {
                            log::trace!("empty root view re-attached to the stored backing");
                        }
                        inner.backing = found;
                    }
                }
                Ok(())
            }
        }
    }

    /// Drops the store entry once the root backing holds no values.
    pub(crate) fn evict_if_empty(&self) {
        let ancestor = self
            .inner
            .borrow()
            .ancestry
            .as_ref()
            .map(|a| a.view.clone());
        match ancestor {
            Some(ancestor) => ancestor.evict_if_empty(),
            None => {
                let inner = self.inner.borrow();
                if inner.backing.borrow().is_empty() {
                    inner.store.borrow_mut().evict(&inner.key);
                }
            }
        }
    }

    /// (Re)installs the root backing under the view's key. Called after an
    /// insert into a previously empty collection.
    fn install(&self) {
        let ancestor = self
            .inner
            .borrow()
            .ancestry
            .as_ref()
            .map(|a| a.view.clone());
        match ancestor {
            Some(ancestor) => ancestor.install(),
            None => {
                let inner = self.inner.borrow();
                inner
                    .store
                    .borrow_mut()
                    .install(inner.key.clone(), Rc::clone(&inner.backing));
            }
        }
    }

    /// The key this view mirrors.
    pub fn key(&self) -> K {
        self.inner.borrow().key.clone()
    }

    /// Number of visible values, re-derived from the live backing.
    pub fn len(&self) -> Result<usize, ViewError> {
        self.refresh_if_empty()?;
        Ok(self.inner.borrow().live_len())
    }

    pub fn is_empty(&self) -> Result<bool, ViewError> {
        Ok(self.len()? == 0)
    }

    pub fn contains(&self, value: &C::Value) -> Result<bool, ViewError>
    where
        C::Value: PartialEq,
    {
        self.refresh_if_empty()?;
        let inner = self.inner.borrow();
        let backing = inner.backing.borrow();
        Ok(inner.has_value(&backing, value))
    }

    pub fn contains_all(&self, values: &[C::Value]) -> Result<bool, ViewError>
    where
        C::Value: PartialEq,
    {
        self.refresh_if_empty()?;
        let inner = self.inner.borrow();
        let backing = inner.backing.borrow();
        Ok(values.iter().all(|value| inner.has_value(&backing, value)))
    }

    /// Re-synced snapshot of the visible values, in iteration order.
    pub fn contents(&self) -> Result<Vec<C::Value>, ViewError>
    where
        C::Value: Clone,
    {
        self.refresh_if_empty()?;
        let inner = self.inner.borrow();
        let backing = inner.backing.borrow();
        Ok(visible(&inner.window, &*backing).cloned().collect())
    }

    /// Inserts a value, reporting whether the collection changed. The first
    /// value inserted into an empty view (re)installs the backing under the
    /// view's key.
    pub fn insert(&mut self, value: C::Value) -> Result<bool, ViewError> {
        self.refresh_if_empty()?;
        let (changed, was_empty) = {
            let mut inner = self.inner.borrow_mut();
            let was_empty = inner.live_len() == 0;
            let changed = inner.insert_value(value);
            if changed {
                inner.tracked += 1;
            }
            (changed, was_empty)
        };
        if changed && was_empty {
            self.install();
        }
        Ok(changed)
    }

    /// Bulk insert. An empty `values` is a no-op that reports `false`
    /// without re-syncing or touching the store.
    pub fn insert_all(
        &mut self,
        values: impl IntoIterator<Item = C::Value>,
    ) -> Result<bool, ViewError> {
        let values: Vec<_> = values.into_iter().collect();
        if values.is_empty() {
            return Ok(false);
        }
        let old_len = self.len()?;
        let changed = {
            let mut inner = self.inner.borrow_mut();
            let mut changed = false;
            for value in values {
                changed |= inner.insert_value(value);
            }
            let new_len = inner.live_len();
            inner.tracked += new_len as isize - old_len as isize;
            changed
        };
        if changed && old_len == 0 {
            self.install();
        }
        Ok(changed)
    }

    /// Removes one occurrence of `value`, reporting whether one was present.
    /// Removing the last visible value evicts the key from the store.
    pub fn remove(&mut self, value: &C::Value) -> Result<bool, ViewError>
    where
        C::Value: PartialEq,
    {
        self.refresh_if_empty()?;
        let changed = {
            let mut inner = self.inner.borrow_mut();
            let changed = inner.remove_value(value);
            if changed {
                inner.tracked -= 1;
            }
            changed
        };
        if changed {
            self.evict_if_empty();
        }
        Ok(changed)
    }

    /// Removes every occurrence of each listed value. An empty `values` is a
    /// no-op that reports `false` without re-syncing or touching the store.
    pub fn remove_all(&mut self, values: &[C::Value]) -> Result<bool, ViewError>
    where
        C::Value: PartialEq,
    {
        if values.is_empty() {
            return Ok(false);
        }
        self.prune(|v| !values.contains(v))
    }

    /// Keeps only the listed values. Unlike [`View::remove_all`], an empty
    /// `values` is not short-circuited: it clears the view.
    pub fn retain_all(&mut self, values: &[C::Value]) -> Result<bool, ViewError>
    where
        C::Value: PartialEq,
    {
        self.prune(|v| values.contains(v))
    }

    fn prune(&mut self, keep: impl FnMut(&C::Value) -> bool) -> Result<bool, ViewError> {
        self.refresh_if_empty()?;
        let removed = {
            let mut inner = self.inner.borrow_mut();
            let removed = inner.prune(keep);
            inner.tracked -= removed as isize;
            removed
        };
        if removed > 0 {
            self.evict_if_empty();
        }
        Ok(removed > 0)
    }

    /// Removes every visible value. A no-op on an already-empty view: no
    /// eviction is attempted for an entry the store does not hold.
    pub fn clear(&mut self) -> Result<(), ViewError> {
        let old_len = self.len()?;
        if old_len == 0 {
            return Ok(());
        }
        {
            let mut inner = self.inner.borrow_mut();
            if inner.window.is_some() {
                inner.prune(|_| false);
            } else {
                inner.backing.borrow_mut().clear();
            }
            inner.tracked -= old_len as isize;
        }
        self.evict_if_empty();
        Ok(())
    }

    /// Forward cursor over the visible values, bound to the current backing
    /// instance. The cursor fails with [`ViewError::Stale`] as soon as the
    /// view re-attaches to a different backing underneath it.
    pub fn cursor(&self) -> Result<Cursor<K, C, S>, ViewError> {
        self.refresh_if_empty()?;
        let inner = self.inner.borrow();
        let start = inner.window.as_ref().map_or(0, |w| w.start);
        Ok(Cursor::new(self.clone(), backing_id(&inner.backing), start))
    }

    pub(crate) fn backing_id(&self) -> BackingId<C> {
        backing_id(&self.inner.borrow().backing)
    }

    /// Absolute bounds of the visible values, read live.
    pub(crate) fn visible_span(&self) -> (usize, usize) {
        let inner = self.inner.borrow();
        match &inner.window {
            Some(w) => (w.start, w.end),
            None => (0, inner.backing.borrow().len()),
        }
    }

    pub(crate) fn value_at(&self, index: usize) -> Option<C::Value>
    where
        C::Value: Clone,
    {
        self.inner.borrow().backing.borrow().nth(index).cloned()
    }

    /// Cursor-side removal: mutates the live backing directly, on the
    /// strength of the validation done by the cursor's preceding advance.
    pub(crate) fn remove_for_cursor(&self, index: usize) {
        {
            let mut inner = self.inner.borrow_mut();
            inner.backing.borrow_mut().remove_nth(index);
            inner.tracked -= 1;
            if let Some(w) = inner.window.clone() {
                inner.window = Some(w.start..w.end - 1);
            }
        }
        self.evict_if_empty();
    }

    #[cfg(test)]
    pub(crate) fn tracked(&self) -> isize {
        self.inner.borrow().tracked
    }
}

impl<K, C: Backing, S> Inner<K, C, S> {
    fn live_len(&self) -> usize {
        match &self.window {
            Some(w) => w.len(),
            None => self.backing.borrow().len(),
        }
    }

    fn has_value(&self, backing: &C, value: &C::Value) -> bool
    where
        C::Value: PartialEq,
    {
        match &self.window {
            Some(_) => visible(&self.window, backing).any(|v| v == value),
            None => backing.contains(value),
        }
    }

    fn insert_value(&mut self, value: C::Value) -> bool {
        match self.window.clone() {
            Some(w) => {
                let changed = self.backing.borrow_mut().insert_nth(w.end, value);
                if changed {
                    self.window = Some(w.start..w.end + 1);
                }
                changed
            }
            None => self.backing.borrow_mut().insert(value),
        }
    }

    fn remove_value(&mut self, value: &C::Value) -> bool
    where
        C::Value: PartialEq,
    {
        match self.window.clone() {
            Some(w) => {
                let hit = {
                    let backing = self.backing.borrow();
                    let hit = visible(&self.window, &*backing).position(|v| v == value);
                    hit
                };
                match hit {
                    Some(offset) => {
                        self.backing.borrow_mut().remove_nth(w.start + offset);
                        self.window = Some(w.start..w.end - 1);
                        true
                    }
                    None => false,
                }
            }
            None => self.backing.borrow_mut().remove(value),
        }
    }

    /// Drops every visible value rejected by `keep`, returning how many went.
    fn prune(&mut self, mut keep: impl FnMut(&C::Value) -> bool) -> usize {
        match self.window.clone() {
            Some(w) => {
                let mut backing = self.backing.borrow_mut();
                let mut index = w.start;
                let mut end = w.end;
                while index < end {
                    let drop_it = backing.nth(index).is_some_and(|v| !keep(v));
                    if drop_it {
                        backing.remove_nth(index);
                        end -= 1;
                    } else {
                        index += 1;
                    }
                }
                drop(backing);
                let removed = w.end - end;
                self.window = Some(w.start..end);
                removed
            }
            None => {
                let mut backing = self.backing.borrow_mut();
                let before = backing.len();
                backing.retain(&mut keep);
                before - backing.len()
            }
        }
    }
}

fn visible<'c, C: Backing>(
    window: &Option<Range<usize>>,
    backing: &'c C,
) -> impl Iterator<Item = &'c C::Value> {
    let (skip, take) = match window {
        Some(w) => (w.start, w.len()),
        None => (0, usize::MAX),
    };
    backing.iter().skip(skip).take(take)
}

/// Diagnostic rendering of the current state. Deliberately does not re-sync:
/// formatting must not fail or mutate, so it shows whatever the view read
/// last. [`View::contents`] is the re-synced, fallible counterpart.
impl<K, C, S> fmt::Debug for View<K, C, S>
where
    K: fmt::Debug,
    C: Backing,
    C::Value: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        let backing = inner.backing.borrow();
        let values = visible(&inner.window, &*backing)
            .format_with(", ", |value, f| f(&format_args!("{value:?}")));
        write!(
            f,
            "View {{ key: {:?}, values: [{}], tracked: {} }}",
            inner.key, values, inner.tracked
        )
    }
}
