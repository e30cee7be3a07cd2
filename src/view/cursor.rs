use crate::backing::Backing;
use crate::error::ViewError;
use crate::store::KeyStore;

use super::view::{BackingId, View};

/// Single-use forward cursor over a [`View`].
///
/// The cursor is bound to the backing instance it was minted over: every
/// advance re-syncs the owning view first and fails with
/// [`ViewError::Stale`] if the view is by then reading a different instance,
/// rather than silently continuing over replaced data. [`Cursor::remove`]
/// drops the value yielded by the latest [`Cursor::next`] from the live
/// collection, evicting the key from the store when the last value goes.
pub struct Cursor<K, C, S> {
    view: View<K, C, S>,
    captured: BackingId<C>,
    pos: usize,
    last: Option<usize>,
}

impl<K, C, S> Cursor<K, C, S>
where
    K: Clone,
    C: Backing,
    S: KeyStore<Key = K, Backing = C>,
{
    pub(crate) fn new(view: View<K, C, S>, captured: BackingId<C>, start: usize) -> Self {
        Self {
            view,
            captured,
            pos: start,
            last: None,
        }
    }

    /// Re-syncs the owning view and checks that it still reads the backing
    /// this cursor was minted over.
    fn validate(&self) -> Result<(), ViewError> {
        self.view.refresh_if_empty()?;
        if self.view.backing_id() != self.captured {
            log::debug!("cursor went stale: the view re-attached to a different backing");
            return Err(ViewError::Stale);
        }
        Ok(())
    }

    /// Whether another value is available.
    pub fn has_next(&self) -> Result<bool, ViewError> {
        self.validate()?;
        let (_, end) = self.view.visible_span();
        Ok(self.pos < end)
    }

    /// Next value, or `None` once the visible range is exhausted.
    pub fn next(&mut self) -> Result<Option<C::Value>, ViewError>
    where
        C::Value: Clone,
    {
        self.validate()?;
        let (_, end) = self.view.visible_span();
        if self.pos >= end {
            return Ok(None);
        }
        match self.view.value_at(self.pos) {
            Some(value) => {
                self.last = Some(self.pos);
                self.pos += 1;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    /// Removes the most recently yielded value from the live collection.
    ///
    /// No fresh re-sync happens here: the advance that yielded the value
    /// already validated that this cursor still reads the live backing.
    pub fn remove(&mut self) -> Result<(), ViewError> {
        let index = self.last.take().ok_or(ViewError::NoValue)?;
        self.view.remove_for_cursor(index);
        self.pos = index;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use eyre::Result;

    use super::*;
    use crate::backing::{shared, Shared};
    use crate::store::HashStore;

    type Store = Shared<HashStore<&'static str, Vec<i32>>>;

    fn populated(values: Vec<i32>) -> (Store, View<&'static str, Vec<i32>, HashStore<&'static str, Vec<i32>>>) {
        let store: Store = shared(HashStore::default());
        let mut view = View::attach("a", store.clone());
        view.insert_all(values).unwrap();
        (store, view)
    }

    #[test]
    fn test_cursor_walks_values() -> Result<()> {
        let (_store, view) = populated(vec![1, 2, 3]);
        let mut cursor = view.cursor()?;

        let mut seen = Vec::new();
        while cursor.has_next()? {
            seen.push(cursor.next()?.unwrap());
        }
        assert_eq!(seen, vec![1, 2, 3]);
        assert_eq!(cursor.next()?, None);
        Ok(())
    }

    #[test]
    fn test_cursor_removal_reaches_the_store() -> Result<()> {
        let (store, view) = populated(vec![1, 2, 3]);
        let mut cursor = view.cursor()?;

        // Removing mid-iteration keeps yielding the not-yet-visited values.
        assert_eq!(cursor.next()?, Some(1));
        cursor.remove()?;
        assert_eq!(cursor.next()?, Some(2));
        assert_eq!(cursor.next()?, Some(3));
        cursor.remove()?;
        assert_eq!(view.contents()?, vec![2]);

        let mut cursor = view.cursor()?;
        assert_eq!(cursor.next()?, Some(2));
        cursor.remove()?;
        assert!(store.borrow().fetch(&"a").is_none());
        assert!(view.is_empty()?);
        Ok(())
    }

    #[test]
    fn test_cursor_remove_needs_a_value() -> Result<()> {
        let (_store, view) = populated(vec![1]);
        let mut cursor = view.cursor()?;

        assert_eq!(cursor.remove().unwrap_err(), ViewError::NoValue);
        assert_eq!(cursor.next()?, Some(1));
        cursor.remove()?;
        // The slot is gone; a second removal has nothing to act on.
        assert_eq!(cursor.remove().unwrap_err(), ViewError::NoValue);
        Ok(())
    }

    #[test]
    fn test_cursor_stays_inside_a_sub_view() -> Result<()> {
        let (_store, view) = populated(vec![1, 2, 3, 4]);
        let sub = view.sub_view(1..3)?;
        let mut cursor = sub.cursor()?;

        assert_eq!(cursor.next()?, Some(2));
        cursor.remove()?;
        assert_eq!(cursor.next()?, Some(3));
        assert_eq!(cursor.next()?, None);
        assert_eq!(view.contents()?, vec![1, 3, 4]);
        Ok(())
    }

    #[test]
    fn test_cursor_fails_once_the_backing_is_replaced() -> Result<()> {
        let (store, view) = populated(vec![1, 2, 3]);
        let mut cursor = view.cursor()?;
        assert_eq!(cursor.next()?, Some(1));

        store.borrow().fetch(&"a").unwrap().borrow_mut().clear();
        store.borrow_mut().install("a", shared(vec![9]));

        // The view self-heals onto the replacement; the cursor must not
        // follow it mid-iteration.
        assert_eq!(cursor.has_next().unwrap_err(), ViewError::Stale);
        assert_eq!(cursor.next().unwrap_err(), ViewError::Stale);
        assert_eq!(view.contents()?, vec![9]);
        Ok(())
    }
}
