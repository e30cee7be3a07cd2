use std::collections::{BTreeMap, HashMap};
use std::hash::{BuildHasher, Hash};

use impl_tools::autoimpl;

use crate::backing::Shared;

/// The operations an owning map must expose so per-key views can keep its
/// entries consistent: look up the live collection for a key, (re)install
/// one, and drop an emptied entry.
#[autoimpl(for<T: trait + ?Sized> &mut T, Box<T>)]
pub trait KeyStore {
    type Key;
    type Backing;

    /// Current collection stored for `key`, if any.
    fn fetch(&self, key: &Self::Key) -> Option<Shared<Self::Backing>>;

    /// Inserts or replaces the collection stored for `key`.
    fn install(&mut self, key: Self::Key, backing: Shared<Self::Backing>);

    /// Removes the entry for `key`, if any.
    fn evict(&mut self, key: &Self::Key);
}

impl<K: Hash + Eq, C, S: BuildHasher> KeyStore for HashMap<K, Shared<C>, S> {
    type Key = K;
    type Backing = C;

    fn fetch(&self, key: &K) -> Option<Shared<C>> {
        HashMap::get(self, key).cloned()
    }

    fn install(&mut self, key: K, backing: Shared<C>) {
        HashMap::insert(self, key, backing);
    }

    fn evict(&mut self, key: &K) {
        HashMap::remove(self, key);
    }
}

impl<K: Ord, C> KeyStore for BTreeMap<K, Shared<C>> {
    type Key = K;
    type Backing = C;

    fn fetch(&self, key: &K) -> Option<Shared<C>> {
        BTreeMap::get(self, key).cloned()
    }

    fn install(&mut self, key: K, backing: Shared<C>) {
        BTreeMap::insert(self, key, backing);
    }

    fn evict(&mut self, key: &K) {
        BTreeMap::remove(self, key);
    }
}

/// Hash-backed store with the hasher used across the crate.
pub type HashStore<K, C> = HashMap<K, Shared<C>, ahash::RandomState>;

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use super::*;
    use crate::backing::shared;

    fn exercise<S: KeyStore<Key = &'static str, Backing = Vec<u8>>>(mut store: S) {
        assert!(store.fetch(&"a").is_none());

        let backing = shared(vec![1, 2]);
        store.install("a", Rc::clone(&backing));

        // Fetch hands out the stored instance, not a copy of it.
        let fetched = store.fetch(&"a").unwrap();
        assert!(Rc::ptr_eq(&fetched, &backing));

        let replacement = shared(vec![3]);
        store.install("a", Rc::clone(&replacement));
        assert!(Rc::ptr_eq(&store.fetch(&"a").unwrap(), &replacement));

        store.evict(&"a");
        assert!(store.fetch(&"a").is_none());
        store.evict(&"a");
    }

    #[test]
    fn test_hash_store() {
        exercise(HashStore::default());
    }

    #[test]
    fn test_btree_store() {
        exercise(BTreeMap::new());
    }
}
