//! Removing entries from keyed collections such as sample dictionaries.
//!
//! [`without_keys`] edits the map in place and hands it back for chaining;
//! [`with_keys_removed`] leaves its input alone and returns a trimmed copy.

use std::{
    borrow::Borrow,
    collections::{BTreeMap, HashMap},
    fmt::Debug,
    hash::{BuildHasher, Hash},
};

use crate::errors::{Result, TrainingError};

/// Map operations needed for key removal.
pub trait KeyedMap<K> {
    fn has_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Ord + ?Sized;

    fn drop_key<Q>(&mut self, key: &Q)
    where
        K: Borrow<Q>,
        Q: Hash + Ord + ?Sized;
}

impl<K, V, S> KeyedMap<K> for HashMap<K, V, S>
where
    K: Hash + Eq,
    S: BuildHasher,
{
    fn has_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Ord + ?Sized,
    {
        self.contains_key(key)
    }

    fn drop_key<Q>(&mut self, key: &Q)
    where
        K: Borrow<Q>,
        Q: Hash + Ord + ?Sized,
    {
        self.remove(key);
    }
}

impl<K, V> KeyedMap<K> for BTreeMap<K, V>
where
    K: Ord,
{
    fn has_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Ord + ?Sized,
    {
        self.contains_key(key)
    }

    fn drop_key<Q>(&mut self, key: &Q)
    where
        K: Borrow<Q>,
        Q: Hash + Ord + ?Sized,
    {
        self.remove(key);
    }
}

/// Removes `keys` from `map` in place and returns the same map.
///
/// Every key is checked before anything is removed, so on error the map is
/// unchanged. A key listed twice is missing the second time.
pub fn without_keys<'m, M, K, Q>(map: &'m mut M, keys: &[&Q]) -> Result<&'m mut M>
where
    M: KeyedMap<K>,
    K: Borrow<Q>,
    Q: Hash + Ord + Debug + ?Sized,
{
    for (position, key) in keys.iter().enumerate() {
        let repeated = keys[..position].iter().any(|earlier| earlier == key);
        if repeated || !map.has_key(*key) {
            return Err(TrainingError::KeyNotFound(format!("{:?}", key)));
        }
    }
    for key in keys {
        map.drop_key(*key);
    }
    Ok(map)
}

/// Returns a copy of `map` without `keys`; `map` itself is not modified.
pub fn with_keys_removed<M, K, Q>(map: &M, keys: &[&Q]) -> Result<M>
where
    M: KeyedMap<K> + Clone,
    K: Borrow<Q>,
    Q: Hash + Ord + Debug + ?Sized,
{
    let mut copy = map.clone();
    without_keys(&mut copy, keys)?;
    Ok(copy)
}
