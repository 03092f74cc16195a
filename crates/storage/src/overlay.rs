//! In-process dissemination overlay
//!
//! Holds the newest signed blob per object. Stores publish to it on
//! commit; caches read from it through [`GlobSource`]. The overlay itself
//! is untrusted: nothing here checks signatures, and "newest" goes by the
//! version a blob is labelled with.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tessera_core::{GlobSource, Oid, SignedGlob, StoreId};

/// Shared overlay of signed object blobs
#[derive(Debug, Default)]
pub struct MemoryOverlay {
    globs: DashMap<Oid, SignedGlob>,
    fetches: AtomicU64,
    hits: AtomicU64,
}

impl MemoryOverlay {
    /// Empty overlay
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a blob unless a newer one for the same object is present
    ///
    /// Publishes can arrive out of commit order; an older version never
    /// replaces a newer one.
    pub fn publish(&self, glob: SignedGlob) {
        match self.globs.entry(glob.oid.clone()) {
            Entry::Occupied(mut current) => {
                if current.get().version <= glob.version {
                    current.insert(glob);
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(glob);
            }
        }
    }

    /// Latest blob for an object
    pub fn get(&self, oid: &Oid) -> Option<SignedGlob> {
        self.globs.get(oid).map(|entry| entry.value().clone())
    }

    /// Remove an object's blob
    pub fn withdraw(&self, oid: &Oid) -> Option<SignedGlob> {
        self.globs.remove(oid).map(|(_, glob)| glob)
    }

    /// Number of `fetch_glob` calls
    pub fn fetch_count(&self) -> u64 {
        self.fetches.load(Ordering::Relaxed)
    }

    /// Number of `fetch_glob` calls that found a blob
    pub fn hit_count(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Number of objects with a published blob
    pub fn len(&self) -> usize {
        self.globs.len()
    }

    /// True if nothing has been published
    pub fn is_empty(&self) -> bool {
        self.globs.is_empty()
    }
}

impl GlobSource for MemoryOverlay {
    fn fetch_glob(&self, store: &StoreId, onum: u64) -> Option<SignedGlob> {
        self.fetches.fetch_add(1, Ordering::Relaxed);
        let glob = self.get(&Oid::new(store.clone(), onum));
        if glob.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        }
        glob
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::SigningKey;
    use tessera_core::VersionedObject;

    fn glob(onum: u64, version: u64) -> SignedGlob {
        let key = SigningKey::from_bytes(&[1u8; 32]);
        let object = VersionedObject::new(Oid::new("s1".into(), onum), version, vec![0; 4]);
        SignedGlob::seal(&object, &key).unwrap()
    }

    #[test]
    fn test_publish_replaces_older_blob() {
        let overlay = MemoryOverlay::new();
        overlay.publish(glob(1, 1));
        overlay.publish(glob(1, 2));
        assert_eq!(overlay.len(), 1);

        let key = SigningKey::from_bytes(&[1u8; 32]);
        let latest = overlay
            .fetch_glob(&"s1".into(), 1)
            .unwrap()
            .open(&key.verifying_key().to_bytes())
            .unwrap();
        assert_eq!(latest.version, 2);
    }

    #[test]
    fn test_late_publish_of_older_version_is_ignored() {
        let overlay = MemoryOverlay::new();
        overlay.publish(glob(1, 3));
        overlay.publish(glob(1, 2));
        assert_eq!(overlay.get(&Oid::new("s1".into(), 1)).unwrap().version, 3);

        overlay.publish(glob(1, 4));
        assert_eq!(overlay.get(&Oid::new("s1".into(), 1)).unwrap().version, 4);
    }

    #[test]
    fn test_fetch_counts_hits_and_misses() {
        let overlay = MemoryOverlay::new();
        overlay.publish(glob(1, 1));

        assert!(overlay.fetch_glob(&"s1".into(), 1).is_some());
        assert!(overlay.fetch_glob(&"s1".into(), 2).is_none());
        assert_eq!(overlay.fetch_count(), 2);
        assert_eq!(overlay.hit_count(), 1);
    }

    #[test]
    fn test_withdraw() {
        let overlay = MemoryOverlay::new();
        overlay.publish(glob(3, 1));
        assert!(overlay.withdraw(&Oid::new("s1".into(), 3)).is_some());
        assert!(overlay.is_empty());
    }
}
