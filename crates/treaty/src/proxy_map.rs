//! Proxy maps
//!
//! An owning entity (typically a metric) keeps one [`ProxyMap`] recording,
//! per store, the remote object that stands in for it there. Looking the
//! entry up saves re-resolving the same remote object on every access.
//!
//! Maps are immutable values. Every mutator returns a new map; unchanged
//! results share storage with the receiver, and every empty map shares one
//! process-wide allocation.

use crate::codec::{self, CodecError, CodecResult};
use byteorder::{BigEndian, ReadBytesExt};
use once_cell::sync::Lazy;
use std::collections::BTreeMap;
use std::fmt;
use std::io::{Read, Write};
use std::sync::Arc;
use tessera_core::{StoreId, StoreProxy, StoreRegistry, TesseraResult};

type Entries = BTreeMap<StoreId, RemoteRef>;

static EMPTY: Lazy<Arc<Entries>> = Lazy::new(|| Arc::new(BTreeMap::new()));

/// Handle on an object held by a remote store
#[derive(Clone)]
pub struct RemoteRef {
    store: Arc<dyn StoreProxy>,
    onum: u64,
}

impl RemoteRef {
    /// Object `onum` at `store`
    pub fn new(store: Arc<dyn StoreProxy>, onum: u64) -> Self {
        Self { store, onum }
    }

    /// Store holding the object
    pub fn store(&self) -> &Arc<dyn StoreProxy> {
        &self.store
    }

    /// Object number at that store
    pub fn onum(&self) -> u64 {
        self.onum
    }
}

impl PartialEq for RemoteRef {
    fn eq(&self, other: &Self) -> bool {
        self.onum == other.onum && self.store.id() == other.store.id()
    }
}

impl fmt::Debug for RemoteRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.store.id(), self.onum)
    }
}

/// Immutable map from store to remote handle
#[derive(Clone, PartialEq)]
pub struct ProxyMap {
    entries: Arc<Entries>,
}

impl ProxyMap {
    /// The shared empty map
    pub fn empty() -> Self {
        Self {
            entries: Arc::clone(&EMPTY),
        }
    }

    fn from_entries(entries: Entries) -> Self {
        if entries.is_empty() {
            return Self::empty();
        }
        Self {
            entries: Arc::new(entries),
        }
    }

    /// Handle for `store`
    pub fn get(&self, store: &StoreId) -> Option<&RemoteRef> {
        self.entries.get(store)
    }

    /// Number of stores mapped
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if nothing is mapped
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in store-name order
    pub fn iter(&self) -> impl Iterator<Item = (&StoreId, &RemoteRef)> {
        self.entries.iter()
    }

    /// True if both maps share storage
    pub fn ptr_eq(&self, other: &ProxyMap) -> bool {
        Arc::ptr_eq(&self.entries, &other.entries)
    }

    /// Map with `remote` recorded for its store
    pub fn put(&self, remote: RemoteRef) -> Self {
        let store = remote.store.id().clone();
        if self.entries.get(&store) == Some(&remote) {
            return self.clone();
        }
        let mut entries = (*self.entries).clone();
        entries.insert(store, remote);
        Self::from_entries(entries)
    }

    /// Map with every entry of `other` added, `other` winning on overlap
    pub fn put_all(&self, other: &ProxyMap) -> Self {
        if other.is_empty() || self.ptr_eq(other) {
            return self.clone();
        }
        if self.is_empty() {
            return other.clone();
        }
        if other
            .iter()
            .all(|(store, remote)| self.entries.get(store) == Some(remote))
        {
            return self.clone();
        }
        let mut entries = (*self.entries).clone();
        entries.extend(
            other
                .iter()
                .map(|(store, remote)| (store.clone(), remote.clone())),
        );
        Self::from_entries(entries)
    }

    /// Map without an entry for `store`
    pub fn remove(&self, store: &StoreId) -> Self {
        if !self.entries.contains_key(store) {
            return self.clone();
        }
        let mut entries = (*self.entries).clone();
        entries.remove(store);
        Self::from_entries(entries)
    }

    /// The empty map
    pub fn clear(&self) -> Self {
        Self::empty()
    }

    /// Write the map as `(store name, onum)` pairs
    pub fn encode<W: Write>(&self, w: &mut W) -> CodecResult<()> {
        codec::write_count(w, self.entries.len())?;
        for (store, remote) in self.entries.iter() {
            codec::write_name(w, store.as_str())?;
            codec::write_id(w, "onum", remote.onum)?;
        }
        Ok(())
    }

    /// Read a map, resolving store names through `registry`
    ///
    /// # Errors
    ///
    /// `UnknownStore` for a name the registry does not know, and
    /// `Serialization` for malformed input.
    pub fn decode<R: Read>(r: &mut R, registry: &StoreRegistry) -> TesseraResult<Self> {
        let count = r.read_u32::<BigEndian>().map_err(CodecError::from)?;
        let mut entries = BTreeMap::new();
        for _ in 0..count {
            let name = codec::read_name(r)?;
            let onum = codec::read_id(r, "onum")?;
            let store = registry.resolve_name(&name)?;
            entries.insert(store.id().clone(), RemoteRef::new(store, onum));
        }
        Ok(Self::from_entries(entries))
    }

    /// Encode into a fresh buffer
    pub fn to_bytes(&self) -> CodecResult<Vec<u8>> {
        let mut buf = Vec::new();
        self.encode(&mut buf)?;
        Ok(buf)
    }

    /// Decode from exactly `bytes`
    pub fn from_bytes(bytes: &[u8], registry: &StoreRegistry) -> TesseraResult<Self> {
        let mut cursor = bytes;
        let map = Self::decode(&mut cursor, registry)?;
        codec::ensure_consumed(cursor)?;
        Ok(map)
    }
}

impl Default for ProxyMap {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Debug for ProxyMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.entries.iter()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_core::TesseraError;
    use tessera_storage::MemoryStore;

    fn registry() -> (StoreRegistry, Arc<dyn StoreProxy>, Arc<dyn StoreProxy>) {
        let registry = StoreRegistry::new();
        let s1: Arc<dyn StoreProxy> = Arc::new(MemoryStore::new(StoreId::new("s1")));
        let s2: Arc<dyn StoreProxy> = Arc::new(MemoryStore::new(StoreId::new("s2")));
        registry.register(Arc::clone(&s1));
        registry.register(Arc::clone(&s2));
        (registry, s1, s2)
    }

    #[test]
    fn test_empty_maps_share_storage() {
        let (_, s1, _) = registry();
        let map = ProxyMap::empty().put(RemoteRef::new(Arc::clone(&s1), 4));

        assert!(ProxyMap::empty().ptr_eq(&ProxyMap::default()));
        assert!(map.clear().ptr_eq(&ProxyMap::empty()));
        assert!(map.remove(s1.id()).ptr_eq(&ProxyMap::empty()));
    }

    #[test]
    fn test_put_is_copy_on_write() {
        let (_, s1, s2) = registry();
        let one = ProxyMap::empty().put(RemoteRef::new(Arc::clone(&s1), 4));
        let two = one.put(RemoteRef::new(Arc::clone(&s2), 9));

        assert_eq!(one.len(), 1);
        assert_eq!(two.len(), 2);
        assert_eq!(two.get(s2.id()).unwrap().onum(), 9);

        let same = two.put(RemoteRef::new(Arc::clone(&s2), 9));
        assert!(same.ptr_eq(&two));

        let moved = two.put(RemoteRef::new(Arc::clone(&s2), 10));
        assert_eq!(moved.get(s2.id()).unwrap().onum(), 10);
        assert_eq!(two.get(s2.id()).unwrap().onum(), 9);
    }

    #[test]
    fn test_put_all_overrides() {
        let (_, s1, s2) = registry();
        let left = ProxyMap::empty()
            .put(RemoteRef::new(Arc::clone(&s1), 1))
            .put(RemoteRef::new(Arc::clone(&s2), 2));
        let right = ProxyMap::empty().put(RemoteRef::new(Arc::clone(&s2), 20));

        let merged = left.put_all(&right);
        assert_eq!(merged.get(s1.id()).unwrap().onum(), 1);
        assert_eq!(merged.get(s2.id()).unwrap().onum(), 20);
        assert!(left.put_all(&ProxyMap::empty()).ptr_eq(&left));
        assert!(ProxyMap::empty().put_all(&right).ptr_eq(&right));
    }

    #[test]
    fn test_round_trip_resolves_stores() {
        let (registry, s1, s2) = registry();
        let map = ProxyMap::empty()
            .put(RemoteRef::new(Arc::clone(&s1), 11))
            .put(RemoteRef::new(Arc::clone(&s2), 22));

        let bytes = map.to_bytes().unwrap();
        let decoded = ProxyMap::from_bytes(&bytes, &registry).unwrap();
        assert_eq!(decoded, map);
        assert!(Arc::ptr_eq(decoded.get(s1.id()).unwrap().store(), &s1));
    }

    #[test]
    fn test_layout() {
        let (_, s1, _) = registry();
        let map = ProxyMap::empty().put(RemoteRef::new(s1, 3));
        let bytes = map.to_bytes().unwrap();

        let mut expected = 1u32.to_be_bytes().to_vec();
        expected.extend_from_slice(&2u32.to_be_bytes());
        expected.extend_from_slice(b"s1");
        expected.extend_from_slice(&3i64.to_be_bytes());
        assert_eq!(bytes, expected);
    }

    #[test]
    fn test_unknown_store_rejected() {
        let (_, s1, _) = registry();
        let bytes = ProxyMap::empty()
            .put(RemoteRef::new(s1, 3))
            .to_bytes()
            .unwrap();

        let err = ProxyMap::from_bytes(&bytes, &StoreRegistry::new()).unwrap_err();
        assert!(matches!(err, TesseraError::UnknownStore(_)));
    }

    #[test]
    fn test_truncated_map_rejected() {
        let (registry, s1, _) = registry();
        let bytes = ProxyMap::empty()
            .put(RemoteRef::new(s1, 3))
            .to_bytes()
            .unwrap();
        let err = ProxyMap::from_bytes(&bytes[..bytes.len() - 1], &registry).unwrap_err();
        assert!(matches!(err, TesseraError::Serialization(_)));
    }
}
