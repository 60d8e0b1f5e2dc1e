use std::collections::HashMap;
use std::hash::Hash;
use std::sync::RwLock;

use hemobank_core::FacilityId;
use std::sync::Arc;

/// Facility-isolated key/value store abstraction for disposable read models.
pub trait FacilityStore<K, V>: Send + Sync {
    fn get(&self, facility_id: FacilityId, key: &K) -> Option<V>;
    fn upsert(&self, facility_id: FacilityId, key: K, value: V);
    fn list(&self, facility_id: FacilityId) -> Vec<V>;
    /// Clear all read-model records for a facility (rebuild support).
    fn clear_facility(&self, facility_id: FacilityId);
}

impl<K, V, S> FacilityStore<K, V> for Arc<S>
where
    S: FacilityStore<K, V> + ?Sized,
{
    fn get(&self, facility_id: FacilityId, key: &K) -> Option<V> {
        (**self).get(facility_id, key)
    }

    fn upsert(&self, facility_id: FacilityId, key: K, value: V) {
        (**self).upsert(facility_id, key, value)
    }

    fn list(&self, facility_id: FacilityId) -> Vec<V> {
        (**self).list(facility_id)
    }

    fn clear_facility(&self, facility_id: FacilityId) {
        (**self).clear_facility(facility_id)
    }
}

/// In-memory facility-isolated store for tests/dev.
#[derive(Debug)]
pub struct InMemoryFacilityStore<K, V> {
    inner: RwLock<HashMap<(FacilityId, K), V>>,
}

impl<K, V> InMemoryFacilityStore<K, V> {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }
}

impl<K, V> Default for InMemoryFacilityStore<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> FacilityStore<K, V> for InMemoryFacilityStore<K, V>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn get(&self, facility_id: FacilityId, key: &K) -> Option<V> {
        let map = self.inner.read().ok()?;
        map.get(&(facility_id, key.clone())).cloned()
    }

    fn upsert(&self, facility_id: FacilityId, key: K, value: V) {
        if let Ok(mut map) = self.inner.write() {
            map.insert((facility_id, key), value);
        }
    }

    fn list(&self, facility_id: FacilityId) -> Vec<V> {
        let map = match self.inner.read() {
            Ok(m) => m,
            Err(_) => return vec![],
        };

        map.iter()
            .filter_map(|((f, _k), v)| if *f == facility_id { Some(v.clone()) } else { None })
            .collect()
    }

    fn clear_facility(&self, facility_id: FacilityId) {
        if let Ok(mut map) = self.inner.write() {
            map.retain(|(f, _k), _v| *f != facility_id);
        }
    }
}
