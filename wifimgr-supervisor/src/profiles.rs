//! The profile store: up to `MAX_KNOWN_NETWORKS` named network records.
//!
//! Slots are index-stable for the lifetime of a profile so the active
//! session can hold a plain index. Copy-out scrubs everything that was
//! learned from scans rather than supplied by the caller.

use log::debug;

use wifimgr_core_lib::{NetworkProfile, WifiError};

/// Capacity of the store
pub const MAX_KNOWN_NETWORKS: usize = 5;

#[derive(Debug, Default)]
pub(crate) struct ProfileStore {
    slots: [Option<NetworkProfile>; MAX_KNOWN_NETWORKS],
}

impl ProfileStore {
    /// Validate and insert, returning the slot index.
    pub fn add(&mut self, mut profile: NetworkProfile) -> Result<usize, WifiError> {
        profile.seal_specificity();
        profile.validate()?;
        if self.index_of(&profile.name).is_some() {
            return Err(WifiError::NameTaken);
        }
        let slot = self
            .slots
            .iter()
            .position(Option::is_none)
            .ok_or(WifiError::NoMem)?;
        debug!("profile '{}' added in slot {slot}", profile.name);
        self.slots[slot] = Some(profile);
        Ok(slot)
    }

    /// Remove by name, returning the freed slot index.
    pub fn remove(&mut self, name: &str) -> Result<usize, WifiError> {
        let slot = self.index_of(name).ok_or(WifiError::NotFound)?;
        self.slots[slot] = None;
        debug!("profile '{name}' removed from slot {slot}");
        Ok(slot)
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.slots.iter().position(|s| {
            s.as_ref()
                .is_some_and(|p| p.name.as_bytes() == name.as_bytes())
        })
    }

    pub fn get(&self, index: usize) -> Option<&NetworkProfile> {
        self.slots.get(index).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut NetworkProfile> {
        self.slots.get_mut(index).and_then(Option::as_mut)
    }

    /// Clone a slot with learned fields scrubbed, as handed to callers.
    pub fn copy_out(&self, index: usize) -> Option<NetworkProfile> {
        self.get(index).map(|p| {
            let mut copy = p.clone();
            copy.scrub_learned();
            copy
        })
    }

    pub fn count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    /// Nth occupied slot in index order, for `get_network_by_index`.
    pub fn nth(&self, n: usize) -> Option<usize> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.is_some())
            .map(|(i, _)| i)
            .nth(n)
    }

    /// Serialize the occupied slots (scrubbed) as a JSON array.
    pub fn export_json(&self) -> Result<String, WifiError> {
        let profiles: Vec<NetworkProfile> = (0..MAX_KNOWN_NETWORKS)
            .filter_map(|i| self.copy_out(i))
            .collect();
        serde_json::to_string(&profiles).map_err(|_| WifiError::Fail("profile serialization"))
    }

    /// Add every profile from a JSON array; stops at the first failure and
    /// returns how many were added.
    pub fn import_json(&mut self, json: &str) -> Result<usize, WifiError> {
        let profiles: Vec<NetworkProfile> =
            serde_json::from_str(json).map_err(|_| WifiError::Invalid("profile JSON"))?;
        let mut added = 0;
        for profile in profiles {
            self.add(profile)?;
            added += 1;
        }
        Ok(added)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wifimgr_core_lib::{Role, SecurityKind, Ssid};

    fn profile(name: &str) -> NetworkProfile {
        let mut p = NetworkProfile::new(name, Role::Sta);
        p.ssid = Ssid::from_slice(name.as_bytes());
        p.security.kind = SecurityKind::None;
        p
    }

    #[test]
    fn test_add_then_get_matches_input() {
        let mut store = ProfileStore::default();
        let idx = store.add(profile("home")).unwrap();
        let out = store.copy_out(idx).unwrap();
        assert_eq!(out.name, "home");
        assert_eq!(out.ssid.as_slice(), b"home");
        assert_eq!(store.count(), 1);
    }

    #[test]
    fn test_add_remove_restores_store() {
        let mut store = ProfileStore::default();
        store.add(profile("a")).unwrap();
        let before = store.count();
        store.add(profile("b")).unwrap();
        store.remove("b").unwrap();
        assert_eq!(store.count(), before);
        assert!(store.index_of("b").is_none());
    }

    #[test]
    fn test_names_are_unique() {
        let mut store = ProfileStore::default();
        store.add(profile("dup")).unwrap();
        assert_eq!(store.add(profile("dup")), Err(WifiError::NameTaken));
        // case-sensitive, exact-length compare
        assert!(store.add(profile("Dup")).is_ok());
        assert!(store.add(profile("dup2")).is_ok());
    }

    #[test]
    fn test_capacity_is_five() {
        let mut store = ProfileStore::default();
        for i in 0..MAX_KNOWN_NETWORKS {
            store.add(profile(&format!("net{i}"))).unwrap();
        }
        assert_eq!(store.add(profile("net5")), Err(WifiError::NoMem));
    }

    #[test]
    fn test_slot_indices_stable_across_removal() {
        let mut store = ProfileStore::default();
        let a = store.add(profile("a")).unwrap();
        let b = store.add(profile("b")).unwrap();
        let c = store.add(profile("c")).unwrap();
        store.remove("b").unwrap();
        assert_eq!(store.get(a).unwrap().name, "a");
        assert_eq!(store.get(c).unwrap().name, "c");
        // freed slot is reused
        assert_eq!(store.add(profile("d")).unwrap(), b);
    }

    #[test]
    fn test_json_round_trip() {
        let mut store = ProfileStore::default();
        store.add(profile("one")).unwrap();
        store.add(profile("two")).unwrap();
        let json = store.export_json().unwrap();

        let mut restored = ProfileStore::default();
        assert_eq!(restored.import_json(&json).unwrap(), 2);
        assert_eq!(restored.count(), 2);
        assert!(restored.index_of("one").is_some());
    }
}
