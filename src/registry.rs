//! # Device Registry
//!
//! Read-mostly table of the meters known to a gateway, keyed by name. It is
//! populated at startup (in code or from a JSON document) and consulted by
//! [`MBusMaster`](crate::mbus::mbus_protocol::MBusMaster) to resolve names and
//! label readouts. Clones share one table, so several masters on independent
//! buses can use the same registry.
//!
//! ```json
//! {
//!   "devices": [
//!     { "name": "heat-1", "address": { "primary": 5 } },
//!     { "name": "water-3", "address": { "secondary": "12345678FFFFFFFF" }, "description": "cellar" }
//!   ]
//! }
//! ```

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use log::info;
use serde::{Deserialize, Serialize};

use crate::error::MBusError;
use crate::mbus::address::DeviceAddress;

/// One configured meter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceEntry {
    pub name: String,
    pub address: DeviceAddress,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl DeviceEntry {
    pub fn new(name: impl Into<String>, address: DeviceAddress) -> Self {
        DeviceEntry {
            name: name.into(),
            address,
            description: None,
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RegistryDocument {
    devices: Vec<DeviceEntry>,
}

/// Shared device table.
#[derive(Debug, Clone, Default)]
pub struct DeviceRegistry {
    inner: Arc<RwLock<HashMap<String, DeviceEntry>>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, DeviceEntry>> {
        self.inner.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, DeviceEntry>> {
        self.inner.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Adds or replaces an entry, returning the previous one of that name.
    pub fn insert(&self, entry: DeviceEntry) -> Option<DeviceEntry> {
        self.write().insert(entry.name.clone(), entry)
    }

    pub fn remove(&self, name: &str) -> Option<DeviceEntry> {
        self.write().remove(name)
    }

    pub fn get(&self, name: &str) -> Result<DeviceEntry, MBusError> {
        self.read()
            .get(name)
            .cloned()
            .ok_or_else(|| MBusError::DeviceNotFound(name.to_string()))
    }

    /// Finds the entry configured with exactly this address.
    pub fn lookup(&self, address: &DeviceAddress) -> Result<DeviceEntry, MBusError> {
        self.read()
            .values()
            .find(|entry| entry.address == *address)
            .cloned()
            .ok_or_else(|| MBusError::DeviceNotFound(address.to_string()))
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Entry names in sorted order.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Builds a registry from a JSON document. Duplicate names are rejected.
    pub fn from_json_str(json: &str) -> Result<Self, MBusError> {
        let document: RegistryDocument = serde_json::from_str(json)?;
        let registry = DeviceRegistry::new();
        for entry in document.devices {
            let name = entry.name.clone();
            if registry.insert(entry).is_some() {
                return Err(MBusError::RegistryError(format!("duplicate device name {name}")));
            }
        }
        Ok(registry)
    }

    pub fn load_json_file(path: impl AsRef<Path>) -> Result<Self, MBusError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| MBusError::RegistryError(format!("{}: {e}", path.display())))?;
        let registry = Self::from_json_str(&json)?;
        info!("Loaded {} device(s) from {}", registry.len(), path.display());
        Ok(registry)
    }

    /// Serializes the table with entries sorted by name.
    pub fn to_json_string(&self) -> Result<String, MBusError> {
        let mut devices: Vec<DeviceEntry> = self.read().values().cloned().collect();
        devices.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(serde_json::to_string_pretty(&RegistryDocument { devices })?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOCUMENT: &str = r#"{
        "devices": [
            { "name": "heat-1", "address": { "primary": 5 } },
            { "name": "water-3", "address": { "secondary": "12345678FFFFFFFF" }, "description": "cellar" }
        ]
    }"#;

    #[test]
    fn test_from_json_and_lookup() {
        let registry = DeviceRegistry::from_json_str(DOCUMENT).unwrap();
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.names(), vec!["heat-1", "water-3"]);

        let entry = registry.lookup(&DeviceAddress::Primary(5)).unwrap();
        assert_eq!(entry.name, "heat-1");

        let mask = "12345678FFFFFFFF".parse().unwrap();
        let entry = registry.lookup(&DeviceAddress::Secondary(mask)).unwrap();
        assert_eq!(entry.description.as_deref(), Some("cellar"));

        assert!(matches!(
            registry.lookup(&DeviceAddress::Primary(6)),
            Err(MBusError::DeviceNotFound(_))
        ));
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let json = r#"{"devices": [
            { "name": "a", "address": { "primary": 1 } },
            { "name": "a", "address": { "primary": 2 } }
        ]}"#;
        assert!(matches!(
            DeviceRegistry::from_json_str(json),
            Err(MBusError::RegistryError(_))
        ));
    }

    #[test]
    fn test_invalid_documents() {
        assert!(DeviceRegistry::from_json_str("not json").is_err());
        let bad_mask = r#"{"devices": [{ "name": "a", "address": { "secondary": "XYZ" } }]}"#;
        assert!(DeviceRegistry::from_json_str(bad_mask).is_err());
    }

    #[test]
    fn test_clones_share_entries() {
        let registry = DeviceRegistry::new();
        let shared = registry.clone();
        assert!(registry.insert(DeviceEntry::new("m", DeviceAddress::Primary(9))).is_none());
        assert!(shared.get("m").is_ok());
        assert!(shared.remove("m").is_some());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_json_round_trip_through_file() {
        let registry = DeviceRegistry::from_json_str(DOCUMENT).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("devices.json");
        std::fs::write(&path, registry.to_json_string().unwrap()).unwrap();

        let loaded = DeviceRegistry::load_json_file(&path).unwrap();
        assert_eq!(loaded.names(), registry.names());
        assert_eq!(loaded.get("water-3").unwrap(), registry.get("water-3").unwrap());
    }

    #[test]
    fn test_missing_file() {
        let err = DeviceRegistry::load_json_file("/nonexistent/devices.json").unwrap_err();
        assert!(matches!(err, MBusError::RegistryError(_)));
    }
}
