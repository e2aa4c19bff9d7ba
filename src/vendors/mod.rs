//! Vendor Extension System for Manufacturer-Specific M-Bus Data
//!
//! EN 13757-3 leaves two places to the manufacturer: records whose VIF is
//! 0x7F/0xFF, and the data block after DIF 0x0F/0x1F. The standard decoder
//! can only hand those out as raw bytes. A [`VendorExtension`] registered for
//! a manufacturer code gets the first chance to decode them.
//!
//! Each hook returns `Option<T>`:
//! - `Some(value)` = use the vendor decoding
//! - `None` = fall back to the standard handling

pub mod manufacturer;

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::MBusError;
use crate::payload::data::ReadingValue;
use crate::payload::record::MBusDataRecord;
use crate::payload::vif::{Quantity, Unit};

/// Value produced by a vendor hook.
#[derive(Debug, Clone, PartialEq)]
pub struct VendorValue {
    pub quantity: Quantity,
    pub unit: Unit,
    pub value: ReadingValue,
}

/// Trait for vendor-specific extensions
pub trait VendorExtension: Send + Sync {
    /// Hook 1: decode a record whose VIF is manufacturer specific (0x7F/0xFF).
    fn parse_vif_manufacturer_specific(
        &self,
        _manufacturer_id: &str,
        _record: &MBusDataRecord,
    ) -> Result<Option<VendorValue>, MBusError> {
        Ok(None)
    }

    /// Hook 2: decode the manufacturer data block after DIF 0x0F/0x1F.
    fn handle_dif_manufacturer_block(
        &self,
        _manufacturer_id: &str,
        _more_records_follow: bool,
        _data: &[u8],
    ) -> Result<Option<Vec<VendorValue>>, MBusError> {
        Ok(None)
    }
}

/// Registry for vendor extensions, keyed by three-letter manufacturer code.
///
/// Cloning is cheap; clones share the same map.
#[derive(Default, Clone)]
pub struct VendorRegistry {
    inner: Arc<RwLock<HashMap<String, Arc<dyn VendorExtension>>>>,
}

impl std::fmt::Debug for VendorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VendorRegistry")
            .field("manufacturers", &self.registered_manufacturers())
            .finish()
    }
}

impl VendorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Arc<dyn VendorExtension>>> {
        self.inner.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Arc<dyn VendorExtension>>> {
        self.inner.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Registers an extension; fails if the manufacturer already has one.
    pub fn register(
        &self,
        manufacturer_id: &str,
        extension: Arc<dyn VendorExtension>,
    ) -> Result<(), MBusError> {
        let key = manufacturer_id.to_uppercase();
        let mut inner = self.write();
        if inner.contains_key(&key) {
            return Err(MBusError::RegistryError(format!(
                "vendor extension already registered for manufacturer {key}"
            )));
        }
        inner.insert(key, extension);
        Ok(())
    }

    pub fn unregister(&self, manufacturer_id: &str) -> Result<(), MBusError> {
        let key = manufacturer_id.to_uppercase();
        match self.write().remove(&key) {
            Some(_) => Ok(()),
            None => Err(MBusError::RegistryError(format!(
                "no vendor extension registered for manufacturer {key}"
            ))),
        }
    }

    pub fn get(&self, manufacturer_id: &str) -> Option<Arc<dyn VendorExtension>> {
        self.read().get(&manufacturer_id.to_uppercase()).cloned()
    }

    pub fn has_extension(&self, manufacturer_id: &str) -> bool {
        self.read().contains_key(&manufacturer_id.to_uppercase())
    }

    pub fn registered_manufacturers(&self) -> Vec<String> {
        let mut codes: Vec<String> = self.read().keys().cloned().collect();
        codes.sort();
        codes
    }
}

/// Dispatch helper for the VIF hook
pub fn dispatch_vif_hook(
    registry: &VendorRegistry,
    manufacturer_id: &str,
    record: &MBusDataRecord,
) -> Result<Option<VendorValue>, MBusError> {
    match registry.get(manufacturer_id) {
        Some(extension) => extension.parse_vif_manufacturer_specific(manufacturer_id, record),
        None => Ok(None),
    }
}

/// Dispatch helper for the manufacturer data block hook
pub fn dispatch_dif_hook(
    registry: &VendorRegistry,
    manufacturer_id: &str,
    more_records_follow: bool,
    data: &[u8],
) -> Result<Option<Vec<VendorValue>>, MBusError> {
    match registry.get(manufacturer_id) {
        Some(extension) => {
            extension.handle_dif_manufacturer_block(manufacturer_id, more_records_follow, data)
        }
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct BlockCounter;

    impl VendorExtension for BlockCounter {
        fn handle_dif_manufacturer_block(
            &self,
            _manufacturer_id: &str,
            _more_records_follow: bool,
            data: &[u8],
        ) -> Result<Option<Vec<VendorValue>>, MBusError> {
            Ok(Some(vec![VendorValue {
                quantity: Quantity::ManufacturerSpecific,
                unit: Unit::None,
                value: ReadingValue::Numeric(data.len() as f64),
            }]))
        }
    }

    #[test]
    fn test_vendor_registry() {
        let registry = VendorRegistry::new();
        let extension = Arc::new(BlockCounter);

        assert!(registry.register("TST", extension.clone()).is_ok());
        assert!(registry.has_extension("TST"));
        assert!(registry.has_extension("tst"));
        assert!(registry.register("tst", extension).is_err());
        assert_eq!(registry.registered_manufacturers(), vec!["TST".to_string()]);

        assert!(registry.unregister("TST").is_ok());
        assert!(!registry.has_extension("TST"));
        assert!(registry.unregister("TST").is_err());
    }

    #[test]
    fn test_dispatch_hooks() {
        let registry = VendorRegistry::new();
        registry.register("TST", Arc::new(BlockCounter)).unwrap();

        let values = dispatch_dif_hook(&registry, "TST", false, &[1, 2, 3]).unwrap().unwrap();
        assert_eq!(values[0].value, ReadingValue::Numeric(3.0));

        assert!(dispatch_dif_hook(&registry, "UNK", false, &[1]).unwrap().is_none());
    }

    #[test]
    fn test_clones_share_extensions() {
        let registry = VendorRegistry::new();
        let clone = registry.clone();
        registry.register("TST", Arc::new(BlockCounter)).unwrap();
        assert!(clone.has_extension("TST"));
    }
}
