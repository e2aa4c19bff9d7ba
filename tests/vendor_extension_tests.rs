//! Vendor extension hooks seen through the record decoder and the master.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use mbus_master::mbus::frame::MBusFrame;
use mbus_master::mbus::serial_mock::{MockChannel, MockReply};
use mbus_master::payload::telegram::parse_telegram;
use mbus_master::payload::{MBusDataRecord, Quantity, Telegram, Unit};
use mbus_master::vendors::manufacturer::manufacturer_to_id;
use mbus_master::{
    DataRecordDecoder, EngineConfig, MBusError, MBusMaster, ReadingValue, VendorExtension,
    VendorRegistry, VendorValue,
};

/// Reads the manufacturer specific VIF 0x7F as half-degrees and the trailing
/// block as a little-endian error counter.
#[derive(Default)]
struct KamstrupExtension {
    blocks_seen: AtomicUsize,
}

impl VendorExtension for KamstrupExtension {
    fn parse_vif_manufacturer_specific(
        &self,
        manufacturer_id: &str,
        record: &MBusDataRecord,
    ) -> Result<Option<VendorValue>, MBusError> {
        assert_eq!(manufacturer_id, "KAM");
        let [lo, hi] = record.data[..] else {
            return Ok(None);
        };
        Ok(Some(VendorValue {
            quantity: Quantity::Temperature,
            unit: Unit::Celsius,
            value: ReadingValue::Numeric(f64::from(u16::from_le_bytes([lo, hi])) * 0.5),
        }))
    }

    fn handle_dif_manufacturer_block(
        &self,
        _manufacturer_id: &str,
        more_records_follow: bool,
        data: &[u8],
    ) -> Result<Option<Vec<VendorValue>>, MBusError> {
        self.blocks_seen.fetch_add(1, Ordering::SeqCst);
        assert!(!more_records_follow);
        if data.len() < 2 {
            return Err(MBusError::MalformedRecord {
                offset: 0,
                reason: "counter needs two bytes".into(),
            });
        }
        Ok(Some(vec![VendorValue {
            quantity: Quantity::ErrorFlags,
            unit: Unit::None,
            value: ReadingValue::Numeric(f64::from(u16::from_le_bytes([data[0], data[1]]))),
        }]))
    }
}

fn variable_payload(manufacturer: &str, records: &[u8]) -> Vec<u8> {
    let mut payload = vec![0x21, 0x43, 0x65, 0x87];
    payload.extend_from_slice(&manufacturer_to_id(manufacturer).unwrap().to_le_bytes());
    payload.extend_from_slice(&[0x01, 0x04, 0x00, 0x00, 0x00, 0x00]);
    payload.extend_from_slice(records);
    payload
}

fn telegram(manufacturer: &str, records: &[u8]) -> Telegram {
    parse_telegram(0x72, &variable_payload(manufacturer, records)).unwrap()
}

// Energy 100 Wh, manufacturer specific VIF 0x7F with 0x0032, then a block.
const RECORDS: [u8; 12] = [0x02, 0x03, 0x64, 0x00, 0x02, 0x7F, 0x32, 0x00, 0x0F, 0x05, 0x00, 0xAA];

fn registry_with_kamstrup() -> (VendorRegistry, Arc<KamstrupExtension>) {
    let registry = VendorRegistry::new();
    let extension = Arc::new(KamstrupExtension::default());
    registry.register("kam", extension.clone()).unwrap();
    (registry, extension)
}

#[test]
fn test_without_extension_values_stay_raw() {
    let readings = DataRecordDecoder::new().decode_telegram(&telegram("KAM", &RECORDS));
    assert_eq!(readings.len(), 3);

    assert_eq!(readings[0].value, ReadingValue::Numeric(100.0));
    assert_eq!(readings[1].quantity, Quantity::ManufacturerSpecific);
    assert_eq!(readings[1].value, ReadingValue::Numeric(50.0));
    assert_eq!(readings[2].value, ReadingValue::Bytes(vec![0x05, 0x00, 0xAA]));
}

#[test]
fn test_extension_decodes_both_hooks() {
    let (registry, extension) = registry_with_kamstrup();
    let readings = DataRecordDecoder::with_vendors(&registry).decode_telegram(&telegram("KAM", &RECORDS));
    assert_eq!(readings.len(), 3);

    assert_eq!(readings[0].quantity, Quantity::Energy);
    assert_eq!(readings[1].quantity, Quantity::Temperature);
    assert_eq!(readings[1].unit, Unit::Celsius);
    assert_eq!(readings[1].value, ReadingValue::Numeric(25.0));
    assert_eq!(readings[1].identification, Some(87_654_321));

    assert_eq!(readings[2].quantity, Quantity::ErrorFlags);
    assert_eq!(readings[2].value, ReadingValue::Numeric(5.0));
    assert_eq!(extension.blocks_seen.load(Ordering::SeqCst), 1);
}

#[test]
fn test_other_manufacturers_are_untouched() {
    let (registry, extension) = registry_with_kamstrup();
    let decoder = DataRecordDecoder::with_vendors(&registry);
    let readings = decoder.decode_telegram(&telegram("LSE", &RECORDS));

    assert_eq!(readings[1].quantity, Quantity::ManufacturerSpecific);
    assert!(matches!(readings[2].value, ReadingValue::Bytes(_)));
    assert_eq!(extension.blocks_seen.load(Ordering::SeqCst), 0);
}

#[test]
fn test_failing_extension_falls_back_to_bytes() {
    let (registry, extension) = registry_with_kamstrup();
    let records = [0x02, 0x03, 0x64, 0x00, 0x0F, 0x01];
    let readings = DataRecordDecoder::with_vendors(&registry).decode_telegram(&telegram("KAM", &records));

    assert_eq!(readings.len(), 2);
    assert_eq!(readings[1].value, ReadingValue::Bytes(vec![0x01]));
    assert_eq!(extension.blocks_seen.load(Ordering::SeqCst), 1);
}

#[test]
fn test_registry_is_case_insensitive_and_unique() {
    let (registry, _) = registry_with_kamstrup();
    assert!(registry.has_extension("KAM"));
    assert!(registry.get("Kam").is_some());
    assert_eq!(registry.registered_manufacturers(), vec!["KAM"]);

    let again = registry.register("KAM", Arc::new(KamstrupExtension::default()));
    assert!(matches!(again, Err(MBusError::RegistryError(_))));

    registry.unregister("kam").unwrap();
    assert!(!registry.has_extension("KAM"));
    assert!(registry.unregister("KAM").is_err());
}

#[tokio::test]
async fn test_master_readout_uses_extensions() {
    let (registry, _) = registry_with_kamstrup();
    let mock = MockChannel::new();
    mock.queue_reply(MockReply::frame(&MBusFrame::Long {
        control: 0x08,
        address: 9,
        control_information: 0x72,
        data: variable_payload("KAM", &RECORDS),
    }));

    let config = EngineConfig {
        timeout: Duration::from_millis(20),
        ..EngineConfig::default()
    };
    let master = MBusMaster::with_config(mock.clone(), config)
        .unwrap()
        .with_vendors(&registry);
    let readout = master.read_device(&mbus_master::DeviceAddress::Primary(9)).await.unwrap();

    assert!(readout.name.is_none());
    assert_eq!(readout.manufacturer.as_deref(), Some("Kamstrup"));
    assert_eq!(readout.readings.len(), 3);
    assert_eq!(readout.readings[1].value, ReadingValue::Numeric(25.0));
    assert_eq!(readout.readings[2].quantity, Quantity::ErrorFlags);
}
