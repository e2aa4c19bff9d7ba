//! Primary and Secondary Addressing for M-Bus (EN 13757-2 Section 5.3)
//!
//! Primary addresses are the one-byte link layer address. Secondary
//! addresses identify a slave by its identification number, manufacturer,
//! version and medium, and are used through a selection frame followed by
//! requests to the network layer address 253.
//!
//! The string form of a secondary address is 16 hex digits,
//! `IIIIIIIIMMMMVVDD`: the identification number as 8 decimal digits, the
//! two manufacturer bytes in wire order, the version and the medium. In a
//! selection mask any identification digit may be `F`, and `FFFF`/`FF`
//! match any manufacturer, version or medium.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::constants::*;
use crate::error::MBusError;
use crate::payload::data_encoding::{decode_bcd, decode_manufacturer, encode_bcd};

/// Classification of a primary address byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimaryAddress {
    /// 0, factory default of a slave that has not been configured.
    Unconfigured,
    /// 1..=250.
    Configured(u8),
    /// 251 and 252.
    Reserved(u8),
    /// 253, the slave selected by secondary address.
    NetworkLayer,
    /// 254, every slave answers.
    BroadcastWithReply,
    /// 255, no slave answers.
    BroadcastNoReply,
}

impl From<u8> for PrimaryAddress {
    fn from(address: u8) -> Self {
        match address {
            MBUS_ADDRESS_UNCONFIGURED => PrimaryAddress::Unconfigured,
            1..=MBUS_ADDRESS_MAX_PRIMARY => PrimaryAddress::Configured(address),
            MBUS_ADDRESS_NETWORK_LAYER => PrimaryAddress::NetworkLayer,
            MBUS_ADDRESS_BROADCAST_REPLY => PrimaryAddress::BroadcastWithReply,
            MBUS_ADDRESS_BROADCAST_NOREPLY => PrimaryAddress::BroadcastNoReply,
            reserved => PrimaryAddress::Reserved(reserved),
        }
    }
}

impl From<PrimaryAddress> for u8 {
    fn from(address: PrimaryAddress) -> Self {
        match address {
            PrimaryAddress::Unconfigured => MBUS_ADDRESS_UNCONFIGURED,
            PrimaryAddress::Configured(a) | PrimaryAddress::Reserved(a) => a,
            PrimaryAddress::NetworkLayer => MBUS_ADDRESS_NETWORK_LAYER,
            PrimaryAddress::BroadcastWithReply => MBUS_ADDRESS_BROADCAST_REPLY,
            PrimaryAddress::BroadcastNoReply => MBUS_ADDRESS_BROADCAST_NOREPLY,
        }
    }
}

impl PrimaryAddress {
    /// True for addresses a single slave can own (0..=250).
    pub fn is_device(&self) -> bool {
        matches!(self, PrimaryAddress::Unconfigured | PrimaryAddress::Configured(_))
    }
}

/// Accepts 0..=250 as the target of a transaction.
pub fn validate_primary(address: u8) -> Result<u8, MBusError> {
    if PrimaryAddress::from(address).is_device() {
        Ok(address)
    } else {
        Err(MBusError::InvalidAddress(address))
    }
}

/// 8-byte secondary address as defined in EN 13757-2
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SecondaryAddress {
    /// Identification number, 8 decimal digits
    pub identification: u32,
    /// Manufacturer code (2 bytes, little-endian on the wire)
    pub manufacturer: u16,
    pub version: u8,
    pub medium: u8,
}

impl SecondaryAddress {
    pub fn new(identification: u32, manufacturer: u16, version: u8, medium: u8) -> Self {
        Self {
            identification,
            manufacturer,
            version,
            medium,
        }
    }

    /// Wire layout: BCD identification, manufacturer, version, medium.
    pub fn to_bytes(&self) -> [u8; 8] {
        let mut bytes = [0u8; 8];
        bytes[0..4].copy_from_slice(&encode_bcd(u64::from(self.identification), 4));
        bytes[4..6].copy_from_slice(&self.manufacturer.to_le_bytes());
        bytes[6] = self.version;
        bytes[7] = self.medium;
        bytes
    }

    /// Reads the first 8 bytes of a variable data header.
    pub fn from_bytes(data: &[u8]) -> Result<Self, MBusError> {
        let bytes: &[u8; 8] = data
            .get(..8)
            .and_then(|b| b.try_into().ok())
            .ok_or_else(|| MBusError::InvalidSecondaryAddress("requires 8 bytes".into()))?;
        let identification = decode_bcd(&bytes[0..4])
            .and_then(|id| u32::try_from(id).ok())
            .ok_or_else(|| {
                MBusError::InvalidSecondaryAddress(format!("identification {:02X?} is not BCD", &bytes[0..4]))
            })?;

        Ok(SecondaryAddress {
            identification,
            manufacturer: u16::from_le_bytes([bytes[4], bytes[5]]),
            version: bytes[6],
            medium: bytes[7],
        })
    }

    /// Three-letter manufacturer code.
    pub fn manufacturer_code(&self) -> String {
        decode_manufacturer(self.manufacturer)
    }

    /// Mask that selects exactly this device.
    pub fn to_mask(&self) -> SecondaryAddressMask {
        SecondaryAddressMask {
            bytes: self.to_bytes(),
        }
    }
}

impl fmt::Display for SecondaryAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [m0, m1] = self.manufacturer.to_le_bytes();
        write!(
            f,
            "{:08}{:02X}{:02X}{:02X}{:02X}",
            self.identification, m0, m1, self.version, self.medium
        )
    }
}

impl FromStr for SecondaryAddress {
    type Err = MBusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mask: SecondaryAddressMask = s.parse()?;
        if mask.has_wildcards() {
            return Err(MBusError::InvalidSecondaryAddress(format!(
                "{s} contains wildcards"
            )));
        }
        SecondaryAddress::from_bytes(&mask.bytes)
    }
}

/// Selection mask: a secondary address in which parts may be wildcards.
///
/// Stored in the 8-byte layout of the selection frame payload; a wildcard
/// identification digit is the nibble 0xF.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SecondaryAddressMask {
    bytes: [u8; 8],
}

impl SecondaryAddressMask {
    /// Payload of the selection frame (CI 0x52).
    pub fn to_bytes(&self) -> [u8; 8] {
        self.bytes
    }

    pub fn has_wildcards(&self) -> bool {
        let id_wildcard = self.bytes[0..4]
            .iter()
            .any(|b| b & 0x0F == 0x0F || b >> 4 == 0x0F);
        id_wildcard || self.bytes[4..6] == [0xFF, 0xFF] || self.bytes[6] == 0xFF || self.bytes[7] == 0xFF
    }

    /// True if the address is selected by this mask.
    pub fn matches(&self, address: &SecondaryAddress) -> bool {
        let candidate = address.to_bytes();

        let id_matches = self.bytes[0..4]
            .iter()
            .zip(&candidate[0..4])
            .all(|(m, c)| {
                (m & 0x0F == 0x0F || m & 0x0F == c & 0x0F) && (m >> 4 == 0x0F || m >> 4 == c >> 4)
            });
        let manufacturer_matches =
            self.bytes[4..6] == [0xFF, 0xFF] || self.bytes[4..6] == candidate[4..6];
        let version_matches = self.bytes[6] == 0xFF || self.bytes[6] == candidate[6];
        let medium_matches = self.bytes[7] == 0xFF || self.bytes[7] == candidate[7];

        id_matches && manufacturer_matches && version_matches && medium_matches
    }
}

impl From<SecondaryAddress> for SecondaryAddressMask {
    fn from(address: SecondaryAddress) -> Self {
        address.to_mask()
    }
}

impl FromStr for SecondaryAddressMask {
    type Err = MBusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| MBusError::InvalidSecondaryAddress(format!("{s}: {reason}"));

        if s.len() != 16 || !s.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(invalid("expected 16 hex digits"));
        }
        let digits: Vec<u8> = s
            .chars()
            .filter_map(|c| c.to_digit(16).map(|d| d as u8))
            .collect();

        let mut bytes = [0u8; 8];
        // identification: first character is the most significant digit, last byte on the wire
        for (i, pair) in digits[0..8].chunks(2).enumerate() {
            if pair.iter().any(|&d| d > 9 && d != 0x0F) {
                return Err(invalid("identification digits must be 0-9 or F"));
            }
            bytes[3 - i] = (pair[0] << 4) | pair[1];
        }
        for (i, pair) in digits[8..16].chunks(2).enumerate() {
            bytes[4 + i] = (pair[0] << 4) | pair[1];
        }

        Ok(SecondaryAddressMask { bytes })
    }
}

impl fmt::Display for SecondaryAddressMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in self.bytes[0..4].iter().rev() {
            write!(f, "{:02X}", b)?;
        }
        for b in &self.bytes[4..8] {
            write!(f, "{:02X}", b)?;
        }
        Ok(())
    }
}

impl TryFrom<String> for SecondaryAddressMask {
    type Error = MBusError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<SecondaryAddressMask> for String {
    fn from(mask: SecondaryAddressMask) -> Self {
        mask.to_string()
    }
}

/// How a transaction reaches a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceAddress {
    Primary(u8),
    Secondary(SecondaryAddressMask),
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceAddress::Primary(a) => write!(f, "{a}"),
            DeviceAddress::Secondary(mask) => write!(f, "{mask}"),
        }
    }
}

impl FromStr for DeviceAddress {
    type Err = MBusError;

    /// Decimal primary address or a 16-digit secondary address mask.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() == 16 {
            return Ok(DeviceAddress::Secondary(s.parse()?));
        }
        s.parse::<u8>()
            .map(DeviceAddress::Primary)
            .map_err(|_| MBusError::InvalidSecondaryAddress(format!("{s}: neither primary nor secondary address")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primary_classification() {
        assert_eq!(PrimaryAddress::from(0), PrimaryAddress::Unconfigured);
        assert_eq!(PrimaryAddress::from(250), PrimaryAddress::Configured(250));
        assert_eq!(PrimaryAddress::from(251), PrimaryAddress::Reserved(251));
        assert_eq!(PrimaryAddress::from(253), PrimaryAddress::NetworkLayer);
        assert_eq!(PrimaryAddress::from(254), PrimaryAddress::BroadcastWithReply);
        assert_eq!(PrimaryAddress::from(255), PrimaryAddress::BroadcastNoReply);
        for a in 0..=255u8 {
            assert_eq!(u8::from(PrimaryAddress::from(a)), a);
        }
    }

    #[test]
    fn test_validate_primary() {
        assert_eq!(validate_primary(0), Ok(0));
        assert_eq!(validate_primary(250), Ok(250));
        assert_eq!(validate_primary(251), Err(MBusError::InvalidAddress(251)));
        assert_eq!(validate_primary(253), Err(MBusError::InvalidAddress(253)));
    }

    #[test]
    fn test_secondary_address_bytes_and_string() {
        let header = [0x91, 0x64, 0x00, 0x08, 0x65, 0x32, 0x99, 0x06];
        let address = SecondaryAddress::from_bytes(&header).unwrap();
        assert_eq!(address.identification, 8_006_491);
        assert_eq!(address.manufacturer_code(), "LSE");
        assert_eq!(address.to_string(), "0800649165329906");
        assert_eq!(address.to_bytes(), header);
        assert_eq!("0800649165329906".parse::<SecondaryAddress>().unwrap(), address);
    }

    #[test]
    fn test_mask_encoding_matches_selection_layout() {
        let mask: SecondaryAddressMask = "14491001105701 06".replace(' ', "").parse().unwrap();
        assert_eq!(mask.to_bytes(), [0x01, 0x10, 0x49, 0x14, 0x10, 0x57, 0x01, 0x06]);
        assert_eq!(mask.to_string(), "1449100110570106");
        assert!(!mask.has_wildcards());
    }

    #[test]
    fn test_wildcard_matching() {
        let address = SecondaryAddress::new(8_006_491, 0x3265, 0x99, 0x06);
        let mask: SecondaryAddressMask = "08006FFFFFFFFFFF".parse().unwrap();
        assert!(mask.has_wildcards());
        assert!(mask.matches(&address));

        let mask: SecondaryAddressMask = "0800649165329907".parse().unwrap();
        assert!(!mask.matches(&address));

        let mask: SecondaryAddressMask = "FFFFFFF1FFFFFFFF".parse().unwrap();
        assert!(mask.matches(&address));
        let mask: SecondaryAddressMask = "FFFFFFF2FFFFFFFF".parse().unwrap();
        assert!(!mask.matches(&address));
    }

    #[test]
    fn test_invalid_masks() {
        assert!("0800".parse::<SecondaryAddressMask>().is_err());
        assert!("0800A49165329906".parse::<SecondaryAddressMask>().is_err());
        assert!("08006491653299ZZ".parse::<SecondaryAddressMask>().is_err());
        assert!("08006FFF65329906".parse::<SecondaryAddress>().is_err());
    }

    #[test]
    fn test_device_address_parsing_and_serde() {
        assert_eq!("5".parse::<DeviceAddress>().unwrap(), DeviceAddress::Primary(5));
        let secondary: DeviceAddress = "0800649165329906".parse().unwrap();
        assert!(matches!(secondary, DeviceAddress::Secondary(_)));

        let json = serde_json::to_string(&secondary).unwrap();
        assert_eq!(json, r#"{"secondary":"0800649165329906"}"#);
        let back: DeviceAddress = serde_json::from_str(&json).unwrap();
        assert_eq!(back, secondary);
        let primary: DeviceAddress = serde_json::from_str(r#"{"primary":7}"#).unwrap();
        assert_eq!(primary, DeviceAddress::Primary(7));
    }
}
