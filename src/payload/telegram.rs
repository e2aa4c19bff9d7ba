//! # M-Bus Telegram Parser
//!
//! Splits the payload of a long frame into a typed telegram body according
//! to its control information (CI) field:
//!
//! | CI | Body |
//! |---|---|
//! | 0x72 | variable data: 12-byte header, then data records |
//! | 0x73 | fixed data: 16-byte structure with two counters |
//! | 0x70 | application error, optional one-byte code |
//! | 0xA0..=0xB7 | manufacturer specific, kept opaque |
//!
//! Records are split but not value-decoded; see
//! [`crate::payload::data::DataRecordDecoder`] for that step.

use std::fmt;

use bitflags::bitflags;
use log::debug;
use serde::Serialize;

use crate::constants::*;
use crate::error::MBusError;
use crate::mbus::address::SecondaryAddress;
use crate::mbus::frame::MBusFrame;
use crate::payload::data_encoding::{decode_bcd, decode_manufacturer};
use crate::payload::record::{parse_data_record, MBusDataRecord};

/// Medium (device type) byte of the variable data header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Medium {
    Oil,
    Electricity,
    Gas,
    Heat,
    Steam,
    HotWater,
    Water,
    HeatCostAllocator,
    CompressedAir,
    CoolingLoadOutlet,
    CoolingLoadInlet,
    HeatInlet,
    HeatCoolingLoad,
    BusSystemComponent,
    UnknownMedium,
    HotWaterHighTemperature,
    ColdWater,
    DualRegisterWater,
    Pressure,
    AdConverter,
    /// 0x00 ("other") and every code without a variant.
    Other(u8),
}

impl From<u8> for Medium {
    fn from(code: u8) -> Self {
        match code {
            0x01 => Medium::Oil,
            0x02 => Medium::Electricity,
            0x03 => Medium::Gas,
            0x04 => Medium::Heat,
            0x05 => Medium::Steam,
            0x06 => Medium::HotWater,
            0x07 => Medium::Water,
            0x08 => Medium::HeatCostAllocator,
            0x09 => Medium::CompressedAir,
            0x0A => Medium::CoolingLoadOutlet,
            0x0B => Medium::CoolingLoadInlet,
            0x0C => Medium::HeatInlet,
            0x0D => Medium::HeatCoolingLoad,
            0x0E => Medium::BusSystemComponent,
            0x0F => Medium::UnknownMedium,
            0x15 => Medium::HotWaterHighTemperature,
            0x16 => Medium::ColdWater,
            0x17 => Medium::DualRegisterWater,
            0x18 => Medium::Pressure,
            0x19 => Medium::AdConverter,
            other => Medium::Other(other),
        }
    }
}

impl From<Medium> for u8 {
    fn from(medium: Medium) -> u8 {
        match medium {
            Medium::Oil => 0x01,
            Medium::Electricity => 0x02,
            Medium::Gas => 0x03,
            Medium::Heat => 0x04,
            Medium::Steam => 0x05,
            Medium::HotWater => 0x06,
            Medium::Water => 0x07,
            Medium::HeatCostAllocator => 0x08,
            Medium::CompressedAir => 0x09,
            Medium::CoolingLoadOutlet => 0x0A,
            Medium::CoolingLoadInlet => 0x0B,
            Medium::HeatInlet => 0x0C,
            Medium::HeatCoolingLoad => 0x0D,
            Medium::BusSystemComponent => 0x0E,
            Medium::UnknownMedium => 0x0F,
            Medium::HotWaterHighTemperature => 0x15,
            Medium::ColdWater => 0x16,
            Medium::DualRegisterWater => 0x17,
            Medium::Pressure => 0x18,
            Medium::AdConverter => 0x19,
            Medium::Other(code) => code,
        }
    }
}

impl Medium {
    /// Medium of a fixed data telegram, from the top two bits of both
    /// counter type bytes. Codes 0xA..=0xE are the "mode 2" variants of gas,
    /// heat, hot water, water and HCA.
    pub fn from_fixed(counter1_type: u8, counter2_type: u8) -> Self {
        let code = ((counter1_type & 0xC0) >> 6) | ((counter2_type & 0xC0) >> 4);
        match code {
            0x0..=0x8 => Medium::from(code),
            0xA => Medium::Gas,
            0xB => Medium::Heat,
            0xC => Medium::HotWater,
            0xD => Medium::Water,
            0xE => Medium::HeatCostAllocator,
            other => Medium::Other(other),
        }
    }
}

impl fmt::Display for Medium {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Medium::Oil => "Oil",
            Medium::Electricity => "Electricity",
            Medium::Gas => "Gas",
            Medium::Heat => "Heat: Outlet",
            Medium::Steam => "Steam",
            Medium::HotWater => "Warm water (30C-90C)",
            Medium::Water => "Water",
            Medium::HeatCostAllocator => "Heat Cost Allocator",
            Medium::CompressedAir => "Compressed Air",
            Medium::CoolingLoadOutlet => "Cooling load meter: Outlet",
            Medium::CoolingLoadInlet => "Cooling load meter: Inlet",
            Medium::HeatInlet => "Heat: Inlet",
            Medium::HeatCoolingLoad => "Heat / Cooling load meter",
            Medium::BusSystemComponent => "Bus/System",
            Medium::UnknownMedium => "Unknown Medium",
            Medium::HotWaterHighTemperature => "Hot water (>=90C)",
            Medium::ColdWater => "Cold water",
            Medium::DualRegisterWater => "Dual register (hot/cold) water",
            Medium::Pressure => "Pressure",
            Medium::AdConverter => "A/D Converter",
            Medium::Other(0x00) => "Other",
            Medium::Other(code) => return write!(f, "Reserved (0x{code:02X})"),
        };
        f.write_str(name)
    }
}

bitflags! {
    /// Status byte of the variable data header.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct StatusFlags: u8 {
        const APPLICATION_BUSY = 0x01;
        const APPLICATION_ERROR = 0x02;
        const POWER_LOW = 0x04;
        const PERMANENT_ERROR = 0x08;
        const TEMPORARY_ERROR = 0x10;
        const MANUFACTURER_1 = 0x20;
        const MANUFACTURER_2 = 0x40;
        const MANUFACTURER_3 = 0x80;
    }
}

impl StatusFlags {
    /// Both application status bits set.
    pub fn is_abnormal(&self) -> bool {
        self.contains(StatusFlags::APPLICATION_BUSY | StatusFlags::APPLICATION_ERROR)
    }
}

/// Fixed header of a variable data telegram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelegramHeader {
    pub id_bcd: [u8; 4],
    pub manufacturer: u16,
    pub version: u8,
    pub medium: Medium,
    pub access_number: u8,
    pub status: StatusFlags,
    pub signature: u16,
}

impl TelegramHeader {
    fn parse(bytes: &[u8; MBUS_DATA_VARIABLE_HEADER_LENGTH]) -> Self {
        TelegramHeader {
            id_bcd: [bytes[0], bytes[1], bytes[2], bytes[3]],
            manufacturer: u16::from_le_bytes([bytes[4], bytes[5]]),
            version: bytes[6],
            medium: Medium::from(bytes[7]),
            access_number: bytes[8],
            status: StatusFlags::from_bits_retain(bytes[9]),
            signature: u16::from_le_bytes([bytes[10], bytes[11]]),
        }
    }

    /// Identification number, `None` if the BCD digits are not decimal.
    pub fn identification(&self) -> Option<u32> {
        decode_bcd(&self.id_bcd).and_then(|id| u32::try_from(id).ok())
    }

    pub fn manufacturer_code(&self) -> String {
        decode_manufacturer(self.manufacturer)
    }

    pub fn secondary_address(&self) -> Result<SecondaryAddress, MBusError> {
        let mut bytes = [0u8; 8];
        bytes[..4].copy_from_slice(&self.id_bcd);
        bytes[4..6].copy_from_slice(&self.manufacturer.to_le_bytes());
        bytes[6] = self.version;
        bytes[7] = u8::from(self.medium);
        SecondaryAddress::from_bytes(&bytes)
    }
}

/// Variable data body (CI 0x72).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariableDataTelegram {
    pub header: TelegramHeader,
    /// Records in wire order.
    pub records: Vec<MBusDataRecord>,
    /// Bytes after a DIF 0x0F / 0x1F, excluding that DIF.
    pub manufacturer_data: Option<Vec<u8>>,
    /// The record list ended with DIF 0x1F: the slave has another telegram.
    pub more_records_follow: bool,
}

/// Fixed data body (CI 0x73).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixedDataTelegram {
    pub id_bcd: [u8; 4],
    pub access_number: u8,
    pub status: u8,
    /// Counter type bytes: medium bits 6-7, unit code bits 0-5.
    pub counter_types: [u8; 2],
    pub counters: [[u8; 4]; 2],
}

impl FixedDataTelegram {
    fn parse(bytes: &[u8; MBUS_DATA_FIXED_LENGTH]) -> Self {
        FixedDataTelegram {
            id_bcd: [bytes[0], bytes[1], bytes[2], bytes[3]],
            access_number: bytes[4],
            status: bytes[5],
            counter_types: [bytes[6], bytes[7]],
            counters: [
                [bytes[8], bytes[9], bytes[10], bytes[11]],
                [bytes[12], bytes[13], bytes[14], bytes[15]],
            ],
        }
    }

    pub fn identification(&self) -> Option<u32> {
        decode_bcd(&self.id_bcd).and_then(|id| u32::try_from(id).ok())
    }

    pub fn medium(&self) -> Medium {
        Medium::from_fixed(self.counter_types[0], self.counter_types[1])
    }

    /// Counters are binary integers rather than BCD.
    pub fn is_binary(&self) -> bool {
        self.status & MBUS_DATA_FIXED_STATUS_FORMAT_MASK == MBUS_DATA_FIXED_STATUS_FORMAT_INT
    }

    /// Counters hold stored rather than actual values.
    pub fn is_stored(&self) -> bool {
        self.status & MBUS_DATA_FIXED_STATUS_DATE_MASK == MBUS_DATA_FIXED_STATUS_DATE_STORED
    }
}

/// Application error reported with CI 0x70.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplicationError {
    Unspecified,
    UnimplementedCi,
    BufferTooLong,
    TooManyRecords,
    PrematureEndOfRecord,
    TooManyDifes,
    TooManyVifes,
    Reserved,
    ApplicationBusy,
    TooManyReadouts,
    Other(u8),
}

impl From<u8> for ApplicationError {
    fn from(code: u8) -> Self {
        match code {
            0 => ApplicationError::Unspecified,
            1 => ApplicationError::UnimplementedCi,
            2 => ApplicationError::BufferTooLong,
            3 => ApplicationError::TooManyRecords,
            4 => ApplicationError::PrematureEndOfRecord,
            5 => ApplicationError::TooManyDifes,
            6 => ApplicationError::TooManyVifes,
            7 => ApplicationError::Reserved,
            8 => ApplicationError::ApplicationBusy,
            9 => ApplicationError::TooManyReadouts,
            other => ApplicationError::Other(other),
        }
    }
}

impl fmt::Display for ApplicationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApplicationError::Unspecified => f.write_str("Unspecified error"),
            ApplicationError::UnimplementedCi => f.write_str("Unimplemented CI-Field"),
            ApplicationError::BufferTooLong => f.write_str("Buffer too long, truncated"),
            ApplicationError::TooManyRecords => f.write_str("Record too long, truncated"),
            ApplicationError::PrematureEndOfRecord => f.write_str("Premature end of record"),
            ApplicationError::TooManyDifes => f.write_str("More than 10 DIFE's"),
            ApplicationError::TooManyVifes => f.write_str("More than 10 VIFE's"),
            ApplicationError::Reserved => f.write_str("Reserved"),
            ApplicationError::ApplicationBusy => f.write_str("Application too busy for handling readout request"),
            ApplicationError::TooManyReadouts => f.write_str("Too many readouts"),
            ApplicationError::Other(code) => write!(f, "Unknown error (0x{code:02X})"),
        }
    }
}

/// Telegram body, selected by the CI field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TelegramBody {
    Variable(VariableDataTelegram),
    Fixed(FixedDataTelegram),
    Error(Option<ApplicationError>),
    /// Vendor-proprietary or encrypted payload; left to the caller.
    ManufacturerSpecific(Vec<u8>),
}

/// A parsed telegram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Telegram {
    pub control_information: u8,
    pub body: TelegramBody,
}

impl Telegram {
    /// Parses the payload of a long frame, or the empty payload of a control frame.
    pub fn from_frame(frame: &MBusFrame) -> Result<Self, MBusError> {
        match frame {
            MBusFrame::Long {
                control_information,
                data,
                ..
            } => parse_telegram(*control_information, data),
            MBusFrame::Control {
                control_information,
                ..
            } => parse_telegram(*control_information, &[]),
            other => Err(MBusError::UnexpectedResponse(format!(
                "{:?} frame carries no telegram",
                other.frame_type()
            ))),
        }
    }

    pub fn header(&self) -> Option<&TelegramHeader> {
        match &self.body {
            TelegramBody::Variable(variable) => Some(&variable.header),
            _ => None,
        }
    }

    pub fn records(&self) -> &[MBusDataRecord] {
        match &self.body {
            TelegramBody::Variable(variable) => &variable.records,
            _ => &[],
        }
    }

    pub fn more_records_follow(&self) -> bool {
        matches!(&self.body, TelegramBody::Variable(v) if v.more_records_follow)
    }

    /// Identification number from whichever header the body has.
    pub fn identification(&self) -> Option<u32> {
        match &self.body {
            TelegramBody::Variable(variable) => variable.header.identification(),
            TelegramBody::Fixed(fixed) => fixed.identification(),
            _ => None,
        }
    }
}

/// Parses a telegram payload (everything after the CI field).
pub fn parse_telegram(control_information: u8, payload: &[u8]) -> Result<Telegram, MBusError> {
    let body = match control_information {
        MBUS_CONTROL_INFO_RESP_VARIABLE => TelegramBody::Variable(parse_variable_data(payload)?),
        MBUS_CONTROL_INFO_RESP_FIXED => {
            let bytes: &[u8; MBUS_DATA_FIXED_LENGTH] = payload
                .get(..MBUS_DATA_FIXED_LENGTH)
                .and_then(|b| b.try_into().ok())
                .ok_or(MBusError::TruncatedTelegram {
                    needed: MBUS_DATA_FIXED_LENGTH,
                    available: payload.len(),
                })?;
            TelegramBody::Fixed(FixedDataTelegram::parse(bytes))
        }
        MBUS_CONTROL_INFO_ERROR_GENERAL => {
            TelegramBody::Error(payload.first().copied().map(ApplicationError::from))
        }
        MBUS_CONTROL_INFO_MANUFACTURER_FIRST..=MBUS_CONTROL_INFO_MANUFACTURER_LAST => {
            TelegramBody::ManufacturerSpecific(payload.to_vec())
        }
        other => return Err(MBusError::UnsupportedControlInformation(other)),
    };

    Ok(Telegram {
        control_information,
        body,
    })
}

fn parse_variable_data(payload: &[u8]) -> Result<VariableDataTelegram, MBusError> {
    let header_bytes: &[u8; MBUS_DATA_VARIABLE_HEADER_LENGTH] = payload
        .get(..MBUS_DATA_VARIABLE_HEADER_LENGTH)
        .and_then(|b| b.try_into().ok())
        .ok_or(MBusError::TruncatedTelegram {
            needed: MBUS_DATA_VARIABLE_HEADER_LENGTH,
            available: payload.len(),
        })?;
    let header = TelegramHeader::parse(header_bytes);

    let mut records = Vec::new();
    let mut manufacturer_data = None;
    let mut more_records_follow = false;
    let mut offset = MBUS_DATA_VARIABLE_HEADER_LENGTH;

    while let Some(&dif) = payload.get(offset) {
        match dif {
            MBUS_DIB_DIF_IDLE_FILLER => offset += 1,
            MBUS_DIB_DIF_MANUFACTURER_SPECIFIC | MBUS_DIB_DIF_MORE_RECORDS_FOLLOW => {
                more_records_follow = dif == MBUS_DIB_DIF_MORE_RECORDS_FOLLOW;
                manufacturer_data = Some(payload[offset + 1..].to_vec());
                break;
            }
            _ => {
                let (record, next) = parse_data_record(payload, offset)?;
                records.push(record);
                offset = next;
            }
        }
    }

    debug!(
        "Parsed variable data telegram from {}: {} records, more records follow: {}",
        header.manufacturer_code(),
        records.len(),
        more_records_follow
    );

    Ok(VariableDataTelegram {
        header,
        records,
        manufacturer_data,
        more_records_follow,
    })
}
