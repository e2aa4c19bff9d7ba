//! # M-Bus Data Record Decoder
//!
//! Turns split data records into [`Reading`]s: the DIF data field selects how
//! the data bytes are read (BCD, binary integer, real, variable length), the
//! value information block selects quantity, unit and scale, and the DIF/DIFE
//! chain supplies storage number, tariff, subunit and function.
//!
//! Decoding never fails. A record with an unknown VIF becomes a reading with
//! quantity [`Quantity::Unknown`] carrying the raw bytes; sentinel fills and
//! impossible dates become [`ReadingValue::NoValue`].

use chrono::{NaiveDate, NaiveDateTime};
use log::{debug, warn};
use serde::Serialize;

use crate::constants::MBUS_DIB_VIF_MANUFACTURER_SPECIFIC;
use crate::payload::data_encoding::{
    decode_bcd, decode_date, decode_datetime, decode_int, decode_real, decode_string,
    is_filled_with,
};
use crate::payload::record::{DataField, Function, MBusDataRecord, VariableLength};
use crate::payload::telegram::{FixedDataTelegram, Telegram, TelegramBody, TelegramHeader};
use crate::payload::vif::{normalize_vib, NormalizedVib, Quantity, Unit, VifKind, VifModifier};
use crate::payload::vif_maps::lookup_fixed_unit;
use crate::vendors::{dispatch_dif_hook, dispatch_vif_hook, VendorRegistry, VendorValue};

/// Decoded value of a record.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ReadingValue {
    /// Raw value with exponent and corrections applied.
    Numeric(f64),
    Text(String),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
    /// Undecoded data of an unknown or manufacturer-specific coding.
    Bytes(Vec<u8>),
    /// The meter marked the field as not available.
    NoValue,
    /// The data could not be read in its declared coding.
    Invalid(String),
}

impl ReadingValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ReadingValue::Numeric(v) => Some(*v),
            _ => None,
        }
    }
}

/// One decoded measurement.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reading {
    pub quantity: Quantity,
    pub unit: Unit,
    pub value: ReadingValue,
    pub storage_number: u64,
    pub tariff: u32,
    pub subunit: u32,
    pub function: Function,
    /// Identification number of the telegram the record came from.
    pub identification: Option<u32>,
    /// Table-qualified VIF code (see [`crate::payload::vif::VifInfo::code`]).
    pub vif_code: u16,
    pub modifiers: Vec<VifModifier>,
}

/// Record decoder, optionally consulting vendor extensions.
#[derive(Debug, Clone, Default)]
pub struct DataRecordDecoder {
    vendors: Option<VendorRegistry>,
}

impl DataRecordDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_vendors(vendors: &VendorRegistry) -> Self {
        Self {
            vendors: Some(vendors.clone()),
        }
    }

    /// Decodes a record without telegram context.
    pub fn decode(&self, record: &MBusDataRecord) -> Reading {
        self.decode_record(record, None)
    }

    /// Decodes every record of a telegram in wire order. A manufacturer data
    /// block after the records yields one more reading (or the readings of a
    /// vendor extension).
    pub fn decode_telegram(&self, telegram: &Telegram) -> Vec<Reading> {
        match &telegram.body {
            TelegramBody::Variable(variable) => {
                let header = &variable.header;
                let mut readings: Vec<Reading> = variable
                    .records
                    .iter()
                    .map(|record| self.decode_record(record, Some(header)))
                    .collect();
                if let Some(data) = variable.manufacturer_data.as_ref().filter(|d| !d.is_empty()) {
                    readings.extend(self.decode_manufacturer_block(
                        header,
                        variable.more_records_follow,
                        data,
                    ));
                }
                readings
            }
            TelegramBody::Fixed(fixed) => self.decode_fixed(fixed),
            TelegramBody::Error(_) | TelegramBody::ManufacturerSpecific(_) => Vec::new(),
        }
    }

    fn decode_record(&self, record: &MBusDataRecord, header: Option<&TelegramHeader>) -> Reading {
        let dib = record.dib();
        let normalized = normalize_vib(record.vib());
        let identification = header.and_then(TelegramHeader::identification);

        let mut reading = Reading {
            quantity: normalized.quantity(),
            unit: normalized.unit(),
            value: ReadingValue::NoValue,
            storage_number: dib.storage_number(),
            tariff: dib.tariff(),
            subunit: dib.subunit(),
            function: dib.function(),
            identification,
            vif_code: normalized.code,
            modifiers: normalized.modifiers.clone(),
        };

        match &normalized.kind {
            VifKind::Unknown => {
                debug!(
                    "Unknown VIF code 0x{:04X} at offset {}, keeping raw data",
                    normalized.code, record.offset
                );
                reading.value = ReadingValue::Bytes(record.data.clone());
                return reading;
            }
            VifKind::ManufacturerSpecific => {
                if let Some(vendor) = self.vendor_vif_value(record, header) {
                    reading.quantity = vendor.quantity;
                    reading.unit = vendor.unit;
                    reading.value = vendor.value;
                    return reading;
                }
            }
            VifKind::Known(_) | VifKind::PlainText(_) => {}
        }

        reading.value = decode_value(record, &normalized);
        reading
    }

    fn vendor_vif_value(
        &self,
        record: &MBusDataRecord,
        header: Option<&TelegramHeader>,
    ) -> Option<VendorValue> {
        let vendors = self.vendors.as_ref()?;
        let manufacturer = header?.manufacturer_code();
        match dispatch_vif_hook(vendors, &manufacturer, record) {
            Ok(value) => value,
            Err(e) => {
                warn!("Vendor extension {manufacturer} failed on record at offset {}: {e}", record.offset);
                None
            }
        }
    }

    fn decode_manufacturer_block(
        &self,
        header: &TelegramHeader,
        more_records_follow: bool,
        data: &[u8],
    ) -> Vec<Reading> {
        let identification = header.identification();
        let reading = |quantity, unit, value| Reading {
            quantity,
            unit,
            value,
            storage_number: 0,
            tariff: 0,
            subunit: 0,
            function: Function::Instantaneous,
            identification,
            vif_code: u16::from(MBUS_DIB_VIF_MANUFACTURER_SPECIFIC),
            modifiers: Vec::new(),
        };

        if let Some(vendors) = &self.vendors {
            let manufacturer = header.manufacturer_code();
            match dispatch_dif_hook(vendors, &manufacturer, more_records_follow, data) {
                Ok(Some(values)) => {
                    return values
                        .into_iter()
                        .map(|v| reading(v.quantity, v.unit, v.value))
                        .collect();
                }
                Ok(None) => {}
                Err(e) => warn!("Vendor extension {manufacturer} failed on manufacturer data: {e}"),
            }
        }

        vec![reading(
            Quantity::ManufacturerSpecific,
            Unit::None,
            ReadingValue::Bytes(data.to_vec()),
        )]
    }

    /// Decodes the two counters of a fixed data telegram.
    pub fn decode_fixed(&self, fixed: &FixedDataTelegram) -> Vec<Reading> {
        let identification = fixed.identification();
        (0..2)
            .map(|i| {
                let unit_code = fixed.counter_types[i] & 0x3F;
                // 0x3E on counter 2: same unit as counter 1, historic value
                let historic = i == 1 && unit_code == 0x3E;
                let info = if historic {
                    lookup_fixed_unit(fixed.counter_types[0] & 0x3F)
                } else {
                    lookup_fixed_unit(unit_code)
                };
                let raw = &fixed.counters[i];

                let (quantity, unit, value) = match info {
                    Some(info) => {
                        let value = if fixed.is_binary() {
                            decode_integer(raw, i32::from(info.exponent))
                        } else {
                            decode_bcd_value(raw, i32::from(info.exponent), false)
                        };
                        (info.quantity, info.unit, value)
                    }
                    None => (Quantity::Unknown, Unit::None, ReadingValue::Bytes(raw.to_vec())),
                };

                Reading {
                    quantity,
                    unit,
                    value,
                    storage_number: u64::from(fixed.is_stored() || historic),
                    tariff: 0,
                    subunit: 0,
                    function: Function::Instantaneous,
                    identification,
                    vif_code: u16::from(unit_code),
                    modifiers: Vec::new(),
                }
            })
            .collect()
    }
}

fn scaled(raw: f64, exponent: i32) -> f64 {
    raw * 10f64.powi(exponent)
}

fn decode_integer(data: &[u8], exponent: i32) -> ReadingValue {
    if is_filled_with(data, 0xFF) {
        return ReadingValue::NoValue;
    }
    ReadingValue::Numeric(scaled(decode_int(data) as f64, exponent))
}

fn decode_bcd_value(data: &[u8], exponent: i32, negative: bool) -> ReadingValue {
    if is_filled_with(data, 0xFF) {
        return ReadingValue::NoValue;
    }
    match decode_bcd(data) {
        Some(v) => {
            let v = if negative { -v } else { v };
            ReadingValue::Numeric(scaled(v as f64, exponent))
        }
        None => ReadingValue::Invalid(format!("BCD {data:02X?} is not decimal or out of range")),
    }
}

fn decode_time_point(data: &[u8]) -> ReadingValue {
    match data.len() {
        2 => decode_date(data).map_or(ReadingValue::NoValue, ReadingValue::Date),
        4 | 6 => decode_datetime(data).map_or(ReadingValue::NoValue, ReadingValue::DateTime),
        n => ReadingValue::Invalid(format!("{n} bytes cannot hold a date")),
    }
}

fn decode_value(record: &MBusDataRecord, vib: &NormalizedVib) -> ReadingValue {
    let data = record.data.as_slice();
    let field = record.dib().data_field();
    let with_offset = |value: ReadingValue| match value {
        ReadingValue::Numeric(v) => ReadingValue::Numeric(v + vib.offset),
        other => other,
    };

    match field {
        DataField::NoData | DataField::SelectionForReadout | DataField::Special => ReadingValue::NoValue,
        _ if vib.quantity().is_time_point() && !field.is_bcd() && field != DataField::VariableLength => {
            decode_time_point(data)
        }
        DataField::Real32 => {
            if is_filled_with(data, 0xFF) || is_filled_with(data, 0x7F) {
                return ReadingValue::NoValue;
            }
            match decode_real(data) {
                Ok((_, v)) if v.is_nan() => ReadingValue::NoValue,
                Ok((_, v)) => ReadingValue::Numeric(vib.scale(f64::from(v))),
                Err(_) => ReadingValue::Invalid("real needs 4 bytes".into()),
            }
        }
        DataField::Int8 | DataField::Int16 | DataField::Int24 | DataField::Int32 | DataField::Int48
        | DataField::Int64 => with_offset(decode_integer(data, vib.exponent)),
        DataField::Bcd2 | DataField::Bcd4 | DataField::Bcd6 | DataField::Bcd8 | DataField::Bcd12 => {
            with_offset(decode_bcd_value(data, vib.exponent, false))
        }
        DataField::VariableLength => match record.variable_length {
            Some(VariableLength::Text(_)) | None => ReadingValue::Text(decode_string(data)),
            Some(VariableLength::PositiveBcd(_)) => with_offset(decode_bcd_value(data, vib.exponent, false)),
            Some(VariableLength::NegativeBcd(_)) => with_offset(decode_bcd_value(data, vib.exponent, true)),
            Some(VariableLength::Binary(n)) if n <= 8 => with_offset(decode_integer(data, vib.exponent)),
            Some(VariableLength::Binary(_)) => ReadingValue::Bytes(data.to_vec()),
        },
    }
}
