//! # Value Information
//!
//! Resolution of a record's value information block (VIF + VIFEs) into what
//! the value measures: a [`Quantity`], a [`Unit`] and the decimal exponent to
//! apply, plus any combinable VIFE modifiers.
//!
//! Codes with no entry in the tables resolve to [`VifKind::Unknown`] instead
//! of failing; manufacturer-specific codes resolve to
//! [`VifKind::ManufacturerSpecific`] and are left to a vendor extension.

use std::fmt;

use serde::{Serialize, Serializer};

use crate::constants::*;
use crate::payload::record::MBusValueInformationBlock;
use crate::payload::vif_maps::{lookup_primary_vif, lookup_vife_fb, lookup_vife_fd};

/// What a record measures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Quantity {
    Energy,
    Volume,
    Mass,
    OnTime,
    OperatingTime,
    Power,
    VolumeFlow,
    MassFlow,
    FlowTemperature,
    ReturnTemperature,
    TemperatureDifference,
    ExternalTemperature,
    Temperature,
    TemperatureLimit,
    Pressure,
    Date,
    DateTime,
    HeatCostAllocation,
    AveragingDuration,
    ActualityDuration,
    FabricationNumber,
    EnhancedIdentification,
    BusAddress,
    Credit,
    Debit,
    AccessNumber,
    Medium,
    Manufacturer,
    ParameterSetId,
    ModelVersion,
    HardwareVersion,
    FirmwareVersion,
    SoftwareVersion,
    CustomerLocation,
    Customer,
    AccessCodeUser,
    AccessCodeOperator,
    AccessCodeSystemOperator,
    AccessCodeDeveloper,
    Password,
    ErrorFlags,
    ErrorMask,
    DigitalOutput,
    DigitalInput,
    Baudrate,
    ResponseDelay,
    Retry,
    FirstStorageNumber,
    LastStorageNumber,
    StorageBlockSize,
    StorageInterval,
    DurationSinceLastReadout,
    TariffStart,
    TariffDuration,
    TariffPeriod,
    Dimensionless,
    Voltage,
    Current,
    ResetCounter,
    CumulationCounter,
    ControlSignal,
    DayOfWeek,
    WeekNumber,
    DayChangeTime,
    ParameterActivationState,
    SpecialSupplierInformation,
    DurationSinceLastCumulation,
    BatteryOperatingTime,
    BatteryChangeDate,
    CumulativeMaxPower,
    /// Plain-text VIF; the unit text is carried by [`Unit::Custom`].
    Custom,
    ManufacturerSpecific,
    Unknown,
}

impl Quantity {
    /// True for quantities whose value is a calendar date or date and time.
    pub fn is_time_point(self) -> bool {
        matches!(
            self,
            Quantity::Date | Quantity::DateTime | Quantity::TariffStart | Quantity::BatteryChangeDate
        )
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Quantity::Energy => "Energy",
            Quantity::Volume => "Volume",
            Quantity::Mass => "Mass",
            Quantity::OnTime => "On time",
            Quantity::OperatingTime => "Operating time",
            Quantity::Power => "Power",
            Quantity::VolumeFlow => "Volume flow",
            Quantity::MassFlow => "Mass flow",
            Quantity::FlowTemperature => "Flow temperature",
            Quantity::ReturnTemperature => "Return temperature",
            Quantity::TemperatureDifference => "Temperature difference",
            Quantity::ExternalTemperature => "External temperature",
            Quantity::Temperature => "Temperature",
            Quantity::TemperatureLimit => "Cold / Warm temperature limit",
            Quantity::Pressure => "Pressure",
            Quantity::Date => "Time point (date)",
            Quantity::DateTime => "Time point (date & time)",
            Quantity::HeatCostAllocation => "H.C.A.",
            Quantity::AveragingDuration => "Averaging duration",
            Quantity::ActualityDuration => "Actuality duration",
            Quantity::FabricationNumber => "Fabrication number",
            Quantity::EnhancedIdentification => "(Enhanced) identification",
            Quantity::BusAddress => "Bus address",
            Quantity::Credit => "Credit",
            Quantity::Debit => "Debit",
            Quantity::AccessNumber => "Access number (transmission count)",
            Quantity::Medium => "Medium",
            Quantity::Manufacturer => "Manufacturer",
            Quantity::ParameterSetId => "Parameter set identification",
            Quantity::ModelVersion => "Model / Version",
            Quantity::HardwareVersion => "Hardware version",
            Quantity::FirmwareVersion => "Firmware version",
            Quantity::SoftwareVersion => "Software version",
            Quantity::CustomerLocation => "Customer location",
            Quantity::Customer => "Customer",
            Quantity::AccessCodeUser => "Access code user",
            Quantity::AccessCodeOperator => "Access code operator",
            Quantity::AccessCodeSystemOperator => "Access code system operator",
            Quantity::AccessCodeDeveloper => "Access code developer",
            Quantity::Password => "Password",
            Quantity::ErrorFlags => "Error flags",
            Quantity::ErrorMask => "Error mask",
            Quantity::DigitalOutput => "Digital output",
            Quantity::DigitalInput => "Digital input",
            Quantity::Baudrate => "Baudrate",
            Quantity::ResponseDelay => "Response delay time",
            Quantity::Retry => "Retry",
            Quantity::FirstStorageNumber => "First storage number for cyclic storage",
            Quantity::LastStorageNumber => "Last storage number for cyclic storage",
            Quantity::StorageBlockSize => "Size of storage block",
            Quantity::StorageInterval => "Storage interval",
            Quantity::DurationSinceLastReadout => "Duration since last readout",
            Quantity::TariffStart => "Start of tariff",
            Quantity::TariffDuration => "Duration of tariff",
            Quantity::TariffPeriod => "Period of tariff",
            Quantity::Dimensionless => "Dimensionless",
            Quantity::Voltage => "Voltage",
            Quantity::Current => "Current",
            Quantity::ResetCounter => "Reset counter",
            Quantity::CumulationCounter => "Cumulation counter",
            Quantity::ControlSignal => "Control signal",
            Quantity::DayOfWeek => "Day of week",
            Quantity::WeekNumber => "Week number",
            Quantity::DayChangeTime => "Time point of day change",
            Quantity::ParameterActivationState => "State of parameter activation",
            Quantity::SpecialSupplierInformation => "Special supplier information",
            Quantity::DurationSinceLastCumulation => "Duration since last cumulation",
            Quantity::BatteryOperatingTime => "Operating time battery",
            Quantity::BatteryChangeDate => "Date and time of battery change",
            Quantity::CumulativeMaxPower => "Cumulative maximum of active power",
            Quantity::Custom => "Custom",
            Quantity::ManufacturerSpecific => "Manufacturer specific",
            Quantity::Unknown => "Unknown",
        };
        f.write_str(name)
    }
}

/// Unit of a decoded value. Serialised as its symbol.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Unit {
    WattHour,
    Joule,
    CubicMeter,
    Kilogram,
    Second,
    Minute,
    Hour,
    Day,
    Month,
    Year,
    Watt,
    JoulePerHour,
    CubicMeterPerHour,
    CubicMeterPerMinute,
    CubicMeterPerSecond,
    KilogramPerHour,
    Celsius,
    Kelvin,
    Fahrenheit,
    Bar,
    CubicFeet,
    UsGallon,
    UsGallonPerMinute,
    UsGallonPerHour,
    Volt,
    Ampere,
    Currency,
    Baud,
    BitTimes,
    HcaUnits,
    /// Unit text of a plain-text VIF.
    Custom(String),
    None,
}

impl Unit {
    pub fn symbol(&self) -> &str {
        match self {
            Unit::WattHour => "Wh",
            Unit::Joule => "J",
            Unit::CubicMeter => "m^3",
            Unit::Kilogram => "kg",
            Unit::Second => "s",
            Unit::Minute => "min",
            Unit::Hour => "h",
            Unit::Day => "d",
            Unit::Month => "month",
            Unit::Year => "year",
            Unit::Watt => "W",
            Unit::JoulePerHour => "J/h",
            Unit::CubicMeterPerHour => "m^3/h",
            Unit::CubicMeterPerMinute => "m^3/min",
            Unit::CubicMeterPerSecond => "m^3/s",
            Unit::KilogramPerHour => "kg/h",
            Unit::Celsius => "°C",
            Unit::Kelvin => "K",
            Unit::Fahrenheit => "°F",
            Unit::Bar => "bar",
            Unit::CubicFeet => "ft^3",
            Unit::UsGallon => "US gal",
            Unit::UsGallonPerMinute => "US gal/min",
            Unit::UsGallonPerHour => "US gal/h",
            Unit::Volt => "V",
            Unit::Ampere => "A",
            Unit::Currency => "currency units",
            Unit::Baud => "Bd",
            Unit::BitTimes => "bit times",
            Unit::HcaUnits => "HCA units",
            Unit::Custom(text) => text,
            Unit::None => "",
        }
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

impl Serialize for Unit {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.symbol())
    }
}

/// One table entry: quantity, unit and decimal exponent of the raw value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VifInfo {
    /// Table-qualified code: the primary VIF without extension bit, or
    /// `0xFD00 | vife` / `0xFB00 | vife` for the extension tables.
    pub code: u16,
    pub quantity: Quantity,
    pub unit: Unit,
    pub exponent: i8,
}

/// Combinable VIFE following the VIF (or the extension table code).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VifModifier {
    /// 0x00..=0x1F: the meter reports an error for this record.
    RecordError(u8),
    /// 0x20..=0x26: value per second, minute, hour, day, week, month or year.
    PerTime(&'static str),
    PerRevolution,
    /// 0x28..=0x2B: increment per input/output pulse on channel 0 or 1.
    PulseIncrement { output: bool, channel: u8 },
    /// 0x2C..=0x38: per-unit and multiplied-by codes, kept raw.
    UnitCombination(u8),
    StartDateTime,
    UncorrectedUnit,
    AccumulationPositive,
    AccumulationNegative,
    LimitValue { upper: bool },
    LimitExceedCount { upper: bool },
    /// 0x42..=0x6F except the two above: dates and durations of limit exceeds.
    LimitExceedEvent(u8),
    /// 0x70..=0x77 and 0x7D: the value is multiplied by 10^n.
    MultiplicativeCorrection(i8),
    /// 0x78..=0x7B: 10^n is added to the value.
    AdditiveCorrection(i8),
    FutureValue,
    /// 0x7F and every byte after it.
    ManufacturerSpecific(Vec<u8>),
    Reserved(u8),
}

impl VifModifier {
    pub fn from_vife(vife: u8) -> Self {
        let code = vife & MBUS_DIB_VIF_WITHOUT_EXTENSION;
        match code {
            0x00..=0x1F => VifModifier::RecordError(code),
            0x20..=0x26 => VifModifier::PerTime(
                ["s", "min", "h", "d", "week", "month", "year"][usize::from(code - 0x20)],
            ),
            0x27 => VifModifier::PerRevolution,
            0x28..=0x2B => VifModifier::PulseIncrement {
                output: code & 0x02 != 0,
                channel: code & 0x01,
            },
            0x2C..=0x38 => VifModifier::UnitCombination(code),
            0x39 => VifModifier::StartDateTime,
            0x3A => VifModifier::UncorrectedUnit,
            0x3B => VifModifier::AccumulationPositive,
            0x3C => VifModifier::AccumulationNegative,
            0x40 | 0x48 => VifModifier::LimitValue {
                upper: code & 0x08 != 0,
            },
            0x41 | 0x49 => VifModifier::LimitExceedCount {
                upper: code & 0x08 != 0,
            },
            0x42..=0x47 | 0x4A..=0x4F | 0x50..=0x6F => VifModifier::LimitExceedEvent(code),
            0x70..=0x77 => VifModifier::MultiplicativeCorrection((code & 0x07) as i8 - 6),
            0x78..=0x7B => VifModifier::AdditiveCorrection((code & 0x03) as i8 - 3),
            0x7D => VifModifier::MultiplicativeCorrection(3),
            0x7E => VifModifier::FutureValue,
            _ => VifModifier::Reserved(code),
        }
    }
}

/// Resolution of the primary part of a value information block.
#[derive(Debug, Clone, PartialEq)]
pub enum VifKind {
    Known(VifInfo),
    PlainText(String),
    ManufacturerSpecific,
    Unknown,
}

/// Fully resolved value information block.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedVib {
    pub kind: VifKind,
    /// Table-qualified code, see [`VifInfo::code`].
    pub code: u16,
    /// Total decimal exponent including multiplicative corrections.
    pub exponent: i32,
    /// Additive correction, applied after scaling.
    pub offset: f64,
    pub modifiers: Vec<VifModifier>,
}

impl NormalizedVib {
    pub fn quantity(&self) -> Quantity {
        match &self.kind {
            VifKind::Known(info) => info.quantity,
            VifKind::PlainText(_) => Quantity::Custom,
            VifKind::ManufacturerSpecific => Quantity::ManufacturerSpecific,
            VifKind::Unknown => Quantity::Unknown,
        }
    }

    pub fn unit(&self) -> Unit {
        match &self.kind {
            VifKind::Known(info) => info.unit.clone(),
            VifKind::PlainText(text) => Unit::Custom(text.clone()),
            VifKind::ManufacturerSpecific | VifKind::Unknown => Unit::None,
        }
    }

    /// Applies exponent and additive correction to a raw value.
    pub fn scale(&self, raw: f64) -> f64 {
        raw * 10f64.powi(self.exponent) + self.offset
    }
}

/// Resolves a value information block through the VIF tables and the
/// combinable VIFE table.
pub fn normalize_vib(vib: &MBusValueInformationBlock) -> NormalizedVib {
    let vif = vib.vif;
    let (kind, code, combinable) = match (vif, vib.vife.split_first()) {
        (MBUS_DIB_VIF_EXTENSION_FD, Some((first, rest))) => {
            let table_code = first & MBUS_DIB_VIF_WITHOUT_EXTENSION;
            let kind = lookup_vife_fd(table_code).map_or(VifKind::Unknown, VifKind::Known);
            (kind, 0xFD00 | u16::from(table_code), rest)
        }
        (MBUS_DIB_VIF_EXTENSION_FB, Some((first, rest))) => {
            let table_code = first & MBUS_DIB_VIF_WITHOUT_EXTENSION;
            let kind = lookup_vife_fb(table_code).map_or(VifKind::Unknown, VifKind::Known);
            (kind, 0xFB00 | u16::from(table_code), rest)
        }
        _ => {
            let primary = vif & MBUS_DIB_VIF_WITHOUT_EXTENSION;
            let kind = match primary {
                MBUS_DIB_VIF_PLAIN_TEXT => {
                    VifKind::PlainText(vib.custom_vif.clone().unwrap_or_default())
                }
                MBUS_DIB_VIF_MANUFACTURER_SPECIFIC => VifKind::ManufacturerSpecific,
                _ => lookup_primary_vif(primary).map_or(VifKind::Unknown, VifKind::Known),
            };
            (kind, u16::from(primary), vib.vife.as_slice())
        }
    };

    let mut exponent = match &kind {
        VifKind::Known(info) => i32::from(info.exponent),
        _ => 0,
    };
    let mut offset = 0.0;
    let mut modifiers = Vec::new();

    if kind == VifKind::ManufacturerSpecific {
        if !combinable.is_empty() {
            modifiers.push(VifModifier::ManufacturerSpecific(combinable.to_vec()));
        }
    } else {
        for (i, &vife) in combinable.iter().enumerate() {
            if vife & MBUS_DIB_VIF_WITHOUT_EXTENSION == MBUS_DIB_VIF_MANUFACTURER_SPECIFIC {
                modifiers.push(VifModifier::ManufacturerSpecific(combinable[i + 1..].to_vec()));
                break;
            }
            let modifier = VifModifier::from_vife(vife);
            match &modifier {
                VifModifier::MultiplicativeCorrection(n) => exponent += i32::from(*n),
                VifModifier::AdditiveCorrection(n) => offset += 10f64.powi(i32::from(*n)),
                _ => {}
            }
            modifiers.push(modifier);
        }
    }

    NormalizedVib {
        kind,
        code,
        exponent,
        offset,
        modifiers,
    }
}
