//! VIF/VIFE Mapping Tables and Lookup Functions
//!
//! Lookups for the value information codes of EN 13757-3: the primary VIF
//! table, the two extension tables selected by VIF 0xFD and 0xFB, and the
//! unit table of the fixed data structure (CI 0x73).
//!
//! Every entry resolves to a [`VifInfo`]: the quantity, the base unit and
//! the power of ten to apply to the raw value. Energy, volume, mass and
//! power are normalised to Wh, J, m³, kg, W and J/h; durations keep the unit
//! the meter reports.

use crate::payload::vif::{Quantity, Unit, VifInfo};

fn info(code: u16, quantity: Quantity, unit: Unit, exponent: i8) -> Option<VifInfo> {
    Some(VifInfo {
        code,
        quantity,
        unit,
        exponent,
    })
}

/// Duration unit selected by the two low bits (seconds, minutes, hours, days).
fn duration_unit(nn: u8) -> Unit {
    match nn & 0x03 {
        0 => Unit::Second,
        1 => Unit::Minute,
        2 => Unit::Hour,
        _ => Unit::Day,
    }
}

/// Duration unit of the "pp" tables (hours, days, months, years).
fn long_duration_unit(pp: u8) -> Unit {
    match pp & 0x03 {
        0 => Unit::Hour,
        1 => Unit::Day,
        2 => Unit::Month,
        _ => Unit::Year,
    }
}

/// Primary VIF table. `vif` is the code without the extension bit.
pub fn lookup_primary_vif(vif: u8) -> Option<VifInfo> {
    let code = u16::from(vif);
    let n = (vif & 0x07) as i8;
    let nn = (vif & 0x03) as i8;
    match vif {
        0x00..=0x07 => info(code, Quantity::Energy, Unit::WattHour, n - 3),
        0x08..=0x0F => info(code, Quantity::Energy, Unit::Joule, n),
        0x10..=0x17 => info(code, Quantity::Volume, Unit::CubicMeter, n - 6),
        0x18..=0x1F => info(code, Quantity::Mass, Unit::Kilogram, n - 3),
        0x20..=0x23 => info(code, Quantity::OnTime, duration_unit(vif), 0),
        0x24..=0x27 => info(code, Quantity::OperatingTime, duration_unit(vif), 0),
        0x28..=0x2F => info(code, Quantity::Power, Unit::Watt, n - 3),
        0x30..=0x37 => info(code, Quantity::Power, Unit::JoulePerHour, n),
        0x38..=0x3F => info(code, Quantity::VolumeFlow, Unit::CubicMeterPerHour, n - 6),
        0x40..=0x47 => info(code, Quantity::VolumeFlow, Unit::CubicMeterPerMinute, n - 7),
        0x48..=0x4F => info(code, Quantity::VolumeFlow, Unit::CubicMeterPerSecond, n - 9),
        0x50..=0x57 => info(code, Quantity::MassFlow, Unit::KilogramPerHour, n - 3),
        0x58..=0x5B => info(code, Quantity::FlowTemperature, Unit::Celsius, nn - 3),
        0x5C..=0x5F => info(code, Quantity::ReturnTemperature, Unit::Celsius, nn - 3),
        0x60..=0x63 => info(code, Quantity::TemperatureDifference, Unit::Kelvin, nn - 3),
        0x64..=0x67 => info(code, Quantity::ExternalTemperature, Unit::Celsius, nn - 3),
        0x68..=0x6B => info(code, Quantity::Pressure, Unit::Bar, nn - 3),
        0x6C => info(code, Quantity::Date, Unit::None, 0),
        0x6D => info(code, Quantity::DateTime, Unit::None, 0),
        0x6E => info(code, Quantity::HeatCostAllocation, Unit::HcaUnits, 0),
        0x70..=0x73 => info(code, Quantity::AveragingDuration, duration_unit(vif), 0),
        0x74..=0x77 => info(code, Quantity::ActualityDuration, duration_unit(vif), 0),
        0x78 => info(code, Quantity::FabricationNumber, Unit::None, 0),
        0x79 => info(code, Quantity::EnhancedIdentification, Unit::None, 0),
        0x7A => info(code, Quantity::BusAddress, Unit::None, 0),
        _ => None,
    }
}

/// Main extension table, selected by VIF 0xFD.
pub fn lookup_vife_fd(vife: u8) -> Option<VifInfo> {
    let code = 0xFD00 | u16::from(vife);
    let nn = (vife & 0x03) as i8;
    let nnnn = (vife & 0x0F) as i8;
    let plain = |quantity| info(code, quantity, Unit::None, 0);
    match vife {
        0x00..=0x03 => info(code, Quantity::Credit, Unit::Currency, nn - 3),
        0x04..=0x07 => info(code, Quantity::Debit, Unit::Currency, nn - 3),
        0x08 => plain(Quantity::AccessNumber),
        0x09 => plain(Quantity::Medium),
        0x0A => plain(Quantity::Manufacturer),
        0x0B => plain(Quantity::ParameterSetId),
        0x0C => plain(Quantity::ModelVersion),
        0x0D => plain(Quantity::HardwareVersion),
        0x0E => plain(Quantity::FirmwareVersion),
        0x0F => plain(Quantity::SoftwareVersion),
        0x10 => plain(Quantity::CustomerLocation),
        0x11 => plain(Quantity::Customer),
        0x12 => plain(Quantity::AccessCodeUser),
        0x13 => plain(Quantity::AccessCodeOperator),
        0x14 => plain(Quantity::AccessCodeSystemOperator),
        0x15 => plain(Quantity::AccessCodeDeveloper),
        0x16 => plain(Quantity::Password),
        0x17 => plain(Quantity::ErrorFlags),
        0x18 => plain(Quantity::ErrorMask),
        0x1A => plain(Quantity::DigitalOutput),
        0x1B => plain(Quantity::DigitalInput),
        0x1C => info(code, Quantity::Baudrate, Unit::Baud, 0),
        0x1D => info(code, Quantity::ResponseDelay, Unit::BitTimes, 0),
        0x1E => plain(Quantity::Retry),
        0x20 => plain(Quantity::FirstStorageNumber),
        0x21 => plain(Quantity::LastStorageNumber),
        0x22 => plain(Quantity::StorageBlockSize),
        0x24..=0x27 => info(code, Quantity::StorageInterval, duration_unit(vife), 0),
        0x28 => info(code, Quantity::StorageInterval, Unit::Month, 0),
        0x29 => info(code, Quantity::StorageInterval, Unit::Year, 0),
        0x2C..=0x2F => info(code, Quantity::DurationSinceLastReadout, duration_unit(vife), 0),
        0x30 => plain(Quantity::TariffStart),
        0x31..=0x33 => info(code, Quantity::TariffDuration, duration_unit(vife), 0),
        0x34..=0x37 => info(code, Quantity::TariffPeriod, duration_unit(vife), 0),
        0x38 => info(code, Quantity::TariffPeriod, Unit::Month, 0),
        0x39 => info(code, Quantity::TariffPeriod, Unit::Year, 0),
        0x3A => plain(Quantity::Dimensionless),
        0x40..=0x4F => info(code, Quantity::Voltage, Unit::Volt, nnnn - 9),
        0x50..=0x5F => info(code, Quantity::Current, Unit::Ampere, nnnn - 12),
        0x60 => plain(Quantity::ResetCounter),
        0x61 => plain(Quantity::CumulationCounter),
        0x62 => plain(Quantity::ControlSignal),
        0x63 => plain(Quantity::DayOfWeek),
        0x64 => plain(Quantity::WeekNumber),
        0x65 => plain(Quantity::DayChangeTime),
        0x66 => plain(Quantity::ParameterActivationState),
        0x67 => plain(Quantity::SpecialSupplierInformation),
        0x68..=0x6B => info(code, Quantity::DurationSinceLastCumulation, long_duration_unit(vife), 0),
        0x6C..=0x6F => info(code, Quantity::BatteryOperatingTime, long_duration_unit(vife), 0),
        0x70 => plain(Quantity::BatteryChangeDate),
        _ => None,
    }
}

/// Alternate extension table, selected by VIF 0xFB.
pub fn lookup_vife_fb(vife: u8) -> Option<VifInfo> {
    let code = 0xFB00 | u16::from(vife);
    let n = (vife & 0x01) as i8;
    let nn = (vife & 0x03) as i8;
    let nnn = (vife & 0x07) as i8;
    match vife {
        0x00..=0x01 => info(code, Quantity::Energy, Unit::WattHour, n + 5),
        0x08..=0x09 => info(code, Quantity::Energy, Unit::Joule, n + 8),
        0x10..=0x11 => info(code, Quantity::Volume, Unit::CubicMeter, n + 2),
        0x18..=0x19 => info(code, Quantity::Mass, Unit::Kilogram, n + 5),
        0x21 => info(code, Quantity::Volume, Unit::CubicFeet, -1),
        0x22 => info(code, Quantity::Volume, Unit::UsGallon, -1),
        0x23 => info(code, Quantity::Volume, Unit::UsGallon, 0),
        0x24 => info(code, Quantity::VolumeFlow, Unit::UsGallonPerMinute, -3),
        0x25 => info(code, Quantity::VolumeFlow, Unit::UsGallonPerMinute, 0),
        0x26 => info(code, Quantity::VolumeFlow, Unit::UsGallonPerHour, 0),
        0x28..=0x29 => info(code, Quantity::Power, Unit::Watt, n + 5),
        0x30..=0x31 => info(code, Quantity::Power, Unit::JoulePerHour, n + 8),
        0x58..=0x5B => info(code, Quantity::FlowTemperature, Unit::Fahrenheit, nn - 3),
        0x5C..=0x5F => info(code, Quantity::ReturnTemperature, Unit::Fahrenheit, nn - 3),
        0x60..=0x63 => info(code, Quantity::TemperatureDifference, Unit::Fahrenheit, nn - 3),
        0x64..=0x67 => info(code, Quantity::ExternalTemperature, Unit::Fahrenheit, nn - 3),
        0x70..=0x73 => info(code, Quantity::TemperatureLimit, Unit::Fahrenheit, nn - 3),
        0x74..=0x77 => info(code, Quantity::TemperatureLimit, Unit::Celsius, nn - 3),
        0x78..=0x7F => info(code, Quantity::CumulativeMaxPower, Unit::Watt, nnn - 3),
        _ => None,
    }
}

/// Unit table of the fixed data structure (the low six bits of a counter type byte).
///
/// 0x3E ("same as counter 1, historic") is resolved by the caller.
pub fn lookup_fixed_unit(unit: u8) -> Option<VifInfo> {
    let code = u16::from(unit);
    match unit {
        0x02..=0x0A => info(code, Quantity::Energy, Unit::WattHour, (unit - 0x02) as i8),
        0x0B..=0x13 => info(code, Quantity::Energy, Unit::Joule, (unit - 0x0B) as i8 + 3),
        0x14..=0x1C => info(code, Quantity::Power, Unit::Watt, (unit - 0x14) as i8),
        0x1D..=0x25 => info(code, Quantity::Power, Unit::JoulePerHour, (unit - 0x1D) as i8 + 3),
        0x26..=0x2E => info(code, Quantity::Volume, Unit::CubicMeter, (unit - 0x26) as i8 - 6),
        0x2F..=0x37 => info(code, Quantity::VolumeFlow, Unit::CubicMeterPerHour, (unit - 0x2F) as i8 - 6),
        0x38 => info(code, Quantity::Temperature, Unit::Celsius, -3),
        0x39 => info(code, Quantity::HeatCostAllocation, Unit::HcaUnits, 0),
        0x3F => info(code, Quantity::Dimensionless, Unit::None, 0),
        _ => None,
    }
}
