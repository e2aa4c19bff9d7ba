//! # M-Bus Data Encoding and Decoding
//!
//! This module provides functions for encoding and decoding the data types
//! used in M-Bus records (EN 13757-3 Annex A): BCD (type A), little-endian
//! binary integers (type B/C), IEEE 754 reals (type H), the compound date
//! and date-time types F, G and I, and the manufacturer code.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use nom::number::complete::le_f32;
use nom::IResult;

use crate::error::MBusError;

/// Decodes little-endian BCD, least significant byte first.
///
/// An 0xF in the most significant digit marks a negative number. Returns
/// `None` if any other digit is not decimal or the value does not fit an `i64`
/// (more than 18 digits of 9s).
pub fn decode_bcd(input: &[u8]) -> Option<i64> {
    let mut value: i64 = 0;
    let mut negative = false;

    for (i, byte) in input.iter().rev().enumerate() {
        let high = byte >> 4;
        let low = byte & 0x0F;
        let high = if i == 0 && high == 0x0F {
            negative = true;
            0
        } else {
            high
        };
        if high > 9 || low > 9 {
            return None;
        }
        value = value
            .checked_mul(100)?
            .checked_add(i64::from(high) * 10 + i64::from(low))?;
    }

    Some(if negative { -value } else { value })
}

/// Encodes `value` as `len` bytes of little-endian BCD, dropping digits that do not fit.
pub fn encode_bcd(mut value: u64, len: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(len);
    for _ in 0..len {
        let low = (value % 10) as u8;
        value /= 10;
        let high = (value % 10) as u8;
        value /= 10;
        out.push((high << 4) | low);
    }
    out
}

/// Decodes a little-endian unsigned integer of up to 8 bytes.
pub fn decode_uint(input: &[u8]) -> u64 {
    input
        .iter()
        .rev()
        .fold(0u64, |acc, b| (acc << 8) | u64::from(*b))
}

/// Decodes a little-endian two's complement integer of 1 to 8 bytes.
pub fn decode_int(input: &[u8]) -> i64 {
    let width = input.len().min(8);
    if width == 0 {
        return 0;
    }
    let raw = decode_uint(&input[..width]);
    let shift = 64 - 8 * width as u32;
    ((raw << shift) as i64) >> shift
}

/// Decodes a 32-bit IEEE 754 real, little-endian.
pub fn decode_real(input: &[u8]) -> IResult<&[u8], f32> {
    le_f32(input)
}

/// Decodes a record text value; the wire carries the characters in reverse order.
pub fn decode_string(input: &[u8]) -> String {
    input
        .iter()
        .rev()
        .map(|&b| if b.is_ascii() { b as char } else { '?' })
        .collect()
}

/// True when every byte of `input` equals `fill` (and `input` is not empty).
pub fn is_filled_with(input: &[u8], fill: u8) -> bool {
    !input.is_empty() && input.iter().all(|&b| b == fill)
}

fn compound_date(day_byte: u8, month_byte: u8) -> Option<NaiveDate> {
    let day = u32::from(day_byte & 0x1F);
    let month = u32::from(month_byte & 0x0F);
    let year = ((day_byte & 0xE0) >> 5) | ((month_byte & 0xF0) >> 1);
    NaiveDate::from_ymd_opt(2000 + i32::from(year), month, day)
}

/// Decodes a type G date (2 bytes). `None` for impossible calendar values,
/// which meters use to report an unset date.
pub fn decode_date(input: &[u8]) -> Option<NaiveDate> {
    match input {
        [b0, b1] => compound_date(*b0, *b1),
        _ => None,
    }
}

/// Decodes a type F (4 bytes) or type I (6 bytes) date and time.
///
/// Returns `None` when the invalid flag is set or the fields do not form a
/// calendar date.
pub fn decode_datetime(input: &[u8]) -> Option<NaiveDateTime> {
    match input {
        [minute, hour, day, month] => {
            if minute & 0x80 != 0 {
                return None;
            }
            let date = compound_date(*day, *month)?;
            let time = NaiveTime::from_hms_opt(u32::from(hour & 0x1F), u32::from(minute & 0x3F), 0)?;
            Some(date.and_time(time))
        }
        [second, minute, hour, day, month, _] => {
            if minute & 0x80 != 0 {
                return None;
            }
            let date = compound_date(*day, *month)?;
            let time = NaiveTime::from_hms_opt(
                u32::from(hour & 0x1F),
                u32::from(minute & 0x3F),
                u32::from(second & 0x3F),
            )?;
            Some(date.and_time(time))
        }
        _ => None,
    }
}

/// Decodes the 2-byte manufacturer field into its three-letter code.
pub fn decode_manufacturer(id: u16) -> String {
    [(id >> 10) & 0x1F, (id >> 5) & 0x1F, id & 0x1F]
        .iter()
        .map(|&c| char::from(c as u8 + 64))
        .collect()
}

/// Encodes a three-letter manufacturer code (e.g. "LSE") into its 2-byte form.
pub fn encode_manufacturer(code: &str) -> Result<u16, MBusError> {
    let letters: Vec<char> = code.chars().collect();
    if letters.len() != 3 || !letters.iter().all(|c| c.is_ascii_uppercase()) {
        return Err(MBusError::InvalidManufacturer(code.to_string()));
    }
    Ok(letters
        .iter()
        .fold(0u16, |acc, c| (acc << 5) | (*c as u16 - 64)))
}
