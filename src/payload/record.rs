//! # M-Bus Data Records
//!
//! Structural split of one variable-data record into its data information
//! block (DIF + DIFEs), value information block (VIF + optional plain-text
//! unit + VIFEs) and data bytes. Nothing here interprets the value; that is
//! the job of [`crate::payload::data::DataRecordDecoder`].
//!
//! The scan is strictly forward. Every record describes its own length:
//! extension chains end at the first byte whose top bit is clear, and the
//! data length follows from the DIF data field (or the LVAR byte for
//! variable-length data).

use nom::bytes::complete::take;
use nom::number::complete::u8 as be_u8;
use nom::IResult;
use serde::Serialize;

use crate::constants::*;
use crate::error::MBusError;
use crate::payload::data_encoding::decode_string;

/// Data field coding, the low nibble of the DIF.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataField {
    NoData,
    Int8,
    Int16,
    Int24,
    Int32,
    Real32,
    Int48,
    Int64,
    SelectionForReadout,
    Bcd2,
    Bcd4,
    Bcd6,
    Bcd8,
    VariableLength,
    Bcd12,
    Special,
}

impl DataField {
    pub fn from_dif(dif: u8) -> Self {
        match dif & MBUS_DATA_RECORD_DIF_MASK_DATA {
            0x00 => DataField::NoData,
            0x01 => DataField::Int8,
            0x02 => DataField::Int16,
            0x03 => DataField::Int24,
            0x04 => DataField::Int32,
            0x05 => DataField::Real32,
            0x06 => DataField::Int48,
            0x07 => DataField::Int64,
            0x08 => DataField::SelectionForReadout,
            0x09 => DataField::Bcd2,
            0x0A => DataField::Bcd4,
            0x0B => DataField::Bcd6,
            0x0C => DataField::Bcd8,
            0x0D => DataField::VariableLength,
            0x0E => DataField::Bcd12,
            _ => DataField::Special,
        }
    }

    /// Length of the data in bytes, `None` when it is carried in an LVAR byte
    /// or the coding is a special function.
    pub fn length(self) -> Option<usize> {
        match self {
            DataField::NoData | DataField::SelectionForReadout => Some(0),
            DataField::Int8 | DataField::Bcd2 => Some(1),
            DataField::Int16 | DataField::Bcd4 => Some(2),
            DataField::Int24 | DataField::Bcd6 => Some(3),
            DataField::Int32 | DataField::Real32 | DataField::Bcd8 => Some(4),
            DataField::Int48 | DataField::Bcd12 => Some(6),
            DataField::Int64 => Some(8),
            DataField::VariableLength | DataField::Special => None,
        }
    }

    pub fn is_bcd(self) -> bool {
        matches!(
            self,
            DataField::Bcd2 | DataField::Bcd4 | DataField::Bcd6 | DataField::Bcd8 | DataField::Bcd12
        )
    }
}

/// Interpretation of the LVAR byte that precedes variable-length data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariableLength {
    /// 0x00..=0xBF: ASCII text, stored in reverse.
    Text(usize),
    /// 0xC0..=0xCF: positive BCD.
    PositiveBcd(usize),
    /// 0xD0..=0xDF: negative BCD.
    NegativeBcd(usize),
    /// 0xE0..=0xEF and 0xF0..=0xFA: little-endian binary.
    Binary(usize),
}

impl VariableLength {
    pub fn from_lvar(lvar: u8) -> Option<Self> {
        match lvar {
            0x00..=0xBF => Some(VariableLength::Text(usize::from(lvar))),
            0xC0..=0xCF => Some(VariableLength::PositiveBcd(usize::from(lvar & 0x0F))),
            0xD0..=0xDF => Some(VariableLength::NegativeBcd(usize::from(lvar & 0x0F))),
            0xE0..=0xEF => Some(VariableLength::Binary(usize::from(lvar - 0xE0))),
            0xF0..=0xFA => Some(VariableLength::Binary(4 * usize::from(lvar - 0xEC))),
            _ => None,
        }
    }

    pub fn len(self) -> usize {
        match self {
            VariableLength::Text(n)
            | VariableLength::PositiveBcd(n)
            | VariableLength::NegativeBcd(n)
            | VariableLength::Binary(n) => n,
        }
    }

    pub fn is_empty(self) -> bool {
        self.len() == 0
    }
}

/// Function field, DIF bits 4-5.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Function {
    Instantaneous,
    Maximum,
    Minimum,
    ValueDuringError,
}

impl Function {
    pub fn from_dif(dif: u8) -> Self {
        match (dif & MBUS_DATA_RECORD_DIF_MASK_FUNCTION) >> 4 {
            0 => Function::Instantaneous,
            1 => Function::Maximum,
            2 => Function::Minimum,
            _ => Function::ValueDuringError,
        }
    }
}

/// Data information block: DIF and its extensions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MBusDataInformationBlock {
    pub dif: u8,
    pub dife: Vec<u8>,
}

impl MBusDataInformationBlock {
    pub fn data_field(&self) -> DataField {
        DataField::from_dif(self.dif)
    }

    pub fn function(&self) -> Function {
        Function::from_dif(self.dif)
    }

    /// DIF bit 6 is storage bit 0; every DIFE adds four more bits above it.
    pub fn storage_number(&self) -> u64 {
        let base = u64::from((self.dif & MBUS_DATA_RECORD_DIF_MASK_STORAGE_NO) >> 6);
        self.dife.iter().enumerate().fold(base, |acc, (i, dife)| {
            acc | (u64::from(dife & MBUS_DATA_RECORD_DIFE_MASK_STORAGE_NO) << (1 + 4 * i))
        })
    }

    pub fn tariff(&self) -> u32 {
        self.dife.iter().enumerate().fold(0, |acc, (i, dife)| {
            acc | (u32::from((dife & MBUS_DATA_RECORD_DIFE_MASK_TARIFF) >> 4) << (2 * i))
        })
    }

    pub fn subunit(&self) -> u32 {
        self.dife.iter().enumerate().fold(0, |acc, (i, dife)| {
            acc | (u32::from((dife & MBUS_DATA_RECORD_DIFE_MASK_DEVICE) >> 6) << i)
        })
    }
}

/// Value information block: VIF, plain-text unit and extensions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MBusValueInformationBlock {
    pub vif: u8,
    pub vife: Vec<u8>,
    /// Unit text of a plain-text VIF (0x7C / 0xFC), already un-reversed.
    pub custom_vif: Option<String>,
}

/// Header of a data record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MBusDataRecordHeader {
    pub dib: MBusDataInformationBlock,
    pub vib: MBusValueInformationBlock,
}

/// One variable-data record, split but not yet value-decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MBusDataRecord {
    /// Byte offset of the DIF within the telegram payload.
    pub offset: usize,
    pub header: MBusDataRecordHeader,
    /// Set for variable-length data.
    pub variable_length: Option<VariableLength>,
    /// Data bytes, without the LVAR byte.
    pub data: Vec<u8>,
    /// The whole record as it appeared on the wire.
    pub raw: Vec<u8>,
}

impl MBusDataRecord {
    pub fn dib(&self) -> &MBusDataInformationBlock {
        &self.header.dib
    }

    pub fn vib(&self) -> &MBusValueInformationBlock {
        &self.header.vib
    }
}

fn extension_chain(mut input: &[u8], mut more: bool) -> IResult<&[u8], Vec<u8>> {
    let mut chain = Vec::new();
    while more {
        let (rest, byte) = be_u8(input)?;
        chain.push(byte);
        more = byte & 0x80 != 0;
        input = rest;
    }
    Ok((input, chain))
}

/// Maps a nom failure to `MalformedRecord` at the position where the field starts.
fn field<'a, T>(
    result: IResult<&'a [u8], T>,
    payload_len: usize,
    what: &str,
) -> Result<(&'a [u8], T), MBusError> {
    result.map_err(|err| {
        let remaining = match &err {
            nom::Err::Error(e) | nom::Err::Failure(e) => e.input.len(),
            nom::Err::Incomplete(_) => 0,
        };
        MBusError::MalformedRecord {
            offset: payload_len - remaining,
            reason: format!("{what} runs past end of payload"),
        }
    })
}

/// Parses the record starting at `offset` in `payload`.
///
/// Returns the record and the offset of the byte following it. The caller
/// handles the special DIFs (idle filler, manufacturer data) before calling.
pub fn parse_data_record(payload: &[u8], offset: usize) -> Result<(MBusDataRecord, usize), MBusError> {
    let len = payload.len();
    let input = payload.get(offset..).unwrap_or_default();
    let malformed = |at: &[u8], reason: String| MBusError::MalformedRecord {
        offset: len - at.len(),
        reason,
    };

    let (rest, dif) = field(be_u8(input), len, "DIF")?;
    let (rest, dife) = field(
        extension_chain(rest, dif & MBUS_DIB_DIF_EXTENSION_BIT != 0),
        len,
        "DIFE chain",
    )?;
    if dife.len() > MBUS_DATA_INFO_BLOCK_DIFE_SIZE {
        return Err(malformed(input, format!("{} DIFEs, at most 10 allowed", dife.len())));
    }

    let data_field = DataField::from_dif(dif);
    if data_field == DataField::Special {
        return Err(malformed(input, format!("special function DIF 0x{dif:02X} in record list")));
    }

    let (mut rest, vif) = field(be_u8(rest), len, "VIF")?;
    let mut custom_vif = None;
    if vif & MBUS_DIB_VIF_WITHOUT_EXTENSION == MBUS_DIB_VIF_PLAIN_TEXT {
        let (after_len, text_len) = field(be_u8(rest), len, "plain-text VIF length")?;
        let (after_text, text) = field(take(text_len)(after_len), len, "plain-text VIF")?;
        custom_vif = Some(decode_string(text));
        rest = after_text;
    }
    let (rest, vife) = field(
        extension_chain(rest, vif & MBUS_DIB_VIF_EXTENSION_BIT != 0),
        len,
        "VIFE chain",
    )?;
    if vife.len() > MBUS_VALUE_INFO_BLOCK_VIFE_SIZE {
        return Err(malformed(input, format!("{} VIFEs, at most 10 allowed", vife.len())));
    }

    let (rest, variable_length, data_len) = match data_field.length() {
        Some(n) => (rest, None, n),
        None => {
            let (after_lvar, lvar) = field(be_u8(rest), len, "LVAR")?;
            let kind = VariableLength::from_lvar(lvar)
                .ok_or_else(|| malformed(rest, format!("reserved LVAR 0x{lvar:02X}")))?;
            (after_lvar, Some(kind), kind.len())
        }
    };
    let (rest, data) = field(take(data_len)(rest), len, "record data")?;

    let next = len - rest.len();
    let record = MBusDataRecord {
        offset,
        header: MBusDataRecordHeader {
            dib: MBusDataInformationBlock { dif, dife },
            vib: MBusValueInformationBlock { vif, vife, custom_vif },
        },
        variable_length,
        data: data.to_vec(),
        raw: payload[offset..next].to_vec(),
    };
    Ok((record, next))
}
