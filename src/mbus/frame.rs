//! # M-Bus Frame Codec
//!
//! This module encodes and decodes the four M-Bus link layer frames
//! (EN 13757-2): the single character acknowledge, the short frame, the
//! control frame and the long frame. It uses the `nom` crate for parsing the
//! binary layout.
//!
//! | Frame | Bytes |
//! |---|---|
//! | Acknowledge | `E5` |
//! | Short | `10 C A CS 16` |
//! | Control | `68 03 03 68 C A CI CS 16` |
//! | Long | `68 L L 68 C A CI payload CS 16` |
//!
//! The checksum is the arithmetic sum of C, A, CI and the payload modulo 256.
//! It is computed by [`encode_frame`] and verified by [`decode_frame`], so it
//! is not part of [`MBusFrame`].
//!
//! ```rust
//! use mbus_master::mbus::frame::{decode_frame, encode_frame, MBusFrame};
//!
//! let bytes = encode_frame(&MBusFrame::snd_nke(5)).unwrap();
//! assert_eq!(bytes, vec![0x10, 0x40, 0x05, 0x45, 0x16]);
//!
//! let (frame, consumed) = decode_frame(&bytes).unwrap();
//! assert_eq!(frame, MBusFrame::snd_nke(5));
//! assert_eq!(consumed, 5);
//! ```

use bitflags::bitflags;
use bytes::{BufMut, BytesMut};
use nom::bytes::streaming::take;
use nom::number::streaming::u8 as be_u8;
use nom::sequence::tuple;

use crate::constants::*;
use crate::error::MBusError;

bitflags! {
    /// Flag bits of the control (C) field.
    ///
    /// FCB/FCV are set by the master, ACD/DFC by the slave; they share bit
    /// positions and are told apart by the direction bit.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ControlField: u8 {
        const DIR = MBUS_CONTROL_MASK_DIR_M2S;
        const FCB = MBUS_CONTROL_MASK_FCB;
        const FCV = MBUS_CONTROL_MASK_FCV;
        const ACD = MBUS_CONTROL_MASK_ACD;
        const DFC = MBUS_CONTROL_MASK_DFC;
    }
}

/// Represents an M-Bus frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MBusFrame {
    /// Single character acknowledge (0xE5).
    Ack,
    /// Short frame: control and address only.
    Short { control: u8, address: u8 },
    /// Control frame: long frame layout with an empty payload.
    Control {
        control: u8,
        address: u8,
        control_information: u8,
    },
    /// Long frame carrying a non-empty payload after the CI field.
    Long {
        control: u8,
        address: u8,
        control_information: u8,
        data: Vec<u8>,
    },
}

/// Represents the different types of M-Bus frames.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum MBusFrameType {
    Ack,
    Short,
    Control,
    Long,
}

impl MBusFrame {
    /// SND_NKE: link reset of a slave, answered by ACK.
    pub fn snd_nke(address: u8) -> Self {
        MBusFrame::Short {
            control: MBUS_CONTROL_MASK_SND_NKE,
            address,
        }
    }

    /// REQ_UD2 without a valid frame count bit.
    pub fn req_ud2(address: u8) -> Self {
        MBusFrame::Short {
            control: MBUS_CONTROL_MASK_REQ_UD2,
            address,
        }
    }

    /// REQ_UD2 with FCV set and the given FCB, used for multi-telegram readouts.
    pub fn req_ud2_fcb(address: u8, fcb: bool) -> Self {
        let mut control = MBUS_CONTROL_MASK_REQ_UD2 | MBUS_CONTROL_MASK_FCV;
        if fcb {
            control |= MBUS_CONTROL_MASK_FCB;
        }
        MBusFrame::Short { control, address }
    }

    /// SND_UD with the given CI and payload. An empty payload yields a control frame.
    pub fn snd_ud(address: u8, control_information: u8, data: Vec<u8>) -> Self {
        if data.is_empty() {
            MBusFrame::Control {
                control: MBUS_CONTROL_MASK_SND_UD,
                address,
                control_information,
            }
        } else {
            MBusFrame::Long {
                control: MBUS_CONTROL_MASK_SND_UD,
                address,
                control_information,
                data,
            }
        }
    }

    /// Secondary address selection, sent to the network layer address.
    pub fn select_secondary(mask: [u8; 8]) -> Self {
        MBusFrame::Long {
            control: MBUS_CONTROL_MASK_SND_UD | MBUS_CONTROL_MASK_FCB,
            address: MBUS_ADDRESS_NETWORK_LAYER,
            control_information: MBUS_CONTROL_INFO_SELECT_SLAVE,
            data: mask.to_vec(),
        }
    }

    /// Writes `01 7A <new>` to the slave, changing its primary address.
    pub fn set_primary_address(address: u8, new_address: u8) -> Self {
        MBusFrame::snd_ud(
            address,
            MBUS_CONTROL_INFO_DATA_SEND,
            vec![0x01, 0x7A, new_address],
        )
    }

    /// Application reset, optionally with a subcode.
    pub fn application_reset(address: u8, subcode: Option<u8>) -> Self {
        MBusFrame::snd_ud(
            address,
            MBUS_CONTROL_INFO_APPLICATION_RESET,
            subcode.into_iter().collect(),
        )
    }

    /// Baud rate switch; `code` is one of the CI values 0xB8..=0xBF.
    pub fn switch_baudrate(address: u8, code: u8) -> Self {
        MBusFrame::Control {
            control: MBUS_CONTROL_MASK_SND_UD,
            address,
            control_information: code,
        }
    }

    pub fn frame_type(&self) -> MBusFrameType {
        match self {
            MBusFrame::Ack => MBusFrameType::Ack,
            MBusFrame::Short { .. } => MBusFrameType::Short,
            MBusFrame::Control { .. } => MBusFrameType::Control,
            MBusFrame::Long { .. } => MBusFrameType::Long,
        }
    }

    /// Control field, `None` for ACK.
    pub fn control(&self) -> Option<u8> {
        match self {
            MBusFrame::Ack => None,
            MBusFrame::Short { control, .. }
            | MBusFrame::Control { control, .. }
            | MBusFrame::Long { control, .. } => Some(*control),
        }
    }

    /// Address field, `None` for ACK.
    pub fn address(&self) -> Option<u8> {
        match self {
            MBusFrame::Ack => None,
            MBusFrame::Short { address, .. }
            | MBusFrame::Control { address, .. }
            | MBusFrame::Long { address, .. } => Some(*address),
        }
    }

    /// CI field of control and long frames.
    pub fn control_information(&self) -> Option<u8> {
        match self {
            MBusFrame::Control {
                control_information,
                ..
            }
            | MBusFrame::Long {
                control_information,
                ..
            } => Some(*control_information),
            _ => None,
        }
    }

    /// Payload after the CI field; empty for everything but long frames.
    pub fn data(&self) -> &[u8] {
        match self {
            MBusFrame::Long { data, .. } => data,
            _ => &[],
        }
    }

    /// Flag view of the control field.
    pub fn control_field(&self) -> Option<ControlField> {
        self.control().map(ControlField::from_bits_truncate)
    }

    /// True for frames sent by the master (DIR bit set).
    pub fn is_master_to_slave(&self) -> bool {
        self.control_field()
            .map(|c| c.contains(ControlField::DIR))
            .unwrap_or(false)
    }

    /// Serializes the frame, see [`encode_frame`].
    pub fn encode(&self) -> Result<Vec<u8>, MBusError> {
        encode_frame(self)
    }
}

/// Sum of the bytes modulo 256.
pub fn calculate_checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, b| acc.wrapping_add(*b))
}

/// Serializes a frame to its exact wire bytes.
///
/// Fails with `InvalidFrame` if a long frame carries no payload (that wire
/// shape is a control frame) or more than 252 payload bytes.
pub fn encode_frame(frame: &MBusFrame) -> Result<Vec<u8>, MBusError> {
    let mut buf = BytesMut::with_capacity(MBUS_FRAME_LONG_OVERHEAD + 3 + frame.data().len());

    match frame {
        MBusFrame::Ack => buf.put_u8(MBUS_FRAME_ACK_START),
        MBusFrame::Short { control, address } => {
            buf.put_u8(MBUS_FRAME_SHORT_START);
            buf.put_u8(*control);
            buf.put_u8(*address);
            buf.put_u8(calculate_checksum(&[*control, *address]));
            buf.put_u8(MBUS_FRAME_STOP);
        }
        MBusFrame::Control {
            control,
            address,
            control_information,
        } => put_long(&mut buf, *control, *address, *control_information, &[]),
        MBusFrame::Long {
            control,
            address,
            control_information,
            data,
        } => {
            if data.is_empty() {
                return Err(MBusError::InvalidFrame(
                    "long frame without payload, use a control frame".into(),
                ));
            }
            if data.len() > MBUS_FRAME_MAX_PAYLOAD {
                return Err(MBusError::InvalidFrame(format!(
                    "payload of {} bytes exceeds {}",
                    data.len(),
                    MBUS_FRAME_MAX_PAYLOAD
                )));
            }
            put_long(&mut buf, *control, *address, *control_information, data);
        }
    }

    Ok(buf.to_vec())
}

fn put_long(buf: &mut BytesMut, control: u8, address: u8, ci: u8, data: &[u8]) {
    let length = (data.len() + 3) as u8;
    buf.put_u8(MBUS_FRAME_LONG_START);
    buf.put_u8(length);
    buf.put_u8(length);
    buf.put_u8(MBUS_FRAME_LONG_START);
    buf.put_u8(control);
    buf.put_u8(address);
    buf.put_u8(ci);
    buf.put_slice(data);
    let checksum = calculate_checksum(&[control, address, ci]).wrapping_add(calculate_checksum(data));
    buf.put_u8(checksum);
    buf.put_u8(MBUS_FRAME_STOP);
}

/// Decodes one frame from the start of `input`.
///
/// Returns the frame and the number of bytes it occupied; bytes after the
/// frame are left untouched. `IncompleteFrame` means the input is a valid
/// prefix so far and more bytes are needed.
pub fn decode_frame(input: &[u8]) -> Result<(MBusFrame, usize), MBusError> {
    let (_, start) = be_u8(input).map_err(nom_error)?;
    match start {
        MBUS_FRAME_ACK_START => Ok((MBusFrame::Ack, 1)),
        MBUS_FRAME_SHORT_START => decode_short(input),
        MBUS_FRAME_LONG_START => decode_long(input),
        other => Err(MBusError::FramingError(other)),
    }
}

fn decode_short(input: &[u8]) -> Result<(MBusFrame, usize), MBusError> {
    require(input, MBUS_FRAME_SHORT_SIZE)?;
    let (_, (_, control, address, checksum, stop)) =
        tuple((be_u8, be_u8, be_u8, be_u8, be_u8))(input).map_err(nom_error)?;

    if stop != MBUS_FRAME_STOP {
        return Err(MBusError::LengthMismatch(format!(
            "short frame terminated by 0x{stop:02X}"
        )));
    }
    verify_checksum(checksum, calculate_checksum(&[control, address]))?;

    Ok((MBusFrame::Short { control, address }, MBUS_FRAME_SHORT_SIZE))
}

fn decode_long(input: &[u8]) -> Result<(MBusFrame, usize), MBusError> {
    let minimum = MBUS_FRAME_LONG_OVERHEAD + MBUS_FRAME_CONTROL_LENGTH as usize;
    if input.len() < 3 {
        return Err(MBusError::IncompleteFrame {
            needed: minimum - input.len(),
        });
    }

    let (rest, (_, len1, len2)) = tuple((be_u8, be_u8, be_u8))(input).map_err(nom_error)?;
    if len1 != len2 {
        return Err(MBusError::LengthMismatch(format!(
            "length fields disagree (0x{len1:02X} != 0x{len2:02X})"
        )));
    }
    if len1 < MBUS_FRAME_CONTROL_LENGTH {
        return Err(MBusError::LengthMismatch(format!(
            "length 0x{len1:02X} shorter than C, A and CI"
        )));
    }

    let total = len1 as usize + MBUS_FRAME_LONG_OVERHEAD;
    require(input, total)?;

    let (rest, (start2, control, address, control_information)) =
        tuple((be_u8, be_u8, be_u8, be_u8))(rest).map_err(nom_error)?;
    if start2 != MBUS_FRAME_LONG_START {
        return Err(MBusError::FramingError(start2));
    }
    let (rest, data) = take(len1 as usize - 3)(rest).map_err(nom_error)?;
    let (_, (checksum, stop)) = tuple((be_u8, be_u8))(rest).map_err(nom_error)?;

    if stop != MBUS_FRAME_STOP {
        return Err(MBusError::LengthMismatch(format!(
            "frame of length 0x{len1:02X} terminated by 0x{stop:02X}"
        )));
    }
    let calculated = calculate_checksum(&[control, address, control_information])
        .wrapping_add(calculate_checksum(data));
    verify_checksum(checksum, calculated)?;

    let frame = if data.is_empty() {
        MBusFrame::Control {
            control,
            address,
            control_information,
        }
    } else {
        MBusFrame::Long {
            control,
            address,
            control_information,
            data: data.to_vec(),
        }
    };
    Ok((frame, total))
}

fn require(input: &[u8], total: usize) -> Result<(), MBusError> {
    if input.len() < total {
        Err(MBusError::IncompleteFrame {
            needed: total - input.len(),
        })
    } else {
        Ok(())
    }
}

fn verify_checksum(expected: u8, calculated: u8) -> Result<(), MBusError> {
    if expected == calculated {
        Ok(())
    } else {
        Err(MBusError::ChecksumError {
            expected,
            calculated,
        })
    }
}

fn nom_error(err: nom::Err<nom::error::Error<&[u8]>>) -> MBusError {
    match err {
        nom::Err::Incomplete(nom::Needed::Size(n)) => MBusError::IncompleteFrame { needed: n.get() },
        nom::Err::Incomplete(nom::Needed::Unknown) => MBusError::IncompleteFrame { needed: 1 },
        nom::Err::Error(e) | nom::Err::Failure(e) => {
            MBusError::InvalidFrame(format!("{:?} at {} byte(s) from the end", e.code, e.input.len()))
        }
    }
}
