//! Link layer and application layer constants of EN 13757-2/3.
//!
//! Shared by the frame codec, the telegram parser and the master engine.

// ----------------------------------------------------------------------------
// Frame delimiters
// ----------------------------------------------------------------------------

/// Single-character acknowledge frame
pub const MBUS_FRAME_ACK_START: u8 = 0xE5;

/// Start byte of a short frame
pub const MBUS_FRAME_SHORT_START: u8 = 0x10;

/// Start byte of a control or long frame (sent twice)
pub const MBUS_FRAME_LONG_START: u8 = 0x68;

/// Stop byte terminating short, control and long frames
pub const MBUS_FRAME_STOP: u8 = 0x16;

/// Wire size of a short frame
pub const MBUS_FRAME_SHORT_SIZE: usize = 5;

/// Framing overhead of a control/long frame around its L bytes
pub const MBUS_FRAME_LONG_OVERHEAD: usize = 6;

/// Length field value of a control frame (C, A, CI)
pub const MBUS_FRAME_CONTROL_LENGTH: u8 = 3;

/// Largest payload a long frame can carry (L is one byte and covers C, A and CI)
pub const MBUS_FRAME_MAX_PAYLOAD: usize = 252;

// ----------------------------------------------------------------------------
// Addresses
// ----------------------------------------------------------------------------

/// Factory default address of an unconfigured slave
pub const MBUS_ADDRESS_UNCONFIGURED: u8 = 0x00;

/// Highest address a slave can be configured to
pub const MBUS_ADDRESS_MAX_PRIMARY: u8 = 250;

/// Network layer address, used to talk to a slave selected by secondary address
pub const MBUS_ADDRESS_NETWORK_LAYER: u8 = 0xFD;

/// Broadcast address, all slaves reply (test use only)
pub const MBUS_ADDRESS_BROADCAST_REPLY: u8 = 0xFE;

/// Broadcast address, no slave replies
pub const MBUS_ADDRESS_BROADCAST_NOREPLY: u8 = 0xFF;

// ----------------------------------------------------------------------------
// Control field
// ----------------------------------------------------------------------------

// Complete C fields of the master requests
pub const MBUS_CONTROL_MASK_SND_NKE: u8 = 0x40;
pub const MBUS_CONTROL_MASK_SND_UD: u8 = 0x53; // includes DIR M2S
pub const MBUS_CONTROL_MASK_REQ_UD2: u8 = 0x5B; // includes DIR M2S
pub const MBUS_CONTROL_MASK_RSP_UD: u8 = 0x08; // S2M response

// Control flag bits
pub const MBUS_CONTROL_MASK_FCB: u8 = 0x20;
pub const MBUS_CONTROL_MASK_FCV: u8 = 0x10;
pub const MBUS_CONTROL_MASK_ACD: u8 = 0x20;
pub const MBUS_CONTROL_MASK_DFC: u8 = 0x10;
pub const MBUS_CONTROL_MASK_DIR_M2S: u8 = 0x40;

// ----------------------------------------------------------------------------
// Control information (CI) codes
// ----------------------------------------------------------------------------

pub const MBUS_CONTROL_INFO_APPLICATION_RESET: u8 = 0x50;
pub const MBUS_CONTROL_INFO_DATA_SEND: u8 = 0x51;
pub const MBUS_CONTROL_INFO_SELECT_SLAVE: u8 = 0x52;
pub const MBUS_CONTROL_INFO_SET_BAUDRATE_300: u8 = 0xB8;

pub const MBUS_CONTROL_INFO_ERROR_GENERAL: u8 = 0x70;
pub const MBUS_CONTROL_INFO_RESP_VARIABLE: u8 = 0x72;
pub const MBUS_CONTROL_INFO_RESP_FIXED: u8 = 0x73;

/// First and last CI code reserved for manufacturer specific application layers
pub const MBUS_CONTROL_INFO_MANUFACTURER_FIRST: u8 = 0xA0;
pub const MBUS_CONTROL_INFO_MANUFACTURER_LAST: u8 = 0xB7;

// ----------------------------------------------------------------------------
// Variable data structure
// ----------------------------------------------------------------------------

/// Size of the fixed header in front of variable data records (CI 0x72)
pub const MBUS_DATA_VARIABLE_HEADER_LENGTH: usize = 12;

/// Data field coding, DIF bits 0-3.
pub const MBUS_DATA_RECORD_DIF_MASK_DATA: u8 = 0x0F;

/// Function field, DIF bits 4-5.
pub const MBUS_DATA_RECORD_DIF_MASK_FUNCTION: u8 = 0x30;

/// Storage number bit 0, DIF bit 6.
pub const MBUS_DATA_RECORD_DIF_MASK_STORAGE_NO: u8 = 0x40;

/// Four more storage number bits per DIFE.
pub const MBUS_DATA_RECORD_DIFE_MASK_STORAGE_NO: u8 = 0x0F;

/// Two tariff bits per DIFE.
pub const MBUS_DATA_RECORD_DIFE_MASK_TARIFF: u8 = 0x30;

/// One subunit bit per DIFE.
pub const MBUS_DATA_RECORD_DIFE_MASK_DEVICE: u8 = 0x40;

/// DIF idle filler
pub const MBUS_DIB_DIF_IDLE_FILLER: u8 = 0x2F;

/// Manufacturer data up to the end of the telegram.
pub const MBUS_DIB_DIF_MANUFACTURER_SPECIFIC: u8 = 0x0F;

/// As 0x0F, and the slave has another telegram.
pub const MBUS_DIB_DIF_MORE_RECORDS_FOLLOW: u8 = 0x1F;

/// A DIFE follows.
pub const MBUS_DIB_DIF_EXTENSION_BIT: u8 = 0x80;

/// VIF/VIFE code bits.
pub const MBUS_DIB_VIF_WITHOUT_EXTENSION: u8 = 0x7F;

/// A VIFE follows.
pub const MBUS_DIB_VIF_EXTENSION_BIT: u8 = 0x80;

/// Plain text VIF, the unit follows as an ASCII string
pub const MBUS_DIB_VIF_PLAIN_TEXT: u8 = 0x7C;

/// Manufacturer-specific VIF / VIFE code (without extension bit)
pub const MBUS_DIB_VIF_MANUFACTURER_SPECIFIC: u8 = 0x7F;

/// First extension table marker (VIF 0xFD)
pub const MBUS_DIB_VIF_EXTENSION_FD: u8 = 0xFD;

/// Second extension table marker (VIF 0xFB)
pub const MBUS_DIB_VIF_EXTENSION_FB: u8 = 0xFB;

/// Maximum number of DIFE bytes in one record
pub const MBUS_DATA_INFO_BLOCK_DIFE_SIZE: usize = 10;

/// Maximum number of VIFE bytes in one record
pub const MBUS_VALUE_INFO_BLOCK_VIFE_SIZE: usize = 10;

// ----------------------------------------------------------------------------
// Fixed data structure (CI 0x73)
// ----------------------------------------------------------------------------

pub const MBUS_DATA_FIXED_LENGTH: usize = 16;
pub const MBUS_DATA_FIXED_STATUS_FORMAT_MASK: u8 = 0x80;
pub const MBUS_DATA_FIXED_STATUS_FORMAT_INT: u8 = 0x80;
pub const MBUS_DATA_FIXED_STATUS_DATE_MASK: u8 = 0x40;
pub const MBUS_DATA_FIXED_STATUS_DATE_STORED: u8 = 0x40;

// ----------------------------------------------------------------------------
// Engine defaults
// ----------------------------------------------------------------------------

/// Upper bound for the configurable retry count
pub const MBUS_MAX_RETRIES: u8 = 9;

/// Default number of re-sends after a failed first attempt
pub const MBUS_DEFAULT_RETRIES: u8 = 3;

/// Default limit of telegrams collected by a multi-telegram readout
pub const MBUS_DEFAULT_MAX_FRAMES: usize = 16;

/// Largest chunk requested from the channel by one read
pub const MBUS_READ_CHUNK: usize = 256;
