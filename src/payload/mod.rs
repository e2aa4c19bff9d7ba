//! The payload module contains the components responsible for decoding the
//! application layer of M-Bus telegrams: headers, data records, value
//! information and the final decoded readings.

pub mod data;
pub mod data_encoding;
pub mod record;
pub mod telegram;
pub mod vif;
pub mod vif_maps;

pub use data::{DataRecordDecoder, Reading, ReadingValue};
pub use record::{parse_data_record, DataField, Function, MBusDataRecord, VariableLength};
pub use telegram::{parse_telegram, Medium, Telegram, TelegramBody, TelegramHeader};
pub use vif::{normalize_vib, Quantity, Unit, VifModifier};
