use log::{debug, log_enabled, Level};

use crate::payload::data::Reading;
use crate::util::hex::format_hex_compact;

/// Frames longer than this are cut in debug dumps.
const MAX_LOG_BYTES: usize = 64;

/// Initializes the logger with the `env_logger` crate.
///
/// The level is taken from `RUST_LOG`, e.g. `RUST_LOG=mbus_master=debug`.
/// Calling it twice is harmless.
pub fn init_logger() {
    let _ = env_logger::try_init();
}

/// Logs frame bytes as hex at debug level, cut to a bounded length.
pub fn log_frame_hex(prefix: &str, data: &[u8]) {
    if !log_enabled!(Level::Debug) {
        return;
    }
    let shown = &data[..data.len().min(MAX_LOG_BYTES)];
    let suffix = if data.len() > MAX_LOG_BYTES {
        format!(" ... ({} bytes total)", data.len())
    } else {
        String::new()
    };
    debug!("{prefix}: {}{suffix}", format_hex_compact(shown));
}

/// One debug line per reading: position, quantity, value and unit, plus the
/// storage/tariff/subunit coordinates when they are not zero.
pub fn log_readings(device: &str, readings: &[Reading]) {
    if !log_enabled!(Level::Debug) {
        return;
    }
    for (i, reading) in readings.iter().enumerate() {
        let mut line = format!("{device} #{i} {} {:?}", reading.quantity, reading.value);
        if !reading.unit.symbol().is_empty() {
            line.push(' ');
            line.push_str(reading.unit.symbol());
        }
        if reading.storage_number != 0 || reading.tariff != 0 || reading.subunit != 0 {
            line.push_str(&format!(
                " [storage {}, tariff {}, subunit {}]",
                reading.storage_number, reading.tariff, reading.subunit
            ));
        }
        debug!("{line}");
    }
}
