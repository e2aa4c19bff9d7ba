//! # M-Bus Master Transaction Engine
//!
//! This module drives request/response exchanges on one M-Bus segment. An
//! [`MBusMaster`] owns the [`ByteChannel`] behind an async mutex, so every
//! exchange on a bus is serialized; independent buses use independent
//! masters and share nothing but an optional [`DeviceRegistry`].
//!
//! Each request runs as a [`Transaction`]:
//!
//! ```text
//! Pending -> AwaitingResponse -> Completed
//!                             -> TimedOut      (retried)
//!                             -> ChecksumError (retried)
//!                             -> Aborted       (channel failure, not retried)
//! ```
//!
//! A transaction makes at most `1 + max_retries` attempts and re-sends the
//! same frame each time. After an abnormal attempt the channel is drained
//! before the next write so stale bytes never reach the decoder.
//!
//! Secondary addressing is a select frame followed by requests to the
//! network layer address 253. [`MBusMaster::select_secondary`] returns a
//! [`SecondarySelection`] that keeps the bus locked until it is dropped, so
//! no other selection can slip in between.

use std::time::Duration;

use bytes::{Buf, BytesMut};
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, MutexGuard};
use tokio::time::Instant;

use crate::constants::*;
use crate::error::MBusError;
use crate::logging::{log_frame_hex, log_readings};
use crate::mbus::address::{validate_primary, DeviceAddress, SecondaryAddressMask};
use crate::mbus::channel::ByteChannel;
use crate::mbus::frame::{decode_frame, encode_frame, MBusFrame};
use crate::payload::data::{DataRecordDecoder, Reading};
use crate::payload::telegram::Telegram;
use crate::registry::DeviceRegistry;
use crate::vendors::manufacturer::{id_to_manufacturer, manufacturer_name};
use crate::vendors::VendorRegistry;

/// Baud rates a slave can be switched to, in CI order starting at 0xB8.
pub const MBUS_BAUD_RATES: [u32; 8] = [300, 600, 1200, 2400, 4800, 9600, 19200, 38400];

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

/// Timing and retry settings of a master.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// How long to wait for a response to one attempt.
    #[serde(rename = "timeout_ms", with = "millis")]
    pub timeout: Duration,
    /// Re-sends after the first attempt.
    pub max_retries: u8,
    /// Upper bound of telegrams collected by a multi-telegram readout.
    pub max_frames: usize,
    /// Quiet period that ends a drain of stale bytes.
    #[serde(rename = "drain_timeout_ms", with = "millis")]
    pub drain_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::for_baudrate(2400)
    }
}

impl EngineConfig {
    /// Defaults with the response timeout suited to a line speed.
    pub fn for_baudrate(baudrate: u32) -> Self {
        let timeout_ms = match baudrate {
            0..=300 => 1300,
            301..=600 => 800,
            601..=1200 => 500,
            1201..=4800 => 300,
            _ => 200,
        };
        EngineConfig {
            timeout: Duration::from_millis(timeout_ms),
            max_retries: MBUS_DEFAULT_RETRIES,
            max_frames: MBUS_DEFAULT_MAX_FRAMES,
            drain_timeout: Duration::from_millis(50),
        }
    }

    pub fn validate(&self) -> Result<(), MBusError> {
        if self.timeout.is_zero() {
            return Err(MBusError::ConfigError("timeout must be greater than zero".into()));
        }
        if self.max_retries > MBUS_MAX_RETRIES {
            return Err(MBusError::ConfigError(format!(
                "max_retries {} exceeds {MBUS_MAX_RETRIES}",
                self.max_retries
            )));
        }
        if self.max_frames == 0 {
            return Err(MBusError::ConfigError("max_frames must be at least 1".into()));
        }
        Ok(())
    }
}

/// State of a single transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Pending,
    AwaitingResponse,
    Completed,
    TimedOut,
    ChecksumError,
    Aborted,
}

/// One request with its retry bookkeeping. Built per request and run once.
#[derive(Debug, Clone)]
pub struct Transaction {
    request: MBusFrame,
    state: TransactionState,
    attempts: u32,
    max_attempts: u32,
    last_error: Option<MBusError>,
}

impl Transaction {
    pub fn new(request: MBusFrame, max_retries: u8) -> Self {
        Transaction {
            request,
            state: TransactionState::Pending,
            attempts: 0,
            max_attempts: 1 + u32::from(max_retries),
            last_error: None,
        }
    }

    pub fn request(&self) -> &MBusFrame {
        &self.request
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Attempts made so far.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Re-sends still allowed.
    pub fn remaining_retries(&self) -> u32 {
        self.max_attempts.saturating_sub(self.attempts.max(1))
    }

    pub fn last_error(&self) -> Option<&MBusError> {
        self.last_error.as_ref()
    }

    fn begin_attempt(&mut self) {
        self.attempts += 1;
        self.state = TransactionState::Pending;
    }

    fn mark_sent(&mut self) {
        self.state = TransactionState::AwaitingResponse;
    }

    fn mark_completed(&mut self) {
        self.state = TransactionState::Completed;
        self.last_error = None;
    }

    /// Records a failed attempt. Returns true if the request may be sent again.
    fn mark_failed(&mut self, err: &MBusError) -> bool {
        self.state = match err {
            MBusError::Timeout => TransactionState::TimedOut,
            e if e.is_retryable() => TransactionState::ChecksumError,
            _ => TransactionState::Aborted,
        };
        self.last_error = Some(err.clone());
        err.is_retryable() && self.attempts < self.max_attempts
    }
}

/// Everything the bus lock protects.
struct BusState<C> {
    channel: C,
    rx: BytesMut,
    /// The last exchange ended abnormally; drain before the next write.
    dirty: bool,
}

impl<C: ByteChannel> BusState<C> {
    async fn settle(&mut self, quiet: Duration) -> Result<(), MBusError> {
        if !self.dirty && self.rx.is_empty() {
            return Ok(());
        }
        let discarded = self.rx.len() + self.channel.drain(quiet).await?;
        self.rx.clear();
        self.dirty = false;
        if discarded > 0 {
            debug!("Drained {discarded} stale byte(s) before the next request");
        }
        Ok(())
    }

    /// Reads until one complete frame is buffered or the deadline passes.
    async fn receive_frame(&mut self, wait: Duration) -> Result<MBusFrame, MBusError> {
        let deadline = Instant::now() + wait;
        loop {
            if !self.rx.is_empty() {
                match decode_frame(&self.rx) {
                    Ok((frame, used)) => {
                        log_frame_hex("RX", &self.rx[..used]);
                        self.rx.advance(used);
                        return Ok(frame);
                    }
                    Err(MBusError::IncompleteFrame { .. }) => {}
                    Err(e) => {
                        log_frame_hex("RX invalid", &self.rx);
                        return Err(e);
                    }
                }
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(MBusError::Timeout);
            }
            let chunk = self.channel.read(MBUS_READ_CHUNK, deadline - now).await?;
            if chunk.is_empty() {
                return Err(MBusError::Timeout);
            }
            self.rx.extend_from_slice(&chunk);
        }
    }
}

/// Result of reading one device.
#[derive(Debug, Clone, Serialize)]
pub struct Readout {
    pub address: DeviceAddress,
    /// Registry name of the device, if a registry is attached and knows it.
    pub name: Option<String>,
    /// Manufacturer of the first telegram, by name when known, else its code.
    pub manufacturer: Option<String>,
    #[serde(skip)]
    pub telegrams: Vec<Telegram>,
    pub readings: Vec<Reading>,
}

/// Master side of one M-Bus segment.
pub struct MBusMaster<C> {
    bus: Mutex<BusState<C>>,
    config: EngineConfig,
    decoder: DataRecordDecoder,
    registry: Option<DeviceRegistry>,
}

impl<C> std::fmt::Debug for MBusMaster<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MBusMaster")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl<C: ByteChannel> MBusMaster<C> {
    /// Master with the default configuration.
    pub fn new(channel: C) -> Self {
        MBusMaster {
            bus: Mutex::new(BusState {
                channel,
                rx: BytesMut::with_capacity(MBUS_READ_CHUNK),
                dirty: false,
            }),
            config: EngineConfig::default(),
            decoder: DataRecordDecoder::new(),
            registry: None,
        }
    }

    pub fn with_config(channel: C, config: EngineConfig) -> Result<Self, MBusError> {
        config.validate()?;
        let mut master = Self::new(channel);
        master.config = config;
        Ok(master)
    }

    /// Decodes readings with the given vendor extensions.
    pub fn with_vendors(mut self, vendors: &VendorRegistry) -> Self {
        self.decoder = DataRecordDecoder::with_vendors(vendors);
        self
    }

    pub fn with_registry(mut self, registry: DeviceRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> Option<&DeviceRegistry> {
        self.registry.as_ref()
    }

    pub fn into_channel(self) -> C {
        self.bus.into_inner().channel
    }

    /// Runs a transaction with retries and returns the response frame.
    pub async fn run(&self, transaction: &mut Transaction) -> Result<MBusFrame, MBusError> {
        let mut bus = self.bus.lock().await;
        self.run_locked(&mut bus, transaction).await
    }

    async fn run_locked(
        &self,
        bus: &mut BusState<C>,
        tx: &mut Transaction,
    ) -> Result<MBusFrame, MBusError> {
        let bytes = encode_frame(tx.request())?;

        loop {
            tx.begin_attempt();
            if let Err(e) = bus.settle(self.config.drain_timeout).await {
                tx.mark_failed(&e);
                return Err(e);
            }

            log_frame_hex("TX", &bytes);
            // Cleared only once a response frame is in; a dropped future leaves it set.
            bus.dirty = true;
            if let Err(e) = bus.channel.write(&bytes).await {
                tx.mark_failed(&e);
                return Err(e);
            }
            tx.mark_sent();

            let err = match bus.receive_frame(self.config.timeout).await {
                Ok(frame) => {
                    bus.dirty = false;
                    tx.mark_completed();
                    return Ok(frame);
                }
                Err(e) => e,
            };

            if tx.mark_failed(&err) {
                warn!(
                    "Attempt {}/{} failed ({err}), retrying",
                    tx.attempts, tx.max_attempts
                );
                continue;
            }
            if err.is_retryable() {
                error!("Giving up after {} attempt(s): {err}", tx.attempts);
                return Err(MBusError::RetriesExhausted {
                    attempts: tx.attempts,
                    last: Box::new(err),
                });
            }
            return Err(err);
        }
    }

    async fn exchange_ack(&self, request: MBusFrame) -> Result<(), MBusError> {
        let mut bus = self.bus.lock().await;
        let mut tx = Transaction::new(request, self.config.max_retries);
        match self.run_locked(&mut bus, &mut tx).await? {
            MBusFrame::Ack => Ok(()),
            other => {
                bus.dirty = true;
                Err(MBusError::UnexpectedResponse(format!(
                    "{:?} frame instead of acknowledge",
                    other.frame_type()
                )))
            }
        }
    }

    /// Sends REQ_UD2 and parses the answer. `expected` is the primary address
    /// the response must carry, `None` after a secondary selection.
    async fn exchange_telegram(
        &self,
        bus: &mut BusState<C>,
        request: MBusFrame,
        expected: Option<u8>,
    ) -> Result<Telegram, MBusError> {
        let mut tx = Transaction::new(request, self.config.max_retries);
        let frame = self.run_locked(bus, &mut tx).await?;

        if frame.is_master_to_slave() {
            bus.dirty = true;
            return Err(MBusError::UnexpectedResponse("frame sent in master direction".into()));
        }
        if let (Some(expected), Some(received)) = (expected, frame.address()) {
            if expected != received {
                warn!("Response from address {received} while talking to {expected}");
                return Err(MBusError::AddressMismatch {
                    expected: expected.to_string(),
                    received: received.to_string(),
                });
            }
        }
        Telegram::from_frame(&frame)
    }

    async fn collect_telegrams(
        &self,
        bus: &mut BusState<C>,
        address: u8,
        expected: Option<u8>,
    ) -> Result<Vec<Telegram>, MBusError> {
        let mut telegrams = Vec::new();
        let mut fcb = true;
        loop {
            let telegram = self
                .exchange_telegram(bus, MBusFrame::req_ud2_fcb(address, fcb), expected)
                .await?;
            let more = telegram.more_records_follow();
            telegrams.push(telegram);

            if !more {
                break;
            }
            if telegrams.len() >= self.config.max_frames {
                warn!(
                    "Device {address} still has more records after {} telegram(s), stopping",
                    telegrams.len()
                );
                break;
            }
            fcb = !fcb;
        }
        Ok(telegrams)
    }

    /// SND_NKE; succeeds when the slave acknowledges.
    pub async fn ping(&self, address: u8) -> Result<(), MBusError> {
        validate_primary(address)?;
        self.exchange_ack(MBusFrame::snd_nke(address)).await
    }

    /// REQ_UD2 to a primary address.
    pub async fn request_data(&self, address: u8) -> Result<Telegram, MBusError> {
        validate_primary(address)?;
        let mut bus = self.bus.lock().await;
        self.exchange_telegram(&mut bus, MBusFrame::req_ud2(address), Some(address))
            .await
    }

    /// Collects every telegram of a multi-telegram readout, toggling FCB
    /// while the slave announces more records.
    pub async fn request_all(&self, address: u8) -> Result<Vec<Telegram>, MBusError> {
        validate_primary(address)?;
        let mut bus = self.bus.lock().await;
        self.collect_telegrams(&mut bus, address, Some(address)).await
    }

    /// SND_UD with an arbitrary CI and payload.
    pub async fn send_user_data(
        &self,
        address: u8,
        control_information: u8,
        data: &[u8],
    ) -> Result<(), MBusError> {
        validate_primary(address)?;
        self.exchange_ack(MBusFrame::snd_ud(address, control_information, data.to_vec()))
            .await
    }

    pub async fn set_primary_address(&self, address: u8, new_address: u8) -> Result<(), MBusError> {
        validate_primary(address)?;
        if !(1..=MBUS_ADDRESS_MAX_PRIMARY).contains(&new_address) {
            return Err(MBusError::InvalidAddress(new_address));
        }
        self.exchange_ack(MBusFrame::set_primary_address(address, new_address))
            .await?;
        info!("Primary address {address} changed to {new_address}");
        Ok(())
    }

    pub async fn application_reset(&self, address: u8, subcode: Option<u8>) -> Result<(), MBusError> {
        validate_primary(address)?;
        self.exchange_ack(MBusFrame::application_reset(address, subcode))
            .await
    }

    /// Tells the slave to continue at another baud rate (300..=38400).
    pub async fn switch_baudrate(&self, address: u8, baudrate: u32) -> Result<(), MBusError> {
        validate_primary(address)?;
        let index = MBUS_BAUD_RATES
            .iter()
            .position(|&b| b == baudrate)
            .ok_or_else(|| MBusError::ConfigError(format!("unsupported baud rate {baudrate}")))?;
        let code = MBUS_CONTROL_INFO_SET_BAUDRATE_300 + index as u8;
        self.exchange_ack(MBusFrame::switch_baudrate(address, code))
            .await
    }

    /// Selects a slave by secondary address, waiting for the bus if needed.
    pub async fn select_secondary(
        &self,
        mask: &SecondaryAddressMask,
    ) -> Result<SecondarySelection<'_, C>, MBusError> {
        let bus = self.bus.lock().await;
        self.select_with(bus, *mask).await
    }

    /// Like [`select_secondary`](Self::select_secondary) but fails with
    /// `BusBusy` instead of waiting.
    pub async fn try_select_secondary(
        &self,
        mask: &SecondaryAddressMask,
    ) -> Result<SecondarySelection<'_, C>, MBusError> {
        let bus = self.bus.try_lock().map_err(|_| MBusError::BusBusy)?;
        self.select_with(bus, *mask).await
    }

    async fn select_with<'a>(
        &'a self,
        mut bus: MutexGuard<'a, BusState<C>>,
        mask: SecondaryAddressMask,
    ) -> Result<SecondarySelection<'a, C>, MBusError> {
        bus.settle(self.config.drain_timeout).await?;

        let bytes = encode_frame(&MBusFrame::select_secondary(mask.to_bytes()))?;
        log_frame_hex("TX select", &bytes);
        bus.dirty = true;
        bus.channel.write(&bytes).await?;

        match bus.receive_frame(self.config.timeout).await {
            Ok(MBusFrame::Ack) => {
                let trailing = if bus.rx.is_empty() {
                    bus.channel
                        .read(MBUS_READ_CHUNK, self.config.drain_timeout)
                        .await?
                        .len()
                } else {
                    bus.rx.len()
                };
                if trailing > 0 {
                    warn!("Bytes after the acknowledge of selection {mask}: collision");
                    return Err(MBusError::SelectionCollision);
                }
                bus.dirty = false;
                debug!("Selected {mask}");
                Ok(SecondarySelection {
                    master: self,
                    bus,
                    mask,
                })
            }
            Ok(other) => {
                warn!("{:?} frame in reply to selection {mask}", other.frame_type());
                Err(MBusError::SelectionCollision)
            }
            Err(MBusError::Timeout) if bus.rx.is_empty() => {
                debug!("No device answered selection {mask}");
                Err(MBusError::NoDeviceSelected)
            }
            Err(e @ MBusError::ChannelError(_)) => Err(e),
            Err(e) => {
                warn!("Garbled reply to selection {mask}: {e}");
                Err(MBusError::SelectionCollision)
            }
        }
    }

    /// Select and request as one exchange.
    pub async fn request_secondary(&self, mask: &SecondaryAddressMask) -> Result<Telegram, MBusError> {
        let mut selection = self.select_secondary(mask).await?;
        selection.request_data().await
    }

    /// Reads a device and decodes all of its telegrams.
    pub async fn read_device(&self, device: &DeviceAddress) -> Result<Readout, MBusError> {
        let telegrams = match device {
            DeviceAddress::Primary(address) => self.request_all(*address).await?,
            DeviceAddress::Secondary(mask) => {
                let mut selection = self.select_secondary(mask).await?;
                selection.request_all().await?
            }
        };

        let readings = telegrams
            .iter()
            .flat_map(|t| self.decoder.decode_telegram(t))
            .collect::<Vec<_>>();
        let name = self
            .registry
            .as_ref()
            .and_then(|r| r.lookup(device).ok())
            .map(|entry| entry.name);
        let manufacturer = telegrams
            .iter()
            .find_map(|t| t.header())
            .map(|h| match manufacturer_name(h.manufacturer) {
                Some(known) => known.to_string(),
                None => id_to_manufacturer(h.manufacturer),
            });
        info!(
            "Read {} reading(s) in {} telegram(s) from {device} ({})",
            readings.len(),
            telegrams.len(),
            manufacturer.as_deref().unwrap_or("unknown manufacturer")
        );
        let label = name.clone().unwrap_or_else(|| device.to_string());
        log_readings(&label, &readings);

        Ok(Readout {
            address: *device,
            name,
            manufacturer,
            telegrams,
            readings,
        })
    }

    /// Reads a device known to the attached registry by name.
    pub async fn read_registered(&self, name: &str) -> Result<Readout, MBusError> {
        let registry = self
            .registry
            .as_ref()
            .ok_or_else(|| MBusError::ConfigError("no device registry attached".into()))?;
        let entry = registry.get(name)?;
        self.read_device(&entry.address).await
    }
}

/// A selected slave. Holds the bus until dropped.
pub struct SecondarySelection<'a, C> {
    master: &'a MBusMaster<C>,
    bus: MutexGuard<'a, BusState<C>>,
    mask: SecondaryAddressMask,
}

impl<C: ByteChannel> SecondarySelection<'_, C> {
    pub fn mask(&self) -> &SecondaryAddressMask {
        &self.mask
    }

    /// REQ_UD2 to the network layer address.
    pub async fn request_data(&mut self) -> Result<Telegram, MBusError> {
        let telegram = self
            .master
            .exchange_telegram(&mut self.bus, MBusFrame::req_ud2(MBUS_ADDRESS_NETWORK_LAYER), None)
            .await?;
        self.check_selected(&telegram)?;
        Ok(telegram)
    }

    /// Multi-telegram readout of the selected slave.
    pub async fn request_all(&mut self) -> Result<Vec<Telegram>, MBusError> {
        let telegrams = self
            .master
            .collect_telegrams(&mut self.bus, MBUS_ADDRESS_NETWORK_LAYER, None)
            .await?;
        for telegram in &telegrams {
            self.check_selected(telegram)?;
        }
        Ok(telegrams)
    }

    fn check_selected(&self, telegram: &Telegram) -> Result<(), MBusError> {
        let Some(header) = telegram.header() else {
            return Ok(());
        };
        let address = header.secondary_address()?;
        if self.mask.matches(&address) {
            Ok(())
        } else {
            Err(MBusError::AddressMismatch {
                expected: self.mask.to_string(),
                received: address.to_string(),
            })
        }
    }
}
