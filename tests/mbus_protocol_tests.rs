use std::time::Duration;

use mbus_master::constants::{MBUS_CONTROL_INFO_RESP_VARIABLE, MBUS_CONTROL_MASK_RSP_UD};
use mbus_master::mbus::frame::{encode_frame, MBusFrame};
use mbus_master::mbus::serial_mock::{MockChannel, MockReply};
use mbus_master::payload::TelegramBody;
use mbus_master::util::hex::decode_hex;
use mbus_master::{
    DeviceAddress, DeviceEntry, DeviceRegistry, EngineConfig, MBusError, MBusMaster,
    StreamChannel, Transaction, TransactionState,
};

// LSE hot water meter at primary address 5, secondary 0800649165329906.
const DEVICE_1_HEX: &str = "685E5E680805729164000865329906DA0000000C13000000000B22864004046D240A611C326C00000C789164000806FD0C0A000100FA010DFD0B05313248465701FD0E004C1300000000426C5F1C0F37FD170000000000000000027A2500027825008216";

/// 12-byte variable data header for identification 12345678.
const HEADER: [u8; 12] = [
    0x78, 0x56, 0x34, 0x12, 0x2D, 0x2C, 0x01, 0x07, 0x10, 0x00, 0x00, 0x00,
];

fn rsp_ud(address: u8, records: &[u8]) -> MBusFrame {
    let mut data = HEADER.to_vec();
    data.extend_from_slice(records);
    MBusFrame::Long {
        control: MBUS_CONTROL_MASK_RSP_UD,
        address,
        control_information: MBUS_CONTROL_INFO_RESP_VARIABLE,
        data,
    }
}

fn device_1_reply() -> MockReply {
    MockReply::Bytes(decode_hex(DEVICE_1_HEX).unwrap())
}

fn quick_config(max_retries: u8) -> EngineConfig {
    EngineConfig {
        timeout: Duration::from_millis(20),
        max_retries,
        max_frames: 4,
        drain_timeout: Duration::from_millis(5),
    }
}

fn master(mock: &MockChannel, max_retries: u8) -> MBusMaster<MockChannel> {
    MBusMaster::with_config(mock.clone(), quick_config(max_retries)).unwrap()
}

#[tokio::test]
async fn test_ping_writes_snd_nke() {
    let mock = MockChannel::new();
    mock.queue_reply(MockReply::ack());

    master(&mock, 0).ping(1).await.unwrap();
    assert_eq!(mock.written(), vec![vec![0x10, 0x40, 0x01, 0x41, 0x16]]);
}

#[tokio::test]
async fn test_invalid_primary_address_writes_nothing() {
    let mock = MockChannel::new();
    let master = master(&mock, 3);

    for address in [251, 253, 254, 255] {
        assert_eq!(master.ping(address).await, Err(MBusError::InvalidAddress(address)));
        assert!(master.request_data(address).await.is_err());
    }
    assert_eq!(mock.write_count(), 0);
}

#[tokio::test]
async fn test_timeout_retries_then_exhausted() {
    let mock = MockChannel::new();
    mock.queue_replies(MockReply::Silence, 3);

    let err = master(&mock, 2).ping(1).await.unwrap_err();
    match err {
        MBusError::RetriesExhausted { attempts, last } => {
            assert_eq!(attempts, 3);
            assert_eq!(*last, MBusError::Timeout);
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert_eq!(mock.write_count(), 3);
    // Every attempt re-sends the identical frame
    assert!(mock.written().iter().all(|w| w == &mock.written()[0]));
}

#[tokio::test]
async fn test_checksum_error_is_retried() {
    let mock = MockChannel::new();
    let mut corrupt = encode_frame(&rsp_ud(5, &[0x04, 0x13, 0x2A, 0x00, 0x00, 0x00])).unwrap();
    let checksum = corrupt.len() - 2;
    corrupt[checksum] ^= 0xFF;
    mock.queue_reply(MockReply::Bytes(corrupt));
    mock.queue_reply(MockReply::frame(&rsp_ud(5, &[0x04, 0x13, 0x2A, 0x00, 0x00, 0x00])));

    let telegram = master(&mock, 1).request_data(5).await.unwrap();
    assert_eq!(telegram.identification(), Some(12_345_678));
    assert_eq!(telegram.records().len(), 1);
    assert_eq!(mock.write_count(), 2);
}

#[tokio::test]
async fn test_response_split_over_reads() {
    let mock = MockChannel::new();
    let bytes = decode_hex(DEVICE_1_HEX).unwrap();
    let chunks = bytes.chunks(7).map(<[u8]>::to_vec).collect();
    mock.queue_reply(MockReply::Chunks(chunks));

    let telegram = master(&mock, 0).request_data(5).await.unwrap();
    assert_eq!(telegram.records().len(), 10);
    assert_eq!(mock.unread(), 0);
}

#[tokio::test]
async fn test_address_mismatch_is_not_retried() {
    let mock = MockChannel::new();
    mock.queue_replies(MockReply::frame(&rsp_ud(7, &[])), 2);

    let err = master(&mock, 3).request_data(5).await.unwrap_err();
    assert_eq!(
        err,
        MBusError::AddressMismatch {
            expected: "5".into(),
            received: "7".into()
        }
    );
    assert_eq!(mock.write_count(), 1);
}

#[tokio::test]
async fn test_master_direction_reply_is_unexpected() {
    let mock = MockChannel::new();
    mock.queue_reply(MockReply::frame(&MBusFrame::req_ud2(5)));

    let err = master(&mock, 0).request_data(5).await.unwrap_err();
    assert!(matches!(err, MBusError::UnexpectedResponse(_)));
}

#[tokio::test]
async fn test_channel_failure_aborts_without_retry() {
    let mock = MockChannel::new();
    mock.queue_reply(MockReply::Fail("port closed".into()));
    mock.queue_reply(MockReply::ack());

    let master = master(&mock, 3);
    assert_eq!(
        master.ping(1).await,
        Err(MBusError::ChannelError("port closed".into()))
    );
    assert_eq!(mock.write_count(), 1);

    // The engine stays usable
    master.ping(1).await.unwrap();
}

#[tokio::test]
async fn test_stale_bytes_drained_before_next_request() {
    let mock = MockChannel::new();
    let long = encode_frame(&rsp_ud(5, &[])).unwrap();
    mock.queue_reply(MockReply::Bytes(long[..6].to_vec()));
    mock.queue_reply(MockReply::ack());

    let master = master(&mock, 0);
    let err = master.request_data(5).await.unwrap_err();
    assert!(matches!(err, MBusError::RetriesExhausted { attempts: 1, .. }));

    // The rest of the abandoned frame shows up late
    mock.inject_rx(&long[6..]);
    master.ping(5).await.unwrap();
    assert_eq!(mock.unread(), 0);
}

#[tokio::test]
async fn test_application_error_telegram() {
    let mock = MockChannel::new();
    mock.queue_reply(MockReply::Bytes(decode_hex("68040468080170088116").unwrap()));

    let telegram = master(&mock, 0).request_data(1).await.unwrap();
    assert!(matches!(telegram.body, TelegramBody::Error(Some(_))));
}

#[tokio::test]
async fn test_request_all_toggles_fcb() {
    let mock = MockChannel::new();
    mock.queue_reply(MockReply::frame(&rsp_ud(3, &[0x04, 0x13, 0x01, 0x00, 0x00, 0x00, 0x1F])));
    mock.queue_reply(MockReply::frame(&rsp_ud(3, &[0x04, 0x13, 0x02, 0x00, 0x00, 0x00, 0x1F])));
    mock.queue_reply(MockReply::frame(&rsp_ud(3, &[0x04, 0x13, 0x03, 0x00, 0x00, 0x00])));

    let telegrams = master(&mock, 0).request_all(3).await.unwrap();
    assert_eq!(telegrams.len(), 3);
    assert!(telegrams[0].more_records_follow());
    assert!(!telegrams[2].more_records_follow());

    let controls: Vec<u8> = mock.written().iter().map(|w| w[1]).collect();
    assert_eq!(controls, vec![0x7B, 0x5B, 0x7B]);
}

#[tokio::test]
async fn test_request_all_stops_at_max_frames() {
    let mock = MockChannel::new();
    mock.queue_replies(MockReply::frame(&rsp_ud(3, &[0x1F])), 10);

    let telegrams = master(&mock, 0).request_all(3).await.unwrap();
    assert_eq!(telegrams.len(), 4);
    assert_eq!(mock.write_count(), 4);
}

#[tokio::test]
async fn test_secondary_selection_and_request() {
    let mock = MockChannel::new();
    mock.queue_reply(MockReply::ack());
    mock.queue_reply(device_1_reply());

    let master = master(&mock, 0);
    let mask = "08006491FFFFFFFF".parse().unwrap();
    let telegram = master.request_secondary(&mask).await.unwrap();
    assert_eq!(telegram.identification(), Some(8_006_491));

    let written = mock.written();
    assert_eq!(
        written[0],
        vec![
            0x68, 0x0B, 0x0B, 0x68, 0x73, 0xFD, 0x52, 0x91, 0x64, 0x00, 0x08, 0xFF, 0xFF, 0xFF,
            0xFF, 0xBB, 0x16
        ]
    );
    assert_eq!(written[1], vec![0x10, 0x5B, 0xFD, 0x58, 0x16]);
}

#[tokio::test]
async fn test_selection_without_answer() {
    let mock = MockChannel::new();
    mock.queue_reply(MockReply::Silence);

    let mask = "12345678FFFFFFFF".parse().unwrap();
    let m = master(&mock, 3);
    let result = m.select_secondary(&mask).await;
    assert!(matches!(result, Err(MBusError::NoDeviceSelected)));
    // Selection is never retried
    assert_eq!(mock.write_count(), 1);
}

#[tokio::test]
async fn test_selection_collisions() {
    let mask = "FFFFFFFFFFFFFFFF".parse().unwrap();
    let replies = [
        MockReply::Bytes(vec![0xE5, 0xE5]),
        MockReply::Bytes(vec![0x3C, 0x00]),
        MockReply::Chunks(vec![vec![0xE5], vec![0xE5]]),
        MockReply::frame(&rsp_ud(1, &[])),
    ];

    for reply in replies {
        let mock = MockChannel::new();
        mock.queue_reply(reply.clone());
        let m = master(&mock, 3);
    let result = m.select_secondary(&mask).await;
        assert!(
            matches!(result, Err(MBusError::SelectionCollision)),
            "{reply:?} gave {:?}",
            result.err()
        );
    }
}

#[tokio::test]
async fn test_selection_holds_the_bus() {
    let mock = MockChannel::new();
    mock.queue_replies(MockReply::ack(), 2);

    let master = master(&mock, 0);
    let mask = "08006491FFFFFFFF".parse().unwrap();
    let selection = master.select_secondary(&mask).await.unwrap();
    assert_eq!(selection.mask(), &mask);

    let other = "12345678FFFFFFFF".parse().unwrap();
    assert!(matches!(
        master.try_select_secondary(&other).await,
        Err(MBusError::BusBusy)
    ));

    drop(selection);
    assert!(master.try_select_secondary(&other).await.is_ok());
}

#[tokio::test]
async fn test_selected_device_must_match_mask() {
    let mock = MockChannel::new();
    mock.queue_reply(MockReply::ack());
    mock.queue_reply(device_1_reply());

    let master = master(&mock, 0);
    let mask = "12345678FFFFFFFF".parse().unwrap();
    let mut selection = master.select_secondary(&mask).await.unwrap();
    let err = selection.request_data().await.unwrap_err();
    assert!(matches!(err, MBusError::AddressMismatch { .. }));
}

#[tokio::test]
async fn test_read_device_uses_registry_name() {
    let mock = MockChannel::new();
    mock.queue_reply(device_1_reply());
    mock.queue_reply(MockReply::ack());
    mock.queue_reply(device_1_reply());

    let registry = DeviceRegistry::new();
    registry.insert(DeviceEntry::new("hot-water", DeviceAddress::Primary(5)));
    registry.insert(DeviceEntry::new(
        "hot-water-secondary",
        DeviceAddress::Secondary("0800649165329906".parse().unwrap()),
    ));
    let master = master(&mock, 0).with_registry(registry);

    let readout = master.read_device(&DeviceAddress::Primary(5)).await.unwrap();
    assert_eq!(readout.name.as_deref(), Some("hot-water"));
    assert_eq!(readout.manufacturer.as_deref(), Some("Landis & Staefa"));
    assert_eq!(readout.telegrams.len(), 1);
    assert_eq!(readout.readings.len(), 11);

    let readout = master.read_registered("hot-water-secondary").await.unwrap();
    assert_eq!(readout.name.as_deref(), Some("hot-water-secondary"));
    assert_eq!(readout.readings.len(), 11);

    let json = serde_json::to_value(&readout).unwrap();
    assert_eq!(json["address"]["secondary"], "0800649165329906");
    assert_eq!(json["manufacturer"], "Landis & Staefa");
    assert!(json.get("telegrams").is_none());

    assert!(matches!(
        master.read_registered("unknown").await,
        Err(MBusError::DeviceNotFound(_))
    ));
}

#[tokio::test]
async fn test_read_registered_without_registry() {
    let mock = MockChannel::new();
    let result = master(&mock, 0).read_registered("hot-water").await;
    assert!(matches!(result, Err(MBusError::ConfigError(_))));
}

#[tokio::test]
async fn test_switch_baudrate() {
    let mock = MockChannel::new();
    mock.queue_reply(MockReply::ack());

    let master = master(&mock, 0);
    master.switch_baudrate(1, 9600).await.unwrap();
    assert_eq!(
        mock.written()[0],
        vec![0x68, 0x03, 0x03, 0x68, 0x53, 0x01, 0xBD, 0x11, 0x16]
    );

    assert!(matches!(
        master.switch_baudrate(1, 1000).await,
        Err(MBusError::ConfigError(_))
    ));
    assert_eq!(mock.write_count(), 1);
}

#[tokio::test]
async fn test_set_primary_address() {
    let mock = MockChannel::new();
    mock.queue_reply(MockReply::ack());

    let master = master(&mock, 0);
    master.set_primary_address(0, 7).await.unwrap();
    assert_eq!(
        mock.written()[0],
        vec![0x68, 0x06, 0x06, 0x68, 0x53, 0x00, 0x51, 0x01, 0x7A, 0x07, 0x26, 0x16]
    );

    for new_address in [0, 251, 255] {
        assert_eq!(
            master.set_primary_address(7, new_address).await,
            Err(MBusError::InvalidAddress(new_address))
        );
    }
    assert_eq!(mock.write_count(), 1);
}

#[tokio::test]
async fn test_non_ack_reply_to_snd_ud() {
    let mock = MockChannel::new();
    mock.queue_reply(MockReply::frame(&rsp_ud(1, &[])));

    let result = master(&mock, 0).application_reset(1, None).await;
    assert!(matches!(result, Err(MBusError::UnexpectedResponse(_))));
}

#[tokio::test]
async fn test_run_reports_transaction_state() {
    let mock = MockChannel::new();
    mock.queue_reply(MockReply::Silence);
    mock.queue_reply(MockReply::ack());

    let master = master(&mock, 2);
    let mut tx = Transaction::new(MBusFrame::snd_nke(9), master.config().max_retries);
    assert_eq!(master.run(&mut tx).await, Ok(MBusFrame::Ack));
    assert_eq!(tx.state(), TransactionState::Completed);
    assert_eq!(tx.attempts(), 2);
    assert!(tx.last_error().is_none());
}

#[tokio::test]
async fn test_invalid_config_rejected() {
    let config = EngineConfig {
        max_frames: 0,
        ..EngineConfig::default()
    };
    assert!(matches!(
        MBusMaster::with_config(MockChannel::new(), config),
        Err(MBusError::ConfigError(_))
    ));
}

#[tokio::test]
async fn test_requests_on_one_bus_are_serialized() {
    let mock = MockChannel::new();
    mock.queue_replies(MockReply::ack(), 2);

    let master = master(&mock, 0);
    let (a, b) = tokio::join!(master.ping(1), master.ping(2));
    a.unwrap();
    b.unwrap();

    let addresses: Vec<u8> = mock.written().iter().map(|w| w[2]).collect();
    assert_eq!(addresses, vec![1, 2]);
}

#[tokio::test]
async fn test_stream_channel_with_simulated_slave() {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let (master_side, mut slave_side) = tokio::io::duplex(64);
    let slave = tokio::spawn(async move {
        let mut request = [0u8; 5];
        slave_side.read_exact(&mut request).await.unwrap();
        slave_side.write_all(&[0xE5]).await.unwrap();
        request
    });

    let master = MBusMaster::with_config(StreamChannel::new(master_side), quick_config(0)).unwrap();
    master.ping(42).await.unwrap();
    assert_eq!(slave.await.unwrap(), [0x10, 0x40, 0x2A, 0x6A, 0x16]);
}

#[tokio::test]
async fn test_stream_channel_with_scripted_io() {
    let response = decode_hex(DEVICE_1_HEX).unwrap();
    let io = tokio_test::io::Builder::new()
        .write(&[0x10, 0x5B, 0x05, 0x60, 0x16])
        .read(&response)
        .build();

    let master = MBusMaster::with_config(StreamChannel::new(io), quick_config(0)).unwrap();
    let telegram = master.request_data(5).await.unwrap();
    assert_eq!(telegram.header().unwrap().manufacturer_code(), "LSE");
}

#[tokio::test]
async fn test_cancelled_request_leaves_bus_usable() {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::sync::oneshot;

    let response = decode_hex(DEVICE_1_HEX).unwrap();
    let (head, tail) = response.split_at(10);
    let (head, tail) = (head.to_vec(), tail.to_vec());

    let (master_side, mut slave_side) = tokio::io::duplex(512);
    let (release_tail, tail_released) = oneshot::channel::<()>();
    let (tail_sent, tail_written) = oneshot::channel::<()>();

    let slave = tokio::spawn(async move {
        let mut request = [0u8; 5];
        slave_side.read_exact(&mut request).await.unwrap();
        slave_side.write_all(&head).await.unwrap();

        // The rest of the abandoned frame shows up after the caller gave up.
        tail_released.await.unwrap();
        slave_side.write_all(&tail).await.unwrap();
        tail_sent.send(()).unwrap();

        let mut ping = [0u8; 5];
        slave_side.read_exact(&mut ping).await.unwrap();
        slave_side.write_all(&[0xE5]).await.unwrap();

        let mut again = [0u8; 5];
        slave_side.read_exact(&mut again).await.unwrap();
        slave_side.write_all(&response).await.unwrap();
        (request, ping, again)
    });

    let config = EngineConfig {
        timeout: Duration::from_millis(500),
        max_retries: 0,
        max_frames: 4,
        drain_timeout: Duration::from_millis(20),
    };
    let master = MBusMaster::with_config(StreamChannel::new(master_side), config).unwrap();

    let cancelled = tokio::time::timeout(Duration::from_millis(50), master.request_data(5)).await;
    assert!(cancelled.is_err());

    release_tail.send(()).unwrap();
    tail_written.await.unwrap();

    master.ping(5).await.unwrap();
    let telegram = master.request_data(5).await.unwrap();
    assert_eq!(telegram.header().unwrap().identification(), Some(8_006_491));

    let (request, ping, again) = slave.await.unwrap();
    assert_eq!(request, [0x10, 0x5B, 0x05, 0x60, 0x16]);
    assert_eq!(ping, [0x10, 0x40, 0x05, 0x45, 0x16]);
    assert_eq!(again, [0x10, 0x5B, 0x05, 0x60, 0x16]);
}
