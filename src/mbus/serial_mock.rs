//! Mock byte channel for testing
//!
//! `MockChannel` plays the slave side of a bus without hardware. Each master
//! write consumes the next scripted [`MockReply`], whose bytes then become
//! readable. The mock is cheap to clone; clones share the same script and
//! the same record of written frames, so a test keeps one clone for
//! inspection while the engine owns another.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use crate::error::MBusError;
use crate::mbus::channel::ByteChannel;
use crate::mbus::frame::{encode_frame, MBusFrame};

/// Scripted reaction of the simulated slave to one master write.
#[derive(Debug, Clone, PartialEq)]
pub enum MockReply {
    /// Nothing is sent back; reads time out.
    Silence,
    /// The bytes arrive in one read.
    Bytes(Vec<u8>),
    /// The bytes arrive split over several reads.
    Chunks(Vec<Vec<u8>>),
    /// The next read fails with a channel error.
    Fail(String),
}

impl MockReply {
    /// Reply with an encoded frame.
    pub fn frame(frame: &MBusFrame) -> Self {
        match encode_frame(frame) {
            Ok(bytes) => MockReply::Bytes(bytes),
            Err(e) => MockReply::Fail(e.to_string()),
        }
    }

    pub fn ack() -> Self {
        MockReply::Bytes(vec![0xE5])
    }
}

#[derive(Debug, Default)]
struct MockState {
    script: VecDeque<MockReply>,
    pending: VecDeque<Vec<u8>>,
    failure: Option<String>,
    written: Vec<Vec<u8>>,
    reads: usize,
}

/// Mock channel that simulates the slave side of the bus
#[derive(Debug, Clone, Default)]
pub struct MockChannel {
    state: Arc<Mutex<MockState>>,
}

impl MockChannel {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Appends a reply for the next unanswered write.
    pub fn queue_reply(&self, reply: MockReply) {
        self.lock().script.push_back(reply);
    }

    /// Queues the same reply `n` times.
    pub fn queue_replies(&self, reply: MockReply, n: usize) {
        let mut state = self.lock();
        for _ in 0..n {
            state.script.push_back(reply.clone());
        }
    }

    /// Makes bytes readable right away, before any write (stale line noise).
    pub fn inject_rx(&self, bytes: &[u8]) {
        self.lock().pending.push_back(bytes.to_vec());
    }

    /// Every write the master issued, in order.
    pub fn written(&self) -> Vec<Vec<u8>> {
        self.lock().written.clone()
    }

    pub fn write_count(&self) -> usize {
        self.lock().written.len()
    }

    /// Number of read calls, including those that timed out.
    pub fn read_count(&self) -> usize {
        self.lock().reads
    }

    /// Bytes queued for reading that nobody consumed.
    pub fn unread(&self) -> usize {
        self.lock().pending.iter().map(Vec::len).sum()
    }
}

#[async_trait]
impl ByteChannel for MockChannel {
    async fn write(&mut self, bytes: &[u8]) -> Result<(), MBusError> {
        let mut state = self.lock();
        state.written.push(bytes.to_vec());
        match state.script.pop_front() {
            Some(MockReply::Silence) | None => {}
            Some(MockReply::Bytes(b)) => state.pending.push_back(b),
            Some(MockReply::Chunks(chunks)) => state.pending.extend(chunks),
            Some(MockReply::Fail(reason)) => state.failure = Some(reason),
        }
        Ok(())
    }

    /// Never sleeps: an empty queue reports the timeout immediately.
    async fn read(&mut self, max_bytes: usize, _timeout: Duration) -> Result<Vec<u8>, MBusError> {
        let mut state = self.lock();
        state.reads += 1;
        if let Some(reason) = state.failure.take() {
            return Err(MBusError::ChannelError(reason));
        }
        let Some(mut chunk) = state.pending.pop_front() else {
            return Ok(Vec::new());
        };
        if chunk.len() > max_bytes {
            let rest = chunk.split_off(max_bytes);
            state.pending.push_front(rest);
        }
        Ok(chunk)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_replies_follow_writes() {
        let mock = MockChannel::new();
        mock.queue_reply(MockReply::ack());
        mock.queue_reply(MockReply::Silence);

        let mut channel = mock.clone();
        assert!(channel.read(16, Duration::ZERO).await.unwrap().is_empty());

        channel.write(&[0x10, 0x40, 0x01, 0x41, 0x16]).await.unwrap();
        assert_eq!(channel.read(16, Duration::ZERO).await.unwrap(), vec![0xE5]);

        channel.write(&[0x10, 0x40, 0x01, 0x41, 0x16]).await.unwrap();
        assert!(channel.read(16, Duration::ZERO).await.unwrap().is_empty());

        assert_eq!(mock.write_count(), 2);
        assert_eq!(mock.read_count(), 3);
    }

    #[tokio::test]
    async fn test_chunks_and_max_bytes() {
        let mock = MockChannel::new();
        mock.queue_reply(MockReply::Chunks(vec![vec![1, 2, 3], vec![4]]));
        let mut channel = mock.clone();
        channel.write(&[0]).await.unwrap();

        assert_eq!(channel.read(2, Duration::ZERO).await.unwrap(), vec![1, 2]);
        assert_eq!(mock.unread(), 2);
        assert_eq!(channel.read(8, Duration::ZERO).await.unwrap(), vec![3]);
        assert_eq!(channel.read(8, Duration::ZERO).await.unwrap(), vec![4]);
    }

    #[tokio::test]
    async fn test_failure_reply() {
        let mock = MockChannel::new();
        mock.queue_reply(MockReply::Fail("unplugged".into()));
        let mut channel = mock.clone();
        channel.write(&[0]).await.unwrap();
        assert_eq!(
            channel.read(8, Duration::ZERO).await,
            Err(MBusError::ChannelError("unplugged".into()))
        );
    }
}
