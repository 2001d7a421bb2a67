// TGM Wearable — Host test doubles

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::config::I2C_ADDR_MAXM86161;
use crate::drivers::maxm86161::Led;
use crate::drivers::RegisterBus;
use crate::error::{BusError, TransportError};
use crate::events::Channel;
use crate::service::Transport;
use crate::tasks::state::Illumination;
use crate::workqueue::Doorbell;

type Key = (u8, u8);

/// In-memory register file for any number of devices.
///
/// Plain registers auto-increment on bursts. A register loaded with
/// [`FakeBus::load_stream`] behaves like a FIFO data port instead: every
/// byte read from it pops the next queued byte (zero once drained).
#[derive(Debug, Default)]
pub struct FakeBus {
    registers: HashMap<Key, u8>,
    streams: HashMap<Key, VecDeque<u8>>,
    failing: HashSet<Key>,
    failing_writes: HashSet<Key>,
    read_only: HashSet<Key>,
    reads: Vec<(Key, usize)>,
    writes: Vec<(Key, Vec<u8>)>,
}

impl FakeBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_register(&mut self, device: u8, register: u8, value: u8) {
        self.registers.insert((device, register), value);
    }

    pub fn register(&self, device: u8, register: u8) -> u8 {
        self.registers.get(&(device, register)).copied().unwrap_or(0)
    }

    pub fn load_stream(&mut self, device: u8, register: u8, bytes: &[u8]) {
        self.streams
            .entry((device, register))
            .or_default()
            .extend(bytes.iter().copied());
    }

    /// Every transaction starting at `register` fails.
    pub fn fail_register(&mut self, device: u8, register: u8) {
        self.failing.insert((device, register));
    }

    pub fn recover(&mut self, device: u8, register: u8) {
        self.failing.remove(&(device, register));
        self.failing_writes.remove(&(device, register));
    }

    /// Writes starting at `register` fail, reads still succeed.
    pub fn fail_writes(&mut self, device: u8, register: u8) {
        self.failing_writes.insert((device, register));
    }

    /// `register` always reads back `value`; writes are accepted and dropped.
    pub fn read_only(&mut self, device: u8, register: u8, value: u8) {
        self.set_register(device, register, value);
        self.read_only.insert((device, register));
    }

    pub fn reads_of(&self, device: u8, register: u8) -> usize {
        self.reads.iter().filter(|(key, _)| *key == (device, register)).count()
    }

    pub fn burst_lengths(&self, device: u8, register: u8) -> Vec<usize> {
        self.reads
            .iter()
            .filter(|(key, _)| *key == (device, register))
            .map(|&(_, len)| len)
            .collect()
    }

    pub fn writes_to(&self, device: u8, register: u8) -> Vec<Vec<u8>> {
        self.writes
            .iter()
            .filter(|(key, _)| *key == (device, register))
            .map(|(_, data)| data.clone())
            .collect()
    }

    pub fn transactions(&self) -> usize {
        self.reads.len() + self.writes.len()
    }
}

impl RegisterBus for FakeBus {
    fn read_regs(&mut self, device: u8, register: u8, buf: &mut [u8]) -> Result<(), BusError> {
        let key = (device, register);
        if self.failing.contains(&key) {
            return Err(BusError { device, register });
        }
        self.reads.push((key, buf.len()));

        if let Some(stream) = self.streams.get_mut(&key) {
            for byte in buf.iter_mut() {
                *byte = stream.pop_front().unwrap_or(0);
            }
        } else {
            for (offset, byte) in buf.iter_mut().enumerate() {
                *byte = self.register(device, register.wrapping_add(offset as u8));
            }
        }
        Ok(())
    }

    fn write_regs(&mut self, device: u8, register: u8, data: &[u8]) -> Result<(), BusError> {
        let key = (device, register);
        if self.failing.contains(&key) || self.failing_writes.contains(&key) {
            return Err(BusError { device, register });
        }
        self.writes.push((key, data.to_vec()));

        for (offset, &value) in data.iter().enumerate() {
            let target = (device, register.wrapping_add(offset as u8));
            if !self.read_only.contains(&target) {
                self.registers.insert(target, value);
            }
        }
        Ok(())
    }
}

/// Transport that keeps every notification it was handed.
#[derive(Debug, Default)]
pub struct RecordingTransport {
    pub sent: Vec<(Channel, Vec<u8>)>,
    fail: Option<TransportError>,
}

impl RecordingTransport {
    pub fn failing() -> Self {
        Self {
            sent: Vec::new(),
            fail: Some(TransportError::NotConnected),
        }
    }

    pub fn sent_on(&self, channel: Channel) -> Vec<Vec<u8>> {
        self.sent
            .iter()
            .filter(|(c, _)| *c == channel)
            .map(|(_, payload)| payload.clone())
            .collect()
    }
}

impl Transport for RecordingTransport {
    fn notify(&mut self, channel: Channel, payload: &[u8]) -> Result<(), TransportError> {
        if let Some(err) = &self.fail {
            return Err(err.clone());
        }
        self.sent.push((channel, payload.to_vec()));
        Ok(())
    }
}

/// Illumination sink that records LED changes.
#[derive(Debug, Default)]
pub struct RecordingLeds {
    pub calls: Vec<(Led, u8)>,
    pub fail: bool,
}

impl RecordingLeds {
    pub fn failing() -> Self {
        Self {
            calls: Vec::new(),
            fail: true,
        }
    }
}

impl Illumination for RecordingLeds {
    fn set_led(&mut self, led: Led, amplitude: u8) -> Result<(), BusError> {
        self.calls.push((led, amplitude));
        if self.fail {
            return Err(BusError {
                device: I2C_ADDR_MAXM86161,
                register: 0x23,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct CountingDoorbell(AtomicUsize);

impl CountingDoorbell {
    pub fn rings(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

impl Doorbell for CountingDoorbell {
    fn ring(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}
