// TGM Wearable — Register-level sensor drivers
//
// Drivers are stateless: they hold nothing but their bus address and borrow
// the shared bus for the duration of each call. All calls happen on the work
// queue thread, so the bus needs no lock.

pub mod lis2dtw12;
pub mod maxm86161;

use heapless::Vec;

use crate::error::{BusError, InitError};
use crate::events::WireSample;

/// Byte-register access to devices on a shared bus.
pub trait RegisterBus {
    /// Burst-read starting at `register` into `buf`.
    fn read_regs(&mut self, device: u8, register: u8, buf: &mut [u8]) -> Result<(), BusError>;

    /// Burst-write `data` starting at `register`.
    fn write_regs(&mut self, device: u8, register: u8, data: &[u8]) -> Result<(), BusError>;

    fn read_reg(&mut self, device: u8, register: u8) -> Result<u8, BusError> {
        let mut buf = [0u8; 1];
        self.read_regs(device, register, &mut buf)?;
        Ok(buf[0])
    }

    fn write_reg(&mut self, device: u8, register: u8, value: u8) -> Result<(), BusError> {
        self.write_regs(device, register, &[value])
    }
}

/// One step of a register programming sequence.
#[derive(Debug, Clone, Copy)]
pub enum RegOp {
    Write {
        register: u8,
        data: &'static [u8],
        what: &'static str,
    },
    /// Read and discard, e.g. to clear latched status.
    Read {
        register: u8,
        len: usize,
        what: &'static str,
    },
}

/// Run a register table in order, stopping at the first failed transaction.
pub fn apply_sequence<B: RegisterBus>(
    bus: &mut B,
    device: u8,
    sequence: &[RegOp],
) -> Result<(), BusError> {
    let mut scratch = [0u8; 4];

    for op in sequence {
        let (result, what) = match *op {
            RegOp::Write {
                register,
                data,
                what,
            } => (bus.write_regs(device, register, data), what),
            RegOp::Read {
                register,
                len,
                what,
            } => (
                bus.read_regs(device, register, &mut scratch[..len.min(4)]),
                what,
            ),
        };

        if let Err(e) = result {
            log::error!("Failed to {}: {}", what, e);
            return Err(e);
        }
    }

    Ok(())
}

/// Outcome of a FIFO drain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FifoStatus {
    Drained,
    /// The device lost samples; the burst was clamped to capacity.
    Overflow,
}

/// A FIFO-buffered sensor that signals a watermark interrupt.
pub trait FifoSensor {
    type Sample: WireSample;

    const NAME: &'static str;
    const PART_ID_REGISTER: u8;
    const PART_ID: u8;

    fn address(&self) -> u8;

    /// Program watermark, mode, range and interrupt routing, then enable
    /// sampling. On error the device may be partially configured.
    fn start<B: RegisterBus>(&self, bus: &mut B) -> Result<(), BusError>;

    /// Disable interrupts and power the device down.
    fn stop<B: RegisterBus>(&self, bus: &mut B) -> Result<(), BusError>;

    /// Drain up to `N` pending samples into `out` in a single burst.
    fn read_burst<B: RegisterBus, const N: usize>(
        &self,
        bus: &mut B,
        out: &mut Vec<Self::Sample, N>,
    ) -> Result<FifoStatus, BusError>;

    fn read_register<B: RegisterBus>(&self, bus: &mut B, register: u8) -> Result<u8, BusError> {
        bus.read_reg(self.address(), register)
    }

    fn write_register<B: RegisterBus>(
        &self,
        bus: &mut B,
        register: u8,
        value: u8,
    ) -> Result<(), BusError> {
        bus.write_reg(self.address(), register, value)
    }

    /// Verify the part answers with its identity byte.
    fn probe<B: RegisterBus>(&self, bus: &mut B) -> Result<(), InitError> {
        let found = bus.read_reg(self.address(), Self::PART_ID_REGISTER)?;
        if found != Self::PART_ID {
            return Err(InitError::DeviceNotReady {
                name: Self::NAME,
                found,
                expected: Self::PART_ID,
            });
        }
        Ok(())
    }
}

/// Number of samples to take from a FIFO reporting `available` entries,
/// given a frame of `capacity`. Hardware overflow or a count beyond capacity
/// both clamp to a full frame.
pub(crate) fn clamp_burst(
    available: usize,
    hw_overflow: bool,
    capacity: usize,
) -> (usize, FifoStatus) {
    if hw_overflow || available > capacity {
        (capacity, FifoStatus::Overflow)
    } else {
        (available, FifoStatus::Drained)
    }
}
