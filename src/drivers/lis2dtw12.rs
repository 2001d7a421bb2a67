// TGM Wearable — LIS2DTW12 Accelerometer Driver
//
// Register-level driver for the ST LIS2DTW12 3-axis accelerometer with
// embedded temperature sensor. Samples are buffered in the 32-level FIFO and
// the FIFO threshold is routed to INT1.

use heapless::Vec;

use super::{apply_sequence, clamp_burst, FifoSensor, FifoStatus, RegOp, RegisterBus};
use crate::config::ACC_SAMPLES_PER_FRAME;
use crate::error::BusError;
use crate::events::{AccSample, TempSample};

/// Register map.
pub mod reg {
    pub const OUT_T_L: u8 = 0x0D;
    pub const WHO_AM_I: u8 = 0x0F;
    pub const CTRL1: u8 = 0x20;
    pub const CTRL4_INT1_PAD_CTRL: u8 = 0x23;
    pub const CTRL6: u8 = 0x25;
    pub const OUT_X_L: u8 = 0x28;
    pub const FIFO_CTRL: u8 = 0x2E;
    pub const FIFO_SAMPLES: u8 = 0x2F;
    pub const CTRL7: u8 = 0x3F;
}

const FIFO_DEPTH: usize = 32;
const BYTES_PER_SAMPLE: usize = 6;
const FIFO_OVR: u8 = 0x40;
const FIFO_DIFF_MASK: u8 = 0x3F;
/// FIFO mode: stop collecting when full.
const FIFO_MODE_FIFO: u8 = 0x20;

const START_SEQUENCE: &[RegOp] = &[
    RegOp::Write {
        register: reg::FIFO_CTRL,
        data: &[FIFO_MODE_FIFO | ACC_SAMPLES_PER_FRAME as u8],
        what: "set FIFO threshold",
    },
    // Low noise, ±2 g
    RegOp::Write {
        register: reg::CTRL6,
        data: &[0b0000_0100],
        what: "set CTRL6",
    },
    RegOp::Write {
        register: reg::CTRL4_INT1_PAD_CTRL,
        data: &[0b0000_0010],
        what: "route FIFO threshold interrupt to INT1",
    },
    RegOp::Write {
        register: reg::CTRL7,
        data: &[0b0010_0000],
        what: "enable interrupts",
    },
    // 50 Hz, low power mode 4
    RegOp::Write {
        register: reg::CTRL1,
        data: &[0b0100_0011],
        what: "enable accelerometer",
    },
];

const STOP_SEQUENCE: &[RegOp] = &[
    RegOp::Write {
        register: reg::CTRL7,
        data: &[0x00],
        what: "disable interrupts",
    },
    RegOp::Write {
        register: reg::CTRL1,
        data: &[0x00],
        what: "power down accelerometer",
    },
];

#[derive(Debug, Clone, Copy)]
pub struct Lis2dtw12 {
    address: u8,
}

impl Lis2dtw12 {
    pub fn new(address: u8) -> Self {
        Self { address }
    }

    /// Die temperature. 12-bit left-justified, 16 LSB/°C, zero at 25 °C.
    pub fn read_temperature<B: RegisterBus>(&self, bus: &mut B) -> Result<TempSample, BusError> {
        let mut raw = [0u8; 2];
        bus.read_regs(self.address, reg::OUT_T_L, &mut raw)?;
        Ok(temperature_from_raw(raw))
    }
}

pub fn temperature_from_raw(raw: [u8; 2]) -> TempSample {
    let counts = i32::from(i16::from_le_bytes(raw) >> 4);
    let centi = 2500 + counts * 100 / 16;
    TempSample {
        centi: centi.clamp(i32::from(i16::MIN), i32::from(i16::MAX)) as i16,
    }
}

/// Decode raw FIFO bytes, three little-endian axes per sample.
pub fn decode_samples<const N: usize>(bytes: &[u8], out: &mut Vec<AccSample, N>) {
    for raw in bytes.chunks_exact(BYTES_PER_SAMPLE) {
        let sample = AccSample {
            x: i16::from_le_bytes([raw[0], raw[1]]),
            y: i16::from_le_bytes([raw[2], raw[3]]),
            z: i16::from_le_bytes([raw[4], raw[5]]),
        };
        if out.push(sample).is_err() {
            break;
        }
    }
}

impl FifoSensor for Lis2dtw12 {
    type Sample = AccSample;

    const NAME: &'static str = "LIS2DTW12";
    const PART_ID_REGISTER: u8 = reg::WHO_AM_I;
    const PART_ID: u8 = 0x44;

    fn address(&self) -> u8 {
        self.address
    }

    fn start<B: RegisterBus>(&self, bus: &mut B) -> Result<(), BusError> {
        apply_sequence(bus, self.address, START_SEQUENCE)?;
        log::info!("LIS2DTW12 started (±2g, 50Hz LP4, {} samples/frame)", ACC_SAMPLES_PER_FRAME);
        Ok(())
    }

    fn stop<B: RegisterBus>(&self, bus: &mut B) -> Result<(), BusError> {
        apply_sequence(bus, self.address, STOP_SEQUENCE)
    }

    fn read_burst<B: RegisterBus, const N: usize>(
        &self,
        bus: &mut B,
        out: &mut Vec<AccSample, N>,
    ) -> Result<FifoStatus, BusError> {
        let fifo_samples = bus.read_reg(self.address, reg::FIFO_SAMPLES)?;
        let pending = usize::from(fifo_samples & FIFO_DIFF_MASK);

        let capacity = N.min(FIFO_DEPTH);
        let (count, status) = clamp_burst(pending, fifo_samples & FIFO_OVR != 0, capacity);
        if status == FifoStatus::Overflow {
            log::warn!("ACC FIFO overflow (pending = {}), keeping {} samples", pending, count);
        }

        out.clear();
        if count == 0 {
            return Ok(status);
        }

        let mut raw = [0u8; FIFO_DEPTH * BYTES_PER_SAMPLE];
        let len = count * BYTES_PER_SAMPLE;
        bus.read_regs(self.address, reg::OUT_X_L, &mut raw[..len])?;

        decode_samples(&raw[..len], out);
        log::debug!("ACC burst: {} samples", out.len());
        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::I2C_ADDR_LIS2DTW12;
    use crate::testing::FakeBus;
    use pretty_assertions::assert_eq;

    const ADDR: u8 = I2C_ADDR_LIS2DTW12;

    #[test]
    fn decodes_known_motion_burst() {
        let mut out: Vec<AccSample, 4> = Vec::new();
        decode_samples(&[0x10, 0x00, 0x20, 0x00, 0x30, 0x00], &mut out);

        assert_eq!(&out[..], &[AccSample { x: 16, y: 32, z: 48 }]);
    }

    #[test]
    fn decodes_negative_axes() {
        let mut out: Vec<AccSample, 4> = Vec::new();
        decode_samples(&[0xFF, 0xFF, 0x00, 0x80, 0xFF, 0x7F], &mut out);

        assert_eq!(
            &out[..],
            &[AccSample {
                x: -1,
                y: i16::MIN,
                z: i16::MAX
            }]
        );
    }

    #[test]
    fn burst_below_capacity() {
        let mut bus = FakeBus::new();
        bus.set_register(ADDR, reg::FIFO_SAMPLES, 2);
        bus.load_stream(ADDR, reg::OUT_X_L, &[1, 0, 2, 0, 3, 0, 4, 0, 5, 0, 6, 0]);

        let mut out: Vec<AccSample, 10> = Vec::new();
        let status = Lis2dtw12::new(ADDR).read_burst(&mut bus, &mut out).unwrap();

        assert_eq!(status, FifoStatus::Drained);
        assert_eq!(
            &out[..],
            &[AccSample { x: 1, y: 2, z: 3 }, AccSample { x: 4, y: 5, z: 6 }]
        );
        assert_eq!(bus.burst_lengths(ADDR, reg::OUT_X_L), vec![12]);
    }

    #[test]
    fn burst_above_capacity_is_clamped() {
        let mut bus = FakeBus::new();
        bus.set_register(ADDR, reg::FIFO_SAMPLES, 0x80 | 12);
        bus.load_stream(ADDR, reg::OUT_X_L, &[0u8; 12 * 6]);

        let mut out: Vec<AccSample, 10> = Vec::new();
        let status = Lis2dtw12::new(ADDR).read_burst(&mut bus, &mut out).unwrap();

        assert_eq!(status, FifoStatus::Overflow);
        assert_eq!(out.len(), 10);
        assert_eq!(bus.burst_lengths(ADDR, reg::OUT_X_L), vec![60]);
    }

    #[test]
    fn overrun_flag_reads_full_frame() {
        let mut bus = FakeBus::new();
        bus.set_register(ADDR, reg::FIFO_SAMPLES, FIFO_OVR | 0x20);
        bus.load_stream(ADDR, reg::OUT_X_L, &[0u8; 32 * 6]);

        let mut out: Vec<AccSample, 10> = Vec::new();
        let status = Lis2dtw12::new(ADDR).read_burst(&mut bus, &mut out).unwrap();

        assert_eq!(status, FifoStatus::Overflow);
        assert_eq!(out.len(), 10);
    }

    #[test]
    fn data_read_failure_is_a_bus_error() {
        let mut bus = FakeBus::new();
        bus.set_register(ADDR, reg::FIFO_SAMPLES, 3);
        bus.fail_register(ADDR, reg::OUT_X_L);

        let mut out: Vec<AccSample, 10> = Vec::new();
        let err = Lis2dtw12::new(ADDR).read_burst(&mut bus, &mut out).unwrap_err();

        assert_eq!(err.register, reg::OUT_X_L);
    }

    #[test]
    fn temperature_conversion() {
        // 0 LSB is 25 °C
        assert_eq!(temperature_from_raw([0x00, 0x00]).centi, 2500);
        // +5.5 °C = 88 counts, left-justified by 4 bits
        let raw = (88i16 << 4).to_le_bytes();
        assert_eq!(temperature_from_raw(raw).centi, 3050);
        // -1 °C
        let raw = (-16i16 << 4).to_le_bytes();
        assert_eq!(temperature_from_raw(raw).centi, 2400);
    }

    #[test]
    fn read_temperature_uses_both_bytes() {
        let mut bus = FakeBus::new();
        let raw = (40i16 << 4).to_le_bytes();
        bus.set_register(ADDR, reg::OUT_T_L, raw[0]);
        bus.set_register(ADDR, reg::OUT_T_L + 1, raw[1]);

        let temp = Lis2dtw12::new(ADDR).read_temperature(&mut bus).unwrap();
        assert_eq!(temp.centi, 2750);
    }

    #[test]
    fn start_then_stop() {
        let mut bus = FakeBus::new();
        let sensor = Lis2dtw12::new(ADDR);

        sensor.start(&mut bus).unwrap();
        assert_eq!(bus.register(ADDR, reg::FIFO_CTRL), 0x20 | ACC_SAMPLES_PER_FRAME as u8);
        assert_eq!(bus.register(ADDR, reg::CTRL1), 0b0100_0011);
        assert_eq!(bus.register(ADDR, reg::CTRL7), 0b0010_0000);

        sensor.stop(&mut bus).unwrap();
        assert_eq!(bus.register(ADDR, reg::CTRL1), 0x00);
        assert_eq!(bus.register(ADDR, reg::CTRL7), 0x00);
    }

    #[test]
    fn register_passthrough() {
        let mut bus = FakeBus::new();
        let sensor = Lis2dtw12::new(ADDR);

        sensor.write_register(&mut bus, 0x3C, 0x5A).unwrap();
        assert_eq!(sensor.read_register(&mut bus, 0x3C).unwrap(), 0x5A);
    }
}
