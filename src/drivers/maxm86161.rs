// TGM Wearable — MAXM86161 Optical (PPG) Driver
//
// Register-level driver for the Maxim MAXM86161 PPG module. Three LED
// exposures per sample (red, IR, green) are queued in a 128-entry FIFO and
// drained in one burst when the almost-full interrupt fires.

use heapless::Vec;

use super::{apply_sequence, clamp_burst, FifoSensor, FifoStatus, RegOp, RegisterBus};
use crate::config::PPG_SAMPLES_PER_FRAME;
use crate::error::BusError;
use crate::events::PpgSample;

/// Register map.
pub mod reg {
    pub const INT_STAT_1: u8 = 0x00;
    pub const INT_EN_1: u8 = 0x02;
    pub const FIFO_OVF_CNT: u8 = 0x06;
    pub const FIFO_DATA_CNT: u8 = 0x07;
    pub const FIFO_DATA: u8 = 0x08;
    pub const FIFO_CONFIG1: u8 = 0x09;
    pub const FIFO_CONFIG2: u8 = 0x0A;
    pub const SYSTEM_CONTROL: u8 = 0x0D;
    pub const PPG_CONFIG1: u8 = 0x11;
    pub const PPG_CONFIG2: u8 = 0x12;
    pub const LED_SEQ_REG1: u8 = 0x20;
    pub const LED1_PA: u8 = 0x23;
    pub const LED2_PA: u8 = 0x24;
    pub const LED3_PA: u8 = 0x25;
    pub const LED_RANGE1: u8 = 0x2A;
    pub const PART_ID: u8 = 0xFF;
}

/// Exposures per sample: red, IR, green.
pub const COLORS: usize = 3;
const BYTES_PER_EXPOSURE: usize = 3;
const FIFO_DEPTH: usize = 128;
const SAMPLE_MASK: u32 = 0x7FFFF;
const OVF_COUNT_MASK: u8 = 0x7F;

/// LEDs driven by the module. LED1 is green, LED2 IR and LED3 red.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Led {
    Green,
    Infrared,
    Red,
}

impl Led {
    fn pa_register(self) -> u8 {
        match self {
            Self::Green => reg::LED1_PA,
            Self::Infrared => reg::LED2_PA,
            Self::Red => reg::LED3_PA,
        }
    }
}

const FIFO_AFULL_THRESHOLD: u8 = (FIFO_DEPTH - COLORS * PPG_SAMPLES_PER_FRAME) as u8;

const START_SEQUENCE: &[RegOp] = &[
    RegOp::Write {
        register: reg::FIFO_CONFIG1,
        data: &[FIFO_AFULL_THRESHOLD],
        what: "set FIFO almost-full threshold",
    },
    // LEDC1 = LED3 (red), LEDC2 = LED2 (IR), LEDC3 = LED1 (green)
    RegOp::Write {
        register: reg::LED_SEQ_REG1,
        data: &[0x23, 0x01, 0x00],
        what: "set LED sequence",
    },
    // 31 mA range on every LED
    RegOp::Write {
        register: reg::LED_RANGE1,
        data: &[0x00, 0x00],
        what: "set LED range",
    },
    // 8192 nA ADC full scale, maximum pulse width
    RegOp::Write {
        register: reg::PPG_CONFIG1,
        data: &[0b0001_0111],
        what: "set PPG config 1",
    },
    // 50 Hz, no averaging
    RegOp::Write {
        register: reg::PPG_CONFIG2,
        data: &[0b0000_1000],
        what: "set PPG config 2",
    },
    // LEDs stay dark until the wear detector turns them on
    RegOp::Write {
        register: reg::LED1_PA,
        data: &[0x00, 0x00, 0x00],
        what: "set LED pulse amplitude",
    },
    RegOp::Read {
        register: reg::INT_STAT_1,
        len: 2,
        what: "clear interrupt status",
    },
    // Flush, clear A_FULL on FIFO_DATA read, roll over when full
    RegOp::Write {
        register: reg::FIFO_CONFIG2,
        data: &[0b0001_1010],
        what: "flush FIFO",
    },
    RegOp::Write {
        register: reg::INT_EN_1,
        data: &[0b1000_0000],
        what: "enable FIFO interrupt",
    },
    // Low power mode, leave shutdown
    RegOp::Write {
        register: reg::SYSTEM_CONTROL,
        data: &[0b0000_1100],
        what: "enable PPG sensor",
    },
];

const STOP_SEQUENCE: &[RegOp] = &[
    RegOp::Write {
        register: reg::INT_EN_1,
        data: &[0x00],
        what: "disable FIFO interrupt",
    },
    RegOp::Write {
        register: reg::LED1_PA,
        data: &[0x00, 0x00, 0x00],
        what: "turn off LEDs",
    },
    RegOp::Write {
        register: reg::SYSTEM_CONTROL,
        data: &[0b0000_0010],
        what: "enter shutdown",
    },
];

#[derive(Debug, Clone, Copy)]
pub struct Maxm86161 {
    address: u8,
}

impl Maxm86161 {
    pub fn new(address: u8) -> Self {
        Self { address }
    }

    /// Program the pulse amplitude of one LED (0.12 mA/LSB at 31 mA range).
    pub fn set_led_amplitude<B: RegisterBus>(
        &self,
        bus: &mut B,
        led: Led,
        amplitude: u8,
    ) -> Result<(), BusError> {
        bus.write_reg(self.address, led.pa_register(), amplitude)
    }
}

/// Decode raw FIFO bytes, `COLORS` exposures of 3 bytes per sample. Trailing
/// partial samples are ignored.
pub fn decode_samples<const N: usize>(bytes: &[u8], out: &mut Vec<PpgSample, N>) {
    let exposure = |chunk: &[u8]| -> u32 {
        let raw = (u32::from(chunk[0]) << 16) | (u32::from(chunk[1]) << 8) | u32::from(chunk[2]);
        raw & SAMPLE_MASK
    };

    for raw in bytes.chunks_exact(COLORS * BYTES_PER_EXPOSURE) {
        let sample = PpgSample {
            red: exposure(&raw[0..3]),
            ir: exposure(&raw[3..6]),
            green: exposure(&raw[6..9]),
        };
        if out.push(sample).is_err() {
            break;
        }
    }
}

impl FifoSensor for Maxm86161 {
    type Sample = PpgSample;

    const NAME: &'static str = "MAXM86161";
    const PART_ID_REGISTER: u8 = reg::PART_ID;
    const PART_ID: u8 = 0x36;

    fn address(&self) -> u8 {
        self.address
    }

    fn start<B: RegisterBus>(&self, bus: &mut B) -> Result<(), BusError> {
        apply_sequence(bus, self.address, START_SEQUENCE)?;
        log::info!(
            "MAXM86161 started (50 Hz, red/IR/green, {} samples/frame)",
            PPG_SAMPLES_PER_FRAME
        );
        Ok(())
    }

    fn stop<B: RegisterBus>(&self, bus: &mut B) -> Result<(), BusError> {
        apply_sequence(bus, self.address, STOP_SEQUENCE)
    }

    fn read_burst<B: RegisterBus, const N: usize>(
        &self,
        bus: &mut B,
        out: &mut Vec<PpgSample, N>,
    ) -> Result<FifoStatus, BusError> {
        let overflow_count = bus.read_reg(self.address, reg::FIFO_OVF_CNT)? & OVF_COUNT_MASK;
        let entries = usize::from(bus.read_reg(self.address, reg::FIFO_DATA_CNT)?);

        let capacity = N.min(FIFO_DEPTH / COLORS);
        let (count, status) = clamp_burst(entries / COLORS, overflow_count != 0, capacity);
        if status == FifoStatus::Overflow {
            log::warn!(
                "PPG FIFO overflow (entries = {}, lost = {}), keeping {} samples",
                entries,
                overflow_count,
                count
            );
        }

        out.clear();
        if count == 0 {
            return Ok(status);
        }

        let mut raw = [0u8; FIFO_DEPTH * BYTES_PER_EXPOSURE];
        let len = count * COLORS * BYTES_PER_EXPOSURE;
        bus.read_regs(self.address, reg::FIFO_DATA, &mut raw[..len])?;

        decode_samples(&raw[..len], out);
        log::debug!("PPG burst: {} samples", out.len());
        Ok(status)
    }
}
