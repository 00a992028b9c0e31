//! # Analog Inputs
//!
//! Sources of raw ADC readings plus the pure rescale that turns a W-bit
//! unsigned reading into a signed 16-bit PCM sample:
//!
//! ```text
//! pcm = (raw - 2^(W-1)) * 2^(16-W)
//! ```
//!
//! ## Available Inputs:
//! - **SyntheticTone**: deterministic sine wave, no hardware required
//! - **IioChannel**: Linux Industrial I/O sysfs channel (`in_voltageN_raw`)

use crate::config::{AdcSource, AudioConfig};
use crate::error::{NodeError, NodeResult};
use std::f64::consts::TAU;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use tracing::info;

/// One analog channel read at the sample clock's cadence.
///
/// Implementations must return quickly: a read that takes longer than the
/// sample interval makes the clock fall behind.
pub trait AnalogInput {
    /// Natural width W of every reading.
    fn resolution_bits(&self) -> u8;

    /// One reading in `0..2^W`.
    fn read_raw(&mut self) -> NodeResult<u16>;
}

/// Largest reading a W-bit converter can produce.
pub fn max_raw(bits: u8) -> u16 {
    ((1u32 << bits) - 1) as u16
}

/// Rescale a W-bit reading to signed 16-bit PCM.
///
/// The midpoint `2^(W-1)` maps to 0 and each raw step is `2^(16-W)` PCM
/// units. Readings above the converter range are clamped to its top.
pub fn rescale(raw: u16, bits: u8) -> i16 {
    let raw = i32::from(raw.min(max_raw(bits)));
    let midpoint = 1i32 << (bits - 1);
    let scale = 1i32 << (16 - bits);
    ((raw - midpoint) * scale) as i16
}

/// Sine tone generator standing in for a microphone.
///
/// Same configuration, same sequence: two generators built alike produce
/// identical readings.
pub struct SyntheticTone {
    bits: u8,
    phase: f64,
    step: f64,
    amplitude: f64,
}

impl SyntheticTone {
    pub fn new(bits: u8, tone_hz: f64, sample_rate: u32) -> Self {
        let midpoint = f64::from(1u32 << (bits - 1));
        Self {
            bits,
            phase: 0.0,
            step: TAU * tone_hz / f64::from(sample_rate.max(1)),
            amplitude: midpoint * 0.8,
        }
    }
}

impl AnalogInput for SyntheticTone {
    fn resolution_bits(&self) -> u8 {
        self.bits
    }

    fn read_raw(&mut self) -> NodeResult<u16> {
        let midpoint = f64::from(1u32 << (self.bits - 1));
        let value = midpoint + self.amplitude * self.phase.sin();
        self.phase = (self.phase + self.step) % TAU;
        Ok((value.round() as u16).min(max_raw(self.bits)))
    }
}

/// Linux IIO channel exposed through sysfs.
///
/// The file handle is opened once and rewound for every read so the sample
/// loop never pays for a path lookup.
pub struct IioChannel {
    bits: u8,
    file: File,
    text: String,
}

impl IioChannel {
    pub fn open(path: &str, bits: u8) -> NodeResult<Self> {
        let file = File::open(path).map_err(|e| NodeError::Adc(format!("{}: {}", path, e)))?;
        Ok(Self {
            bits,
            file,
            text: String::with_capacity(8),
        })
    }
}

impl AnalogInput for IioChannel {
    fn resolution_bits(&self) -> u8 {
        self.bits
    }

    fn read_raw(&mut self) -> NodeResult<u16> {
        self.text.clear();
        self.file
            .seek(SeekFrom::Start(0))
            .and_then(|_| self.file.read_to_string(&mut self.text))
            .map_err(|e| NodeError::Adc(format!("read IIO channel: {}", e)))?;
        let raw: u16 = self
            .text
            .trim()
            .parse()
            .map_err(|_| NodeError::Adc(format!("unparseable IIO reading {:?}", self.text.trim())))?;
        Ok(raw.min(max_raw(self.bits)))
    }
}

/// Build the configured analog input.
pub fn open_input(config: &AudioConfig) -> NodeResult<Box<dyn AnalogInput>> {
    match config.source {
        AdcSource::Synthetic => {
            info!(tone_hz = config.tone_hz, bits = config.adc_bits, "Using synthetic analog input");
            Ok(Box::new(SyntheticTone::new(
                config.adc_bits,
                config.tone_hz,
                config.sample_rate,
            )))
        }
        AdcSource::Iio => {
            info!(path = %config.iio_path, bits = config.adc_bits, "Using IIO analog input");
            Ok(Box::new(IioChannel::open(&config.iio_path, config.adc_bits)?))
        }
    }
}
