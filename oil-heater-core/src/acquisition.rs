//! Thermocouple acquisition: frame decoding, calibration and smoothing.

use alloc::{format, string::String};
use embedded_hal::spi::SpiDevice;
use thiserror::Error;

use crate::config::SMOOTHING_SAMPLES;

/// A thermocouple digitizer that produces one raw frame per read.
pub trait Thermocouple {
    type Error: core::fmt::Debug;

    fn read_frame(&mut self) -> Result<u16, Self::Error>;
}

#[derive(Clone, Copy, Debug, Error)]
pub enum Max6675Error<E: core::fmt::Debug> {
    #[error("spi transfer failed: {0:?}")]
    Spi(E),
}

/// MAX6675 cold-junction-compensated K-type thermocouple digitizer.
///
/// Every read returns the last completed conversion and starts a new one,
/// which takes up to 220ms. Polling faster returns the same value.
pub struct Max6675<SPI> {
    spi: SPI,
}

impl<SPI: SpiDevice> Max6675<SPI> {
    pub fn new(spi: SPI) -> Self {
        Max6675 { spi }
    }
}

impl<SPI: SpiDevice> Thermocouple for Max6675<SPI> {
    type Error = Max6675Error<SPI::Error>;

    fn read_frame(&mut self) -> Result<u16, Self::Error> {
        let mut buf = [0u8; 2];
        self.spi.read(&mut buf).map_err(Max6675Error::Spi)?;
        Ok(u16::from_be_bytes(buf))
    }
}

// Frame layout: D15 dummy sign bit (always 0), D14..D3 temperature in
// 0.25C steps, D2 thermocouple input open, D1 device ID, D0 tri-state.
const FRAME_SIGN_BIT: u16 = 1 << 15;
const FRAME_OPEN_BIT: u16 = 1 << 2;
const FRAME_LSB_C: f32 = 0.25;

/// Decodes a MAX6675 frame into degrees Celsius.
///
/// Returns `None` for any frame the device would not produce with a
/// thermocouple attached: the open-input flag, the sign bit set, or an
/// all-ones frame from a floating MISO line.
pub fn decode_frame(frame: u16) -> Option<f32> {
    if frame == u16::MAX || frame & FRAME_SIGN_BIT != 0 || frame & FRAME_OPEN_BIT != 0 {
        return None;
    }

    Some((frame >> 3) as f32 * FRAME_LSB_C)
}

pub fn celsius_to_fahrenheit(celsius: f32) -> f32 {
    celsius * 9.0 / 5.0 + 32.0
}

pub fn fahrenheit_to_celsius(fahrenheit: f32) -> f32 {
    (fahrenheit - 32.0) * 5.0 / 9.0
}

/// Correction applied to raw thermocouple readings, in Celsius.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Calibration {
    /// Raw readings.
    None,
    /// Adds a fixed offset: reference minus raw at one known temperature.
    SinglePoint { offset_c: f32 },
    /// Corrects offset and scale from two reference points, typically an ice
    /// bath and boiling water.
    TwoPoint {
        raw_low_c: f32,
        raw_high_c: f32,
        ref_low_c: f32,
        ref_high_c: f32,
    },
}

impl Calibration {
    pub fn apply(&self, raw_c: f32) -> f32 {
        match *self {
            Calibration::None => raw_c,
            Calibration::SinglePoint { offset_c } => raw_c + offset_c,
            Calibration::TwoPoint {
                raw_low_c,
                ref_low_c,
                ..
            } => (raw_c - raw_low_c) * self.scale() + ref_low_c,
        }
    }

    fn scale(&self) -> f32 {
        match *self {
            Calibration::TwoPoint {
                raw_low_c,
                raw_high_c,
                ref_low_c,
                ref_high_c,
            } if raw_high_c != raw_low_c => (ref_high_c - ref_low_c) / (raw_high_c - raw_low_c),
            _ => 1.0,
        }
    }

    /// True if the constants leave readings untouched.
    pub fn is_identity(&self) -> bool {
        match *self {
            Calibration::None => true,
            Calibration::SinglePoint { offset_c } => offset_c == 0.0,
            Calibration::TwoPoint {
                raw_low_c,
                raw_high_c,
                ref_low_c,
                ref_high_c,
            } => raw_low_c == ref_low_c && raw_high_c == ref_high_c,
        }
    }

    /// One-line summary for the boot log.
    pub fn describe(&self) -> String {
        let status = if self.is_identity() {
            "not configured"
        } else {
            "calibrated"
        };

        match *self {
            Calibration::None => String::from("calibration: none (raw readings)"),
            Calibration::SinglePoint { offset_c } => {
                format!("calibration: single-point, offset {offset_c:+.2}C, {status}")
            }
            Calibration::TwoPoint { ref_low_c, raw_low_c, .. } => {
                let scale = self.scale();
                let offset = ref_low_c - raw_low_c * scale;
                format!("calibration: two-point, scale {scale:.4}, offset {offset:+.2}C, {status}")
            }
        }
    }
}

/// Moving average over the last `N` samples.
///
/// Until `N` samples have been pushed, averages over the ones available.
pub struct MovingAverage<const N: usize> {
    samples: [f32; N],
    next: usize,
    count: usize,
}

impl<const N: usize> MovingAverage<N> {
    pub const fn new() -> Self {
        MovingAverage {
            samples: [0.0; N],
            next: 0,
            count: 0,
        }
    }

    /// Adds a sample and returns the new average.
    pub fn push(&mut self, sample: f32) -> f32 {
        self.samples[self.next] = sample;
        self.next = (self.next + 1) % N;
        if self.count < N {
            self.count += 1;
        }

        self.average()
    }

    fn average(&self) -> f32 {
        let sum: f32 = self.samples[..self.count].iter().sum();
        sum / self.count as f32
    }
}

impl<const N: usize> Default for MovingAverage<N> {
    fn default() -> Self {
        Self::new()
    }
}

/// Turns raw sensor frames into smoothed Fahrenheit readings.
pub struct TemperatureAcquisition<T> {
    sensor: T,
    calibration: Calibration,
    filter: MovingAverage<SMOOTHING_SAMPLES>,
}

impl<T: Thermocouple> TemperatureAcquisition<T> {
    pub fn new(sensor: T, calibration: Calibration) -> Self {
        TemperatureAcquisition {
            sensor,
            calibration,
            filter: MovingAverage::new(),
        }
    }

    /// Reads the sensor once.
    ///
    /// Returns the smoothed temperature in Fahrenheit, `None` if the sensor
    /// flagged the reading as invalid, or the error if it could not be read
    /// at all. Neither failure touches the filter, so it is seen on the same
    /// tick.
    pub fn read_temperature(&mut self) -> Result<Option<f32>, T::Error> {
        let frame = self.sensor.read_frame()?;
        let Some(raw_c) = decode_frame(frame) else {
            return Ok(None);
        };
        let calibrated_f = celsius_to_fahrenheit(self.calibration.apply(raw_c));

        Ok(Some(self.filter.push(calibrated_f)))
    }

    pub fn sensor_mut(&mut self) -> &mut T {
        &mut self.sensor
    }
}
