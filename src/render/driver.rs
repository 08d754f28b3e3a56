use std::fmt;

use super::scale_packed;

#[derive(Debug)]
pub enum DriverError {
    FrameLength { expected: usize, actual: usize },
    Hardware(String),
}

impl fmt::Display for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FrameLength { expected, actual } => write!(
                f,
                "frame carries {actual} packed lights, strip has {expected}"
            ),
            Self::Hardware(message) => write!(f, "pixel hardware error: {message}"),
        }
    }
}

impl std::error::Error for DriverError {}

/// Output stage for packed 24-bit light values.
///
/// `write` stages a frame, `show` latches it onto the lights. Brightness is a
/// driver-side scalar applied at show time.
pub trait PixelDriver: Send {
    fn write(&mut self, packed: &[u32]) -> Result<(), DriverError>;
    fn show(&mut self) -> Result<(), DriverError>;
    fn set_brightness(&mut self, brightness: f64);
}

/// Driver with no hardware attached; keeps the last shown frame in memory.
#[derive(Debug)]
pub struct HeadlessDriver {
    light_count: usize,
    staged: Vec<u32>,
    displayed: Vec<u32>,
    brightness: f64,
    shows: u64,
}

impl HeadlessDriver {
    pub fn new(light_count: usize, brightness: f64) -> Self {
        Self {
            light_count,
            staged: vec![0; light_count],
            displayed: vec![0; light_count],
            brightness,
            shows: 0,
        }
    }

    /// Values currently on the (virtual) strip, brightness applied.
    pub fn displayed(&self) -> &[u32] {
        &self.displayed
    }

    pub fn show_count(&self) -> u64 {
        self.shows
    }
}

impl PixelDriver for HeadlessDriver {
    fn write(&mut self, packed: &[u32]) -> Result<(), DriverError> {
        if packed.len() != self.light_count {
            return Err(DriverError::FrameLength {
                expected: self.light_count,
                actual: packed.len(),
            });
        }
        self.staged.copy_from_slice(packed);
        Ok(())
    }

    fn show(&mut self) -> Result<(), DriverError> {
        let brightness = self.brightness;
        for (shown, staged) in self.displayed.iter_mut().zip(&self.staged) {
            *shown = scale_packed(*staged, brightness);
        }
        self.shows += 1;
        Ok(())
    }

    fn set_brightness(&mut self, brightness: f64) {
        self.brightness = brightness.clamp(0.0, 1.0);
    }
}

#[cfg(test)]
mod tests {
    use super::{DriverError, HeadlessDriver, PixelDriver};

    #[test]
    fn show_applies_brightness_to_staged_frame() {
        let mut driver = HeadlessDriver::new(2, 1.0);
        driver.write(&[0x00_ff_00, 0x10_10_10]).expect("matching length");
        driver.set_brightness(0.5);
        driver.show().expect("show should succeed");

        assert_eq!(driver.displayed(), &[0x00_80_00, 0x08_08_08]);
        assert_eq!(driver.show_count(), 1);
    }

    #[test]
    fn rejects_frames_of_wrong_length() {
        let mut driver = HeadlessDriver::new(3, 1.0);
        assert!(matches!(
            driver.write(&[1, 2]),
            Err(DriverError::FrameLength {
                expected: 3,
                actual: 2
            })
        ));
    }
}
