//! RS-485 driver-enable line control.
//!
//! On real hardware this is a single GPIO output pin; `rppal` provides that on Linux
//! (Raspberry Pi). Non-device runs (tests, and any non-Linux target) fall back to a mock
//! pin that only tracks the level it was last set to, so the rest of the serial worker's
//! logic can be exercised without hardware.

pub trait DriverEnablePin: Send {
    fn set_high(&mut self);
    fn set_low(&mut self);
}

impl DriverEnablePin for Box<dyn DriverEnablePin> {
    fn set_high(&mut self) {
        (**self).set_high();
    }

    fn set_low(&mut self) {
        (**self).set_low();
    }
}

pub struct MockPin {
    pub high: bool,
}

impl MockPin {
    pub fn new() -> Self {
        Self { high: false }
    }
}

impl Default for MockPin {
    fn default() -> Self {
        Self::new()
    }
}

impl DriverEnablePin for MockPin {
    fn set_high(&mut self) {
        self.high = true;
    }

    fn set_low(&mut self) {
        self.high = false;
    }
}

#[cfg(target_os = "linux")]
pub mod rpi {
    use super::DriverEnablePin;
    use rppal::gpio::{Gpio, OutputPin};

    pub struct RppalPin {
        pin: OutputPin,
    }

    impl RppalPin {
        pub fn open(bcm_pin: u8) -> Result<Self, rppal::gpio::Error> {
            let pin = Gpio::new()?.get(bcm_pin)?.into_output();
            Ok(Self { pin })
        }
    }

    impl DriverEnablePin for RppalPin {
        fn set_high(&mut self) {
            self.pin.set_high();
        }

        fn set_low(&mut self) {
            self.pin.set_low();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_pin_tracks_last_level() {
        let mut pin = MockPin::new();
        assert!(!pin.high);
        pin.set_high();
        assert!(pin.high);
        pin.set_low();
        assert!(!pin.high);
    }
}
