//! # Pin selection for the PWM slices
//!
//! Every GPIO is wired to channel A (even pins) or channel B (odd pins) of one PWM slice. Only
//! channel B can act as a counter input, so edge counting is limited to the odd pins.
use rp2040_fm::{NUM_GPIOS, io_bank0::FunctionSelect};

use crate::resources::SliceId;

/// GPIO function role as used by the frequency meter.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PinFunction {
    Pwm,
    Null,
}

impl From<PinFunction> for FunctionSelect {
    fn from(value: PinFunction) -> Self {
        match value {
            PinFunction::Pwm => FunctionSelect::Pwm,
            PinFunction::Null => FunctionSelect::Null,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
#[error("GPIO {gpio} can not be used as PWM counter input")]
pub struct InvalidPinError {
    pub gpio: u8,
}

/// PWM channel of a GPIO.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PwmChannel {
    A,
    B,
}

#[inline]
pub const fn pwm_channel(gpio: u8) -> PwmChannel {
    if gpio & 1 == 0 {
        PwmChannel::A
    } else {
        PwmChannel::B
    }
}

/// A validated GPIO attached to channel B of its slice.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct InputPin {
    gpio: u8,
}

impl InputPin {
    pub const fn new(gpio: u8) -> Result<Self, InvalidPinError> {
        if gpio as usize >= NUM_GPIOS {
            return Err(InvalidPinError { gpio });
        }
        if let PwmChannel::A = pwm_channel(gpio) {
            return Err(InvalidPinError { gpio });
        }
        Ok(Self { gpio })
    }

    #[inline]
    pub const fn gpio(&self) -> u8 {
        self.gpio
    }

    #[inline]
    pub const fn slice(&self) -> SliceId {
        SliceId::from_gpio(self.gpio)
    }
}

/// Validate that `gpio` exists, without restrictions on the channel.
pub const fn validate_gpio(gpio: u8) -> Result<SliceId, InvalidPinError> {
    if gpio as usize >= NUM_GPIOS {
        return Err(InvalidPinError { gpio });
    }
    Ok(SliceId::from_gpio(gpio))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_odd_pins_are_inputs() {
        for gpio in (1..30).step_by(2) {
            let pin = InputPin::new(gpio).unwrap();
            assert_eq!(pin.slice(), SliceId::from_gpio(gpio));
        }
    }

    #[test]
    fn test_even_pins_rejected() {
        for gpio in (0..30).step_by(2) {
            assert_eq!(InputPin::new(gpio), Err(InvalidPinError { gpio }));
        }
    }

    #[test]
    fn test_out_of_bank_rejected() {
        assert!(InputPin::new(31).is_err());
        assert!(validate_gpio(30).is_err());
        assert_eq!(validate_gpio(29).unwrap().index(), 6);
    }
}
