//! # Edge counter
//!
//! A PWM slice in one of its edge-counting divider modes increments its counter on every rising
//! or falling edge of the channel B input. The counter is 16 bits wide and wraps at the
//! configured TOP value. Each wrap raises the DREQ of the slice, which other components use to pace
//! DMA channels.
//!
//! The count is only stable while the slice is disabled.
use rp2040_fm::pwm::{Csr, Div, DivMode};

use crate::{
    dma::TriggerTag,
    gpio::{InputPin, InvalidPinError, PinFunction},
    hw::{PinMux, PwmBlock},
    resources::{ResourceError, ResourcePool, SliceHandle, SliceId},
};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum EdgePolarity {
    #[default]
    Rising,
    Falling,
}

impl EdgePolarity {
    #[inline]
    pub const fn div_mode(&self) -> DivMode {
        match self {
            EdgePolarity::Rising => DivMode::RisingEdge,
            EdgePolarity::Falling => DivMode::FallingEdge,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CounterError {
    #[error("invalid pin: {0}")]
    Pin(#[from] InvalidPinError),
    #[error("resource error: {0}")]
    Resource(#[from] ResourceError),
}

/// Counts the edges of a signal on one PWM slice.
pub struct EdgeCounter<H> {
    hw: H,
    pin: InputPin,
    polarity: EdgePolarity,
    slice: SliceHandle,
}

impl<H: PwmBlock + PinMux> EdgeCounter<H> {
    /// Claim the slice of `gpio`, configure it as a disabled edge counter and mux the pin to the
    /// PWM function.
    ///
    /// The counter wraps at 0xFFFF after configuration.
    pub fn configure(
        hw: H,
        pool: &mut ResourcePool,
        gpio: u8,
        polarity: EdgePolarity,
    ) -> Result<Self, CounterError> {
        let pin = InputPin::new(gpio)?;
        let slice = pool.claim_slice(pin.slice())?;
        let id = slice.id();
        hw.write_csr(id, Csr::new_with_raw_value(0));
        hw.write_div(id, Div::new_with_raw_value(0).with_int(1));
        hw.write_top(id, u16::MAX);
        hw.write_ctr(id, 0);
        hw.write_csr(
            id,
            Csr::new_with_raw_value(0).with_divmode(polarity.div_mode()),
        );
        hw.set_function(pin.gpio(), PinFunction::Pwm);
        log::debug!(
            "edge counter on GPIO {} (slice {}), {:?} edges",
            gpio,
            id.index(),
            polarity
        );
        Ok(Self {
            hw,
            pin,
            polarity,
            slice,
        })
    }

    /// Set the counter to zero.
    #[inline]
    pub fn reset(&mut self) {
        self.hw.write_ctr(self.slice.id(), 0);
    }

    #[inline]
    pub fn set_enabled(&mut self, enabled: bool) {
        self.hw
            .modify_csr(self.slice.id(), |csr| csr.with_en(enabled));
    }

    #[inline]
    pub fn is_enabled(&self) -> bool {
        self.hw.read_csr(self.slice.id()).en()
    }

    /// Raw counter value. Only a definitive reading if the counter is disabled.
    #[inline]
    pub fn read(&self) -> u16 {
        self.hw.read_ctr(self.slice.id())
    }

    /// Set the TOP value. A wrap of 0 raises the DREQ on every counted edge.
    #[inline]
    pub fn set_wrap(&mut self, wrap: u16) {
        self.hw.write_top(self.slice.id(), wrap);
    }

    #[inline]
    pub fn wrap(&self) -> u16 {
        self.hw.read_top(self.slice.id())
    }

    /// DREQ raised each time the counter wraps.
    #[inline]
    pub const fn trigger_tag(&self) -> TriggerTag {
        TriggerTag::pwm_wrap(self.slice.id())
    }

    /// Current value of the control register.
    #[inline]
    pub fn csr_snapshot(&self) -> Csr {
        self.hw.read_csr(self.slice.id())
    }

    /// Bus address of the control register.
    #[inline]
    pub fn csr_address(&self) -> usize {
        self.hw.csr_address(self.slice.id())
    }

    #[inline]
    pub const fn slice(&self) -> SliceId {
        self.slice.id()
    }

    #[inline]
    pub const fn pin(&self) -> InputPin {
        self.pin
    }

    #[inline]
    pub const fn polarity(&self) -> EdgePolarity {
        self.polarity
    }

    #[inline]
    pub const fn hw(&self) -> &H {
        &self.hw
    }

    /// Disable the slice, disconnect the pin and hand the slice back to the pool.
    pub fn release(mut self, pool: &mut ResourcePool) {
        self.set_enabled(false);
        self.hw.set_function(self.pin.gpio(), PinFunction::Null);
        pool.release_slice(self.slice);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::Sim;

    #[test]
    fn test_configure_rejects_even_pin() {
        let sim = Sim::default();
        let mut pool = ResourcePool::new();
        let result = EdgeCounter::configure(&sim, &mut pool, 4, EdgePolarity::Rising);
        assert_eq!(
            result.err(),
            Some(CounterError::Pin(InvalidPinError { gpio: 4 }))
        );
        assert!(!pool.slice_in_use(SliceId::from_gpio(4)));
    }

    #[test]
    fn test_configure_claims_slice() {
        let sim = Sim::default();
        let mut pool = ResourcePool::new();
        let counter = EdgeCounter::configure(&sim, &mut pool, 5, EdgePolarity::Rising).unwrap();
        assert!(pool.slice_in_use(SliceId::from_gpio(5)));
        assert_eq!(
            EdgeCounter::configure(&sim, &mut pool, 5, EdgePolarity::Rising).err(),
            Some(CounterError::Resource(ResourceError::SliceInUse(2)))
        );
        assert_eq!(sim.pin_function(5), Some(PinFunction::Pwm));
        assert!(!counter.is_enabled());
        assert_eq!(counter.wrap(), u16::MAX);
        counter.release(&mut pool);
        assert!(!pool.slice_in_use(SliceId::from_gpio(5)));
        assert_eq!(sim.pin_function(5), Some(PinFunction::Null));
    }

    #[test]
    fn test_counts_selected_edges() {
        let sim = Sim::default();
        let mut pool = ResourcePool::new();
        let mut counter =
            EdgeCounter::configure(&sim, &mut pool, 9, EdgePolarity::Falling).unwrap();
        counter.set_enabled(true);
        sim.inject_edges(9, true, 5);
        assert_eq!(counter.read(), 0);
        sim.inject_edges(9, false, 7);
        assert_eq!(counter.read(), 7);
        counter.set_enabled(false);
        sim.inject_edges(9, false, 7);
        assert_eq!(counter.read(), 7);
        counter.reset();
        assert_eq!(counter.read(), 0);
    }

    #[test]
    fn test_counter_wraps_at_top() {
        let sim = Sim::default();
        let mut pool = ResourcePool::new();
        let mut counter =
            EdgeCounter::configure(&sim, &mut pool, 1, EdgePolarity::Rising).unwrap();
        counter.set_enabled(true);
        sim.inject_edges(1, true, 65_536 + 10);
        assert_eq!(counter.read(), 10);
    }

    #[test]
    fn test_square_wave_count() {
        let sim = Sim::default();
        let mut pool = ResourcePool::new();
        let mut counter =
            EdgeCounter::configure(&sim, &mut pool, 3, EdgePolarity::Rising).unwrap();
        sim.attach_square_wave(3, crate::time::Hertz::from_raw(10_000));
        counter.set_enabled(true);
        sim.advance_micros(10_000);
        counter.set_enabled(false);
        assert_eq!(counter.read(), 100);
        assert_eq!(counter.trigger_tag().raw(), 25);
        assert_eq!(counter.csr_address(), 0x4005_0014);
    }
}
