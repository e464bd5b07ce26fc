//! # Gate timer
//!
//! A free-running PWM slice which wraps once per gate period. The wrap raises the DREQ of the
//! slice, which the [crate::gate] controller uses to stop the edge counter.
//!
//! The slice counts system clock cycles through its divider. The divider has an integer part of
//! 1 to 256 (the register encodes 256 as 0), and the 16-bit counter wraps after TOP + 1 ticks. In
//! phase-correct mode the counter counts up to TOP and back down before it wraps, which doubles
//! the period to 2 × (TOP + 1) ticks. The gate period is therefore limited to
//! 256 × 2 × 65536 system clock cycles.
use rp2040_fm::pwm::{Csr, Div};

use crate::{
    dma::TriggerTag,
    gpio::{InvalidPinError, validate_gpio},
    hw::PwmBlock,
    resources::{ResourceError, ResourcePool, SliceHandle, SliceId},
    time::{Hertz, Microseconds},
};

pub const MAX_PRESCALE: u16 = 256;
/// Ticks of one counter period without phase-correct mode.
pub const MAX_TICKS_PLAIN: u64 = 1 << 16;
/// Ticks of one counter period with phase-correct mode.
pub const MAX_TICKS: u64 = 2 * MAX_TICKS_PLAIN;

#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
#[error("prescale value {prescale} is not in range 1..=256")]
pub struct InvalidPrescaleError {
    pub prescale: u16,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
#[error("gate period {requested} is out of range, maximum is {max}")]
pub struct PeriodOutOfRangeError {
    pub requested: Microseconds,
    pub max: Microseconds,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GateTimerError {
    #[error("system clock frequency is zero")]
    ZeroSysClk,
    #[error("invalid prescale: {0}")]
    InvalidPrescale(#[from] InvalidPrescaleError),
    #[error("period out of range: {0}")]
    PeriodOutOfRange(#[from] PeriodOutOfRangeError),
    #[error("invalid pin: {0}")]
    Pin(#[from] InvalidPinError),
    #[error("resource error: {0}")]
    Resource(#[from] ResourceError),
}

/// Divider and TOP settings for one gate period.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct GateTiming {
    prescale: u16,
    top: u16,
    phase_correct: bool,
}

impl GateTiming {
    /// Calculate the slice settings for `period` with a fixed prescaler.
    ///
    /// The number of ticks is rounded to the nearest integer. Phase-correct mode is only used if
    /// the period does not fit into 65536 ticks.
    pub fn calculate(
        sys_clk: Hertz,
        prescale: u16,
        period: Microseconds,
    ) -> Result<Self, GateTimerError> {
        if sys_clk.raw() == 0 {
            return Err(GateTimerError::ZeroSysClk);
        }
        if prescale == 0 || prescale > MAX_PRESCALE {
            return Err(InvalidPrescaleError { prescale }.into());
        }
        let ticks = Self::ticks(sys_clk, prescale, period);
        if ticks == 0 || ticks > MAX_TICKS {
            return Err(PeriodOutOfRangeError {
                requested: period,
                max: Self::max_period(sys_clk, prescale),
            }
            .into());
        }
        if ticks <= MAX_TICKS_PLAIN {
            return Ok(Self {
                prescale,
                top: (ticks - 1) as u16,
                phase_correct: false,
            });
        }
        Ok(Self {
            prescale,
            top: (ticks / 2 - 1) as u16,
            phase_correct: true,
        })
    }

    /// Calculate the slice settings for `period` with the smallest prescaler which can reach it.
    /// The smallest prescaler gives the finest tick resolution.
    pub fn best_for(sys_clk: Hertz, period: Microseconds) -> Result<Self, GateTimerError> {
        if sys_clk.raw() == 0 {
            return Err(GateTimerError::ZeroSysClk);
        }
        for prescale in 1..=MAX_PRESCALE {
            let ticks = Self::ticks(sys_clk, prescale, period);
            if ticks == 0 {
                break;
            }
            if ticks <= MAX_TICKS {
                return Self::calculate(sys_clk, prescale, period);
            }
        }
        Err(PeriodOutOfRangeError {
            requested: period,
            max: Self::max_period(sys_clk, MAX_PRESCALE),
        }
        .into())
    }

    /// Longest gate period which can be configured with `prescale`. Saturates for a zero clock.
    pub fn max_period(sys_clk: Hertz, prescale: u16) -> Microseconds {
        let micros = (MAX_TICKS * prescale as u64 * 1_000_000)
            .checked_div(sys_clk.raw() as u64)
            .unwrap_or(u64::MAX);
        Microseconds::from_ticks(micros.min(u32::MAX as u64) as u32)
    }

    fn ticks(sys_clk: Hertz, prescale: u16, period: Microseconds) -> u64 {
        let divisor = prescale as u64 * 1_000_000;
        (period.ticks() as u64 * sys_clk.raw() as u64 + divisor / 2) / divisor
    }

    #[inline]
    pub const fn prescale(&self) -> u16 {
        self.prescale
    }

    #[inline]
    pub const fn top(&self) -> u16 {
        self.top
    }

    #[inline]
    pub const fn phase_correct(&self) -> bool {
        self.phase_correct
    }

    /// Exact gate length in system clock cycles.
    #[inline]
    pub const fn gate_cycles(&self) -> u64 {
        let ticks = self.top as u64 + 1;
        let ticks = if self.phase_correct { 2 * ticks } else { ticks };
        ticks * self.prescale as u64
    }

    /// Actual gate length, truncated to whole microseconds. Zero for a zero clock.
    pub fn period(&self, sys_clk: Hertz) -> Microseconds {
        let micros = (self.gate_cycles() * 1_000_000)
            .checked_div(sys_clk.raw() as u64)
            .unwrap_or(0);
        Microseconds::from_ticks(micros.min(u32::MAX as u64) as u32)
    }

    /// Divider register value. A prescaler of 256 is encoded as 0.
    #[inline]
    pub fn div(&self) -> Div {
        Div::new_with_raw_value(0).with_int((self.prescale % MAX_PRESCALE) as u8)
    }
}

/// PWM slice configured as a one-period timer.
pub struct GateTimer<H> {
    hw: H,
    slice: SliceHandle,
    timing: GateTiming,
}

impl<H: PwmBlock> GateTimer<H> {
    /// Claim the slice of `gpio` and configure it as a disabled gate timer.
    ///
    /// The pin itself is not muxed, only the slice is used. If `prescale` is [None], the
    /// smallest prescaler which reaches `period` is used.
    pub fn configure(
        hw: H,
        pool: &mut ResourcePool,
        gpio: u8,
        sys_clk: Hertz,
        prescale: Option<u16>,
        period: Microseconds,
    ) -> Result<Self, GateTimerError> {
        let id = validate_gpio(gpio)?;
        let timing = match prescale {
            Some(prescale) => GateTiming::calculate(sys_clk, prescale, period)?,
            None => GateTiming::best_for(sys_clk, period)?,
        };
        let slice = pool.claim_slice(id)?;
        hw.write_csr(id, Csr::new_with_raw_value(0));
        hw.write_div(id, timing.div());
        hw.write_top(id, timing.top());
        hw.write_ctr(id, 0);
        hw.write_csr(
            id,
            Csr::new_with_raw_value(0).with_ph_correct(timing.phase_correct()),
        );
        log::debug!(
            "gate timer on slice {}: {:?}, {} cycles",
            id.index(),
            timing,
            timing.gate_cycles()
        );
        Ok(Self { hw, slice, timing })
    }

    /// DREQ raised at the end of each gate period.
    #[inline]
    pub const fn trigger_tag(&self) -> TriggerTag {
        TriggerTag::pwm_wrap(self.slice.id())
    }

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

    #[inline]
    pub fn read(&self) -> u16 {
        self.hw.read_ctr(self.slice.id())
    }

    #[inline]
    pub const fn timing(&self) -> GateTiming {
        self.timing
    }

    #[inline]
    pub const fn slice(&self) -> SliceId {
        self.slice.id()
    }

    #[inline]
    pub const fn hw(&self) -> &H {
        &self.hw
    }

    pub fn release(mut self, pool: &mut ResourcePool) {
        self.set_enabled(false);
        pool.release_slice(self.slice);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        dma::{self, TransferConfig},
        hw::DmaBlock,
        resources::DmaChannelId,
        sim::Sim,
        time::DEFAULT_SYS_CLK,
    };

    #[test]
    fn test_plain_mode_for_short_period() {
        let timing =
            GateTiming::calculate(DEFAULT_SYS_CLK, 1, Microseconds::from_ticks(500)).unwrap();
        assert!(!timing.phase_correct());
        assert_eq!(timing.top(), 62_499);
        assert_eq!(timing.gate_cycles(), 62_500);
    }

    #[test]
    fn test_phase_correct_beyond_16_bits() {
        let timing =
            GateTiming::calculate(DEFAULT_SYS_CLK, 1, Microseconds::from_ticks(1000)).unwrap();
        assert!(timing.phase_correct());
        assert_eq!(timing.top(), 62_499);
        assert_eq!(timing.gate_cycles(), 125_000);
    }

    #[test]
    fn test_zero_sys_clk_rejected() {
        let zero = Hertz::from_raw(0);
        let period = Microseconds::millis(10);
        assert_eq!(
            GateTiming::calculate(zero, 1, period),
            Err(GateTimerError::ZeroSysClk)
        );
        assert_eq!(GateTiming::best_for(zero, period), Err(GateTimerError::ZeroSysClk));
        assert_eq!(GateTiming::max_period(zero, 1).ticks(), u32::MAX);
        let timing = GateTiming::best_for(DEFAULT_SYS_CLK, period).unwrap();
        assert_eq!(timing.period(zero).ticks(), 0);
    }

    #[test]
    fn test_period_out_of_range() {
        let max = GateTiming::max_period(DEFAULT_SYS_CLK, 1);
        assert_eq!(max.ticks(), 1048);
        assert!(GateTiming::calculate(DEFAULT_SYS_CLK, 1, max).is_ok());
        assert_eq!(
            GateTiming::calculate(DEFAULT_SYS_CLK, 1, Microseconds::from_ticks(1100)),
            Err(GateTimerError::PeriodOutOfRange(PeriodOutOfRangeError {
                requested: Microseconds::from_ticks(1100),
                max
            }))
        );
        assert!(matches!(
            GateTiming::calculate(DEFAULT_SYS_CLK, 1, Microseconds::from_ticks(0)),
            Err(GateTimerError::PeriodOutOfRange(_))
        ));
    }

    #[test]
    fn test_invalid_prescale() {
        for prescale in [0, 257] {
            assert_eq!(
                GateTiming::calculate(DEFAULT_SYS_CLK, prescale, Microseconds::from_ticks(100)),
                Err(GateTimerError::InvalidPrescale(InvalidPrescaleError {
                    prescale
                }))
            );
        }
    }

    #[test]
    fn test_best_prescale() {
        let timing = GateTiming::best_for(DEFAULT_SYS_CLK, Microseconds::millis(250)).unwrap();
        assert_eq!(timing.prescale(), 239);
        assert!(timing.phase_correct());
        assert_eq!(timing.top(), 65_375);
        assert_eq!(timing.gate_cycles(), 239 * 65_376 * 2);

        let max = GateTiming::max_period(DEFAULT_SYS_CLK, MAX_PRESCALE);
        assert_eq!(max.ticks(), 268_435);
        assert!(GateTiming::best_for(DEFAULT_SYS_CLK, max).is_ok());
        assert!(GateTiming::best_for(DEFAULT_SYS_CLK, Microseconds::millis(300)).is_err());
    }

    #[test]
    fn test_prescale_256_encoding() {
        let timing =
            GateTiming::calculate(DEFAULT_SYS_CLK, 256, Microseconds::millis(200)).unwrap();
        assert_eq!(timing.div().int(), 0);
        let timing =
            GateTiming::calculate(DEFAULT_SYS_CLK, 100, Microseconds::millis(100)).unwrap();
        assert_eq!(timing.div().int(), 100);
    }

    #[test]
    fn test_timer_wraps_after_gate_period() {
        let sim = Sim::default();
        let mut pool = ResourcePool::new();
        let mut timer = GateTimer::configure(
            &sim,
            &mut pool,
            0,
            DEFAULT_SYS_CLK,
            None,
            Microseconds::millis(10),
        )
        .unwrap();
        let cycles = timer.timing().gate_cycles();
        let channel = DmaChannelId::new(0).unwrap();
        let config = TransferConfig::fixed_word(timer.trigger_tag());
        let word = sim.word_address(channel);
        dma::prepare(&sim, channel, &config, word, word, 0);
        dma::restart(&sim, channel, &config, 10);

        timer.set_enabled(true);
        sim.advance_cycles(cycles / 2);
        assert_eq!(timer.read(), timer.timing().top());
        sim.advance_cycles(cycles / 2 - 1);
        assert_eq!(sim.transfers(channel), 0);
        sim.advance_cycles(1);
        assert_eq!(timer.read(), 0);
        assert_eq!(sim.transfers(channel), 1);
        sim.advance_cycles(cycles);
        assert_eq!(sim.transfers(channel), 2);
        assert_eq!(timer.trigger_tag().raw(), 24);
        timer.release(&mut pool);
        assert!(!pool.slice_in_use(SliceId::from_gpio(0)));
    }
}
