//! # Measurement engine
//!
//! Combines the components of this crate into complete measurements:
//!
//! - [Mode::Gated]: count edges during a hardware gate. Best above roughly 1 kHz. Counts above
//!   65535 per gate wrap, which is only flagged through [MeasurementResult::overflow_hint].
//! - [Mode::GatedExtended]: same with a 32-bit count.
//! - [Mode::Reciprocal]: time a number of edges with the 1 MHz timer. Best below roughly 1 kHz.
//! - [Mode::Auto]: a short gated probe selects one of the above.
//!
//! Every measurement claims its PWM slices and DMA channels from the pool of the engine and
//! returns them afterwards, also if it fails.
//!
//! Waiting is done by polling with a [DelayNs] provider at [Config::poll_interval]. Each wait has
//! a deadline, after which the measurement is stopped and fails with a [TimeoutError].
use embedded_hal::delay::DelayNs;

use crate::{
    capture::EdgeTimestampCapture,
    counter::{CounterError, EdgeCounter, EdgePolarity},
    extender::CounterExtender,
    gate::{GateController, GateState, GateTarget},
    gate_timer::{GateTimer, GateTimerError, GateTiming},
    hw::Hardware,
    resources::{ResourceError, ResourcePool},
    time::{DEFAULT_SYS_CLK, Hertz, Microseconds},
};

pub const DEFAULT_GATE_PERIOD: Microseconds = Microseconds::millis(250);
pub const DEFAULT_SAMPLES: usize = 9;
pub const DEFAULT_TIMEOUT: Microseconds = Microseconds::millis(2000);
pub const DEFAULT_POLL_INTERVAL: Microseconds = Microseconds::millis(1);
pub const DEFAULT_PROBE_PERIOD: Microseconds = Microseconds::millis(10);
pub const DEFAULT_BAND_THRESHOLD: Hertz = Hertz::from_raw(1000);
pub const DEFAULT_GATE_MARGIN: Microseconds = Microseconds::millis(50);

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Config {
    /// Signal input. Must be an odd GPIO.
    pub input_pin: u8,
    pub polarity: EdgePolarity,
    /// Selects the slice used as gate timer. Must not share a slice with the input.
    pub gate_pin: u8,
    pub sys_clk: Hertz,
    /// Fixed gate timer prescaler. The smallest prescaler which reaches the gate period is
    /// searched if this is [None].
    pub prescale: Option<u16>,
    /// Gate period used by [Mode::Auto].
    pub gate_period: Microseconds,
    /// Number of timestamps used by [Mode::Auto].
    pub samples: usize,
    /// Deadline for reciprocal measurements.
    pub timeout: Microseconds,
    pub poll_interval: Microseconds,
    pub probe_period: Microseconds,
    /// Probe frequencies at or above this value select gated mode.
    pub band_threshold: Hertz,
    /// Added to the gate period to get the deadline for gated measurements.
    pub gate_margin: Microseconds,
}

impl Config {
    pub const fn new(input_pin: u8, gate_pin: u8) -> Self {
        Self {
            input_pin,
            polarity: EdgePolarity::Rising,
            gate_pin,
            sys_clk: DEFAULT_SYS_CLK,
            prescale: None,
            gate_period: DEFAULT_GATE_PERIOD,
            samples: DEFAULT_SAMPLES,
            timeout: DEFAULT_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            probe_period: DEFAULT_PROBE_PERIOD,
            band_threshold: DEFAULT_BAND_THRESHOLD,
            gate_margin: DEFAULT_GATE_MARGIN,
        }
    }

    pub const fn with_polarity(mut self, polarity: EdgePolarity) -> Self {
        self.polarity = polarity;
        self
    }

    pub const fn with_sys_clk(mut self, sys_clk: Hertz) -> Self {
        self.sys_clk = sys_clk;
        self
    }

    pub const fn with_prescale(mut self, prescale: u16) -> Self {
        self.prescale = Some(prescale);
        self
    }

    pub const fn with_gate_period(mut self, gate_period: Microseconds) -> Self {
        self.gate_period = gate_period;
        self
    }

    pub const fn with_samples(mut self, samples: usize) -> Self {
        self.samples = samples;
        self
    }

    pub const fn with_timeout(mut self, timeout: Microseconds) -> Self {
        self.timeout = timeout;
        self
    }

    pub const fn with_poll_interval(mut self, poll_interval: Microseconds) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub const fn with_probe_period(mut self, probe_period: Microseconds) -> Self {
        self.probe_period = probe_period;
        self
    }

    pub const fn with_band_threshold(mut self, band_threshold: Hertz) -> Self {
        self.band_threshold = band_threshold;
        self
    }

    pub const fn with_gate_margin(mut self, gate_margin: Microseconds) -> Self {
        self.gate_margin = gate_margin;
        self
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Mode {
    /// Count edges with a 16-bit counter during a gate of the given length.
    Gated(Microseconds),
    /// Count edges with a 32-bit counter during a gate of the given length.
    GatedExtended(Microseconds),
    /// Time the given number of edges.
    Reciprocal(usize),
    /// Probe the signal, then use [Config::gate_period] or [Config::samples].
    Auto,
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct MeasurementResult {
    /// Mode which was actually used. Never [Mode::Auto].
    pub mode: Mode,
    /// Frequency in Hz.
    pub frequency: f32,
    /// Edge count for gated modes, number of timestamps for reciprocal mode.
    pub raw: u32,
    pub valid: bool,
    /// The count may be too low because the counter wrapped or saturated. Advisory only.
    pub overflow_hint: bool,
}

impl MeasurementResult {
    /// Period of the signal in seconds.
    pub fn period_secs(&self) -> Option<f32> {
        if !self.valid || self.frequency <= 0.0 {
            return None;
        }
        Some(1.0 / self.frequency)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
#[error("no result after {waited}")]
pub struct TimeoutError {
    pub waited: Microseconds,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{captured} timestamps captured, at least {required} required")]
pub struct InsufficientSamplesError {
    pub captured: usize,
    pub required: usize,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MeasureError {
    #[error("counter error: {0}")]
    Counter(#[from] CounterError),
    #[error("gate timer error: {0}")]
    GateTimer(#[from] GateTimerError),
    #[error("resource error: {0}")]
    Resource(#[from] ResourceError),
    #[error("timeout: {0}")]
    Timeout(#[from] TimeoutError),
    #[error("insufficient samples: {0}")]
    InsufficientSamples(#[from] InsufficientSamplesError),
}

struct GateRun {
    timing: GateTiming,
    overflows: u32,
}

/// Frequency meter built from the PWM slices and DMA channels of one chip.
pub struct MeasurementEngine<H> {
    hw: H,
    pool: ResourcePool,
    config: Config,
    buffer: &'static mut [u32],
}

impl<H: Hardware + Copy> MeasurementEngine<H> {
    /// `buffer` holds the timestamps of reciprocal measurements. Its length limits the number of
    /// samples.
    pub fn new(hw: H, config: Config, buffer: &'static mut [u32]) -> Self {
        Self {
            hw,
            pool: ResourcePool::new(),
            config,
            buffer,
        }
    }

    #[inline]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    #[inline]
    pub fn set_config(&mut self, config: Config) {
        self.config = config;
    }

    #[inline]
    pub const fn pool(&self) -> &ResourcePool {
        &self.pool
    }

    /// Maximum number of timestamps of a reciprocal measurement.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    /// Run one measurement.
    pub fn measure(
        &mut self,
        mode: Mode,
        delay: &mut impl DelayNs,
    ) -> Result<MeasurementResult, MeasureError> {
        log::debug!("measurement in {:?} mode", mode);
        match mode {
            Mode::Gated(period) => self.measure_gated(period, delay),
            Mode::GatedExtended(period) => self.measure_gated_extended(period, delay),
            Mode::Reciprocal(samples) => self.measure_reciprocal(samples, delay),
            Mode::Auto => match self.select_mode(delay)? {
                Mode::Gated(period) => self.measure_gated(period, delay),
                Mode::GatedExtended(period) => self.measure_gated_extended(period, delay),
                _ => self.measure_reciprocal(self.config.samples, delay),
            },
        }
    }

    /// Probe the signal with a short gate and pick the mode for its frequency band.
    ///
    /// Signals which would wrap the 16-bit counter during [Config::gate_period] get the extended
    /// gated mode.
    pub fn select_mode(&mut self, delay: &mut impl DelayNs) -> Result<Mode, MeasureError> {
        let probe = self.measure_gated(self.config.probe_period, delay)?;
        let threshold = self.config.band_threshold.raw() as f32;
        let expected_count =
            probe.frequency as f64 * self.config.gate_period.ticks() as f64 / 1_000_000.0;
        let mode = if probe.overflow_hint || expected_count > u16::MAX as f64 {
            Mode::GatedExtended(self.config.gate_period)
        } else if probe.frequency >= threshold {
            Mode::Gated(self.config.gate_period)
        } else {
            Mode::Reciprocal(self.config.samples)
        };
        log::debug!("probe measured {} Hz, using {:?}", probe.frequency, mode);
        Ok(mode)
    }

    fn measure_gated(
        &mut self,
        period: Microseconds,
        delay: &mut impl DelayNs,
    ) -> Result<MeasurementResult, MeasureError> {
        let counter = EdgeCounter::configure(
            self.hw,
            &mut self.pool,
            self.config.input_pin,
            self.config.polarity,
        )?;
        let (counter, run) = self.run_gate(counter, period, delay)?;
        let count = counter.read() as u32;
        counter.release(&mut self.pool);
        if run.overflows > 0 {
            log::warn!(
                "{} counter wraps seen during a {} gate, count {} is too low",
                run.overflows,
                period,
                count
            );
        }
        Ok(MeasurementResult {
            mode: Mode::Gated(period),
            frequency: self.gated_frequency(count, &run.timing),
            raw: count,
            valid: true,
            overflow_hint: run.overflows > 0,
        })
    }

    fn measure_gated_extended(
        &mut self,
        period: Microseconds,
        delay: &mut impl DelayNs,
    ) -> Result<MeasurementResult, MeasureError> {
        let counter = EdgeCounter::configure(
            self.hw,
            &mut self.pool,
            self.config.input_pin,
            self.config.polarity,
        )?;
        let extender = CounterExtender::init(counter, &mut self.pool)?;
        let (extender, run) = self.run_gate(extender, period, delay)?;
        let value = extender.value();
        extender.release(&mut self.pool);
        if value.saturated {
            log::warn!("extended count saturated during a {} gate", period);
        }
        Ok(MeasurementResult {
            mode: Mode::GatedExtended(period),
            frequency: self.gated_frequency(value.count, &run.timing),
            raw: value.count,
            valid: !value.saturated,
            overflow_hint: value.saturated || run.overflows > 0,
        })
    }

    /// Run one gate on `target`. The target is handed back on success and released on failure.
    fn run_gate<T: GateTarget>(
        &mut self,
        target: T,
        period: Microseconds,
        delay: &mut impl DelayNs,
    ) -> Result<(T, GateRun), MeasureError> {
        let timer = match GateTimer::configure(
            self.hw,
            &mut self.pool,
            self.config.gate_pin,
            self.config.sys_clk,
            self.config.prescale,
            period,
        ) {
            Ok(timer) => timer,
            Err(e) => {
                target.release(&mut self.pool);
                return Err(e.into());
            }
        };
        let timing = timer.timing();
        let mut gate = GateController::init(target, timer, &mut self.pool)?;
        gate.start();
        let outcome = self.wait_for(period + self.config.gate_margin, delay, || {
            match gate.poll() {
                GateState::Running => {
                    gate.poll_overflow_hint();
                    false
                }
                GateState::Armed | GateState::Expired => true,
            }
        });
        if outcome.is_err() {
            gate.stop();
        }
        let overflows = gate.poll_overflow_hint();
        let (target, timer) = gate.free(&mut self.pool);
        timer.release(&mut self.pool);
        match outcome {
            Ok(()) => Ok((target, GateRun { timing, overflows })),
            Err(e) => {
                log::warn!("gate did not expire: {}", e);
                target.release(&mut self.pool);
                Err(e.into())
            }
        }
    }

    fn measure_reciprocal(
        &mut self,
        samples: usize,
        delay: &mut impl DelayNs,
    ) -> Result<MeasurementResult, MeasureError> {
        let samples = samples.min(self.buffer.len());
        if samples < 2 {
            return Err(InsufficientSamplesError {
                captured: 0,
                required: 2,
            }
            .into());
        }
        let counter = EdgeCounter::configure(
            self.hw,
            &mut self.pool,
            self.config.input_pin,
            self.config.polarity,
        )?;
        let buffer = core::mem::take(&mut self.buffer);
        let mut capture = match EdgeTimestampCapture::init(counter, &mut self.pool, buffer) {
            Ok(capture) => capture,
            Err(e) => {
                self.buffer = e.buffer;
                return Err(e.error.into());
            }
        };
        capture.start_with_samples(samples);
        let outcome = self.wait_for(self.config.timeout, delay, || !capture.is_busy());
        capture.stop();
        let captured = capture.captured();
        let frequency = capture.frequency();
        let (counter, buffer) = capture.free(&mut self.pool);
        self.buffer = buffer;
        counter.release(&mut self.pool);

        if let Err(e) = outcome {
            log::warn!("reciprocal measurement: {} of {} edges, {}", captured, samples, e);
            return Err(e.into());
        }
        if captured < 2 {
            return Err(InsufficientSamplesError {
                captured,
                required: 2,
            }
            .into());
        }
        Ok(MeasurementResult {
            mode: Mode::Reciprocal(samples),
            frequency: frequency.unwrap_or(0.0),
            raw: captured as u32,
            valid: frequency.is_some(),
            overflow_hint: false,
        })
    }

    fn gated_frequency(&self, count: u32, timing: &GateTiming) -> f32 {
        (count as f64 * self.config.sys_clk.raw() as f64 / timing.gate_cycles() as f64) as f32
    }

    /// Poll `done` until it returns true or `limit` has passed on the microsecond clock.
    fn wait_for(
        &self,
        limit: Microseconds,
        delay: &mut impl DelayNs,
        mut done: impl FnMut() -> bool,
    ) -> Result<(), TimeoutError> {
        let start = self.hw.now_micros();
        loop {
            if done() {
                return Ok(());
            }
            let waited = self.hw.now_micros().wrapping_sub(start);
            if waited >= limit.ticks() {
                return Err(TimeoutError {
                    waited: Microseconds::from_ticks(waited),
                });
            }
            log::trace!("polling, {} us elapsed", waited);
            delay.delay_us(self.config.poll_interval.ticks());
        }
    }

    /// Give up the engine and return the timestamp buffer.
    pub fn free(self) -> &'static mut [u32] {
        self.buffer
    }
}
