//! # Hardware gate
//!
//! The [GateController] stops an edge counter at the exact end of a gate period without CPU
//! involvement. A DMA channel paced by the wrap request of the [GateTimer] performs a single word
//! transfer, which copies a previously captured "disabled" CSR value into the CSR of the counter
//! slice.
//!
//! Counter and timer are started with a single write to the PWM EN alias register, so the gate
//! window and the counting window begin in the same cycle.
//!
//! Expiry is detected by polling: once [GateController::is_busy] returns false, the DMA write has
//! happened and the count is final.
//!
//! A 16-bit [EdgeCounter] silently wraps if more than 65535 edges fall into one gate.
//! [GateController::poll_overflow_hint] samples the running counter and tallies every sample which
//! is smaller than the previous one. This is a heuristic: wraps between two samples can not be
//! detected reliably, and a missed wrap leads to a count which is too low. Use a
//! [CounterExtender] as the gate target to measure signals above that limit.
use rp2040_fm::pwm::Csr;

use crate::{
    counter::EdgeCounter,
    dma::{self, TransferConfig},
    extender::CounterExtender,
    gate_timer::GateTimer,
    hw::{DmaBlock, PinMux, PwmBlock},
    resources::{DmaChannelHandle, DmaChannelId, ResourceError, ResourcePool, SliceId},
};

/// Counting slice which can be stopped by the gate.
pub trait GateTarget {
    fn slice(&self) -> SliceId;
    fn csr_snapshot(&self) -> Csr;
    fn csr_address(&self) -> usize;
    /// Raw value of the slice counter.
    fn raw_count(&self) -> u16;
    /// Zero the count. The slice is left disabled.
    fn rearm(&mut self);
    /// Disable the slice.
    fn halt(&mut self);
    /// Hand all resources back to the pool.
    fn release(self, pool: &mut ResourcePool);
}

impl<H: PwmBlock + PinMux> GateTarget for EdgeCounter<H> {
    #[inline]
    fn slice(&self) -> SliceId {
        EdgeCounter::slice(self)
    }

    #[inline]
    fn csr_snapshot(&self) -> Csr {
        EdgeCounter::csr_snapshot(self)
    }

    #[inline]
    fn csr_address(&self) -> usize {
        EdgeCounter::csr_address(self)
    }

    #[inline]
    fn raw_count(&self) -> u16 {
        self.read()
    }

    fn rearm(&mut self) {
        self.set_enabled(false);
        self.reset();
    }

    #[inline]
    fn halt(&mut self) {
        self.set_enabled(false);
    }

    #[inline]
    fn release(self, pool: &mut ResourcePool) {
        EdgeCounter::release(self, pool);
    }
}

impl<H: PwmBlock + DmaBlock + PinMux> GateTarget for CounterExtender<H> {
    #[inline]
    fn slice(&self) -> SliceId {
        self.counter().slice()
    }

    #[inline]
    fn csr_snapshot(&self) -> Csr {
        self.counter().csr_snapshot()
    }

    #[inline]
    fn csr_address(&self) -> usize {
        self.counter().csr_address()
    }

    #[inline]
    fn raw_count(&self) -> u16 {
        self.counter().read()
    }

    #[inline]
    fn rearm(&mut self) {
        CounterExtender::rearm(self);
    }

    #[inline]
    fn halt(&mut self) {
        self.counter_mut().set_enabled(false);
    }

    #[inline]
    fn release(self, pool: &mut ResourcePool) {
        CounterExtender::release(self, pool);
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum GateState {
    /// Channel programmed, counter and timer stopped.
    Armed,
    /// Counter and timer running, the stop write is pending.
    Running,
    /// The stop write has happened. The count is final.
    Expired,
}

/// Stops a [GateTarget] at the end of each period of a [GateTimer].
pub struct GateController<H, T> {
    target: T,
    timer: GateTimer<H>,
    channel: DmaChannelHandle,
    config: TransferConfig,
    state: GateState,
    last_sample: u16,
    overflows: u32,
}

impl<H: PwmBlock + DmaBlock, T: GateTarget> GateController<H, T> {
    /// Capture the stop value of `target` and bind a DMA channel to the expiry of `timer`.
    ///
    /// The target configuration must be final at this point, or the stop value has to be
    /// captured again with [Self::recapture_stop_value]. If no DMA channel is free, target and
    /// timer are released to the pool.
    pub fn init(
        target: T,
        timer: GateTimer<H>,
        pool: &mut ResourcePool,
    ) -> Result<Self, ResourceError> {
        let channel = match pool.claim_dma_channel() {
            Ok(channel) => channel,
            Err(e) => {
                target.release(pool);
                timer.release(pool);
                return Err(e);
            }
        };
        let config = TransferConfig::fixed_word(timer.trigger_tag());
        let mut gate = Self {
            target,
            timer,
            channel,
            config,
            state: GateState::Armed,
            last_sample: 0,
            overflows: 0,
        };
        gate.recapture_stop_value();
        let id = gate.channel.id();
        let hw = gate.timer.hw();
        dma::prepare(
            hw,
            id,
            &gate.config,
            hw.word_address(id),
            gate.target.csr_address(),
            1,
        );
        log::debug!(
            "gate armed: timer slice {}, target slice {}, DMA channel {}",
            gate.timer.slice().index(),
            gate.target.slice().index(),
            id.index()
        );
        Ok(gate)
    }

    /// Store the current target CSR, with the enable bit cleared, as the value written at expiry.
    ///
    /// Has no effect while the gate is running.
    pub fn recapture_stop_value(&mut self) {
        if self.state == GateState::Running {
            return;
        }
        let stop = self.target.csr_snapshot().with_en(false);
        self.timer
            .hw()
            .write_word(self.channel.id(), stop.raw_value());
    }

    /// The value written into the target CSR at expiry.
    #[inline]
    pub fn stop_value(&self) -> Csr {
        Csr::new_with_raw_value(self.timer.hw().read_word(self.channel.id()))
    }

    /// Start a gate period.
    ///
    /// Aborts the channel, zeroes the target and the timer, re-triggers the channel with a count
    /// of 1 and enables target and timer in the same cycle. Calling this while a gate is running
    /// restarts it.
    pub fn start(&mut self) {
        let id = self.channel.id();
        self.timer.set_enabled(false);
        self.target.halt();
        self.timer.hw().abort(id);
        self.target.rearm();
        self.timer.reset();
        self.last_sample = 0;
        self.overflows = 0;
        let hw = self.timer.hw();
        dma::arm(hw, id, &self.config, 1);
        let mask = self.target.slice().mask() | self.timer.slice().mask();
        hw.write_enable_mask(hw.read_enable_mask() | mask);
        self.state = GateState::Running;
        log::debug!("gate started");
    }

    /// The stop write is still pending.
    #[inline]
    pub fn is_busy(&self) -> bool {
        self.timer.hw().is_busy(self.channel.id())
    }

    /// Update and return the state. A running gate turns into [GateState::Expired] once the stop
    /// write has happened.
    pub fn poll(&mut self) -> GateState {
        if self.state == GateState::Running && !self.is_busy() {
            self.state = GateState::Expired;
            self.timer.set_enabled(false);
            log::debug!("gate expired");
        }
        self.state
    }

    #[inline]
    pub const fn state(&self) -> GateState {
        self.state
    }

    /// Sample the target counter and return the number of wraps seen since the start.
    ///
    /// Only a hint: wraps are detected when a sample is smaller than the one before, so the
    /// counter must be sampled at least once per 65536 edges to catch every wrap.
    pub fn poll_overflow_hint(&mut self) -> u32 {
        let sample = self.target.raw_count();
        if sample < self.last_sample {
            self.overflows += 1;
            log::warn!(
                "edge counter wrapped during gate ({} -> {})",
                self.last_sample,
                sample
            );
        }
        self.last_sample = sample;
        self.overflows
    }

    #[inline]
    pub const fn overflow_hint(&self) -> bool {
        self.overflows > 0
    }

    /// Stop target and timer and pause the channel. Safe to call in any state.
    ///
    /// If the stop write has not happened yet, the target keeps the count of the time of the call.
    pub fn stop(&mut self) {
        self.timer.set_enabled(false);
        self.target.halt();
        dma::pause(self.timer.hw(), self.channel.id(), &self.config);
        if self.state == GateState::Running {
            self.state = GateState::Armed;
        }
        log::debug!("gate stopped in state {:?}", self.state);
    }

    #[inline]
    pub const fn target(&self) -> &T {
        &self.target
    }

    #[inline]
    pub const fn timer(&self) -> &GateTimer<H> {
        &self.timer
    }

    #[inline]
    pub const fn channel(&self) -> DmaChannelId {
        self.channel.id()
    }

    /// Stop everything, abort the channel and return it to the pool.
    pub fn free(mut self, pool: &mut ResourcePool) -> (T, GateTimer<H>) {
        self.timer.set_enabled(false);
        self.target.halt();
        self.timer.hw().abort(self.channel.id());
        pool.release_dma_channel(self.channel);
        (self.target, self.timer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        counter::EdgePolarity,
        sim::Sim,
        time::{DEFAULT_SYS_CLK, Hertz, Microseconds},
    };

    const INPUT: u8 = 3;
    const GATE: u8 = 0;

    fn gate<'a>(
        sim: &'a Sim,
        pool: &mut ResourcePool,
        period: Microseconds,
    ) -> GateController<&'a Sim, EdgeCounter<&'a Sim>> {
        let counter = EdgeCounter::configure(sim, pool, INPUT, EdgePolarity::Rising).unwrap();
        let timer =
            GateTimer::configure(sim, pool, GATE, DEFAULT_SYS_CLK, None, period).unwrap();
        GateController::init(counter, timer, pool).unwrap()
    }

    fn run_to_expiry<T: GateTarget>(sim: &Sim, gate: &mut GateController<&Sim, T>) {
        while gate.poll() != GateState::Expired {
            gate.poll_overflow_hint();
            sim.advance_micros(1000);
        }
        gate.poll_overflow_hint();
    }

    #[test]
    fn test_stop_value_is_disabled_counter_csr() {
        let sim = Sim::default();
        let mut pool = ResourcePool::new();
        let gate = gate(&sim, &mut pool, Microseconds::millis(10));
        let stop = gate.stop_value();
        assert!(!stop.en());
        assert_eq!(stop.divmode(), rp2040_fm::pwm::DivMode::RisingEdge);
        assert_eq!(gate.state(), GateState::Armed);
        assert_eq!(pool.dma_channels_in_use(), 1);
    }

    #[test]
    fn test_gated_count() {
        let sim = Sim::default();
        let mut pool = ResourcePool::new();
        let mut gate = gate(&sim, &mut pool, Microseconds::millis(250));
        sim.attach_square_wave(INPUT, Hertz::from_raw(100_000));
        gate.start();
        assert!(gate.is_busy());
        assert!(gate.target().is_enabled());
        assert!(gate.timer().is_enabled());
        run_to_expiry(&sim, &mut gate);
        assert!(!gate.target().is_enabled());
        assert!(!gate.timer().is_enabled());
        let count = gate.target().read();
        assert!((24_999..=25_001).contains(&count), "count {count}");
        assert!(!gate.overflow_hint());

        // The count is frozen after expiry.
        sim.advance_micros(10_000);
        assert_eq!(gate.target().read(), count);
    }

    #[test]
    fn test_count_matches_gate_length() {
        let sim = Sim::default();
        let mut pool = ResourcePool::new();
        for period_ms in [1, 5, 20, 100] {
            let mut gate = gate(&sim, &mut pool, Microseconds::millis(period_ms));
            sim.attach_square_wave(INPUT, Hertz::from_raw(50_000));
            let expected = gate.timer().timing().gate_cycles() as f64 / 2500.0;
            gate.start();
            run_to_expiry(&sim, &mut gate);
            let count = gate.target().read() as f64;
            assert!((count - expected).abs() <= 1.0, "{count} vs {expected}");
            let (counter, timer) = gate.free(&mut pool);
            counter.release(&mut pool);
            timer.release(&mut pool);
            assert_eq!(pool.dma_channels_in_use(), 0);
        }
    }

    #[test]
    fn test_double_start_matches_single_start() {
        let sim = Sim::default();
        let mut pool = ResourcePool::new();
        let mut gate = gate(&sim, &mut pool, Microseconds::millis(20));
        sim.attach_signal(INPUT, crate::sim::SquareWave::with_period(1250));
        gate.start();
        run_to_expiry(&sim, &mut gate);
        let single = gate.target().read();

        gate.start();
        sim.advance_micros(7_000);
        gate.start();
        run_to_expiry(&sim, &mut gate);
        let restarted = gate.target().read();
        assert_eq!(single, 2000);
        assert_eq!(restarted, single);
    }

    #[test]
    fn test_overflow_hint() {
        let sim = Sim::default();
        let mut pool = ResourcePool::new();
        let mut gate = gate(&sim, &mut pool, Microseconds::millis(100));
        sim.attach_square_wave(INPUT, Hertz::from_raw(1_000_000));
        gate.start();
        run_to_expiry(&sim, &mut gate);
        assert!(gate.overflow_hint());
        let count = gate.target().read() as u32;
        assert!((34_463..=34_465).contains(&count), "count {count}");
    }

    #[test]
    fn test_extended_target() {
        let sim = Sim::default();
        let mut pool = ResourcePool::new();
        let counter = EdgeCounter::configure(&sim, &mut pool, INPUT, EdgePolarity::Rising).unwrap();
        let extender = CounterExtender::init(counter, &mut pool).unwrap();
        let timer = GateTimer::configure(
            &sim,
            &mut pool,
            GATE,
            DEFAULT_SYS_CLK,
            None,
            Microseconds::millis(100),
        )
        .unwrap();
        let mut gate = GateController::init(extender, timer, &mut pool).unwrap();
        sim.attach_square_wave(INPUT, Hertz::from_raw(1_000_000));
        gate.start();
        run_to_expiry(&sim, &mut gate);
        assert!(!gate.overflow_hint());
        let value = gate.target().value();
        assert!(!value.saturated);
        assert!((99_999..=100_000).contains(&value.count), "{value:?}");

        sim.advance_micros(1000);
        assert_eq!(gate.target().value(), value);
        let (extender, timer) = gate.free(&mut pool);
        extender.release(&mut pool);
        timer.release(&mut pool);
        assert_eq!(pool.dma_channels_in_use(), 0);
    }

    #[test]
    fn test_stop_cancels_gate() {
        let sim = Sim::default();
        let mut pool = ResourcePool::new();
        let mut gate = gate(&sim, &mut pool, Microseconds::millis(100));
        sim.attach_square_wave(INPUT, Hertz::from_raw(10_000));
        gate.start();
        sim.advance_micros(10_000);
        gate.stop();
        assert_eq!(gate.state(), GateState::Armed);
        let count = gate.target().read();
        assert_eq!(count, 100);
        sim.advance_micros(200_000);
        assert_eq!(gate.target().read(), count);
        assert_eq!(gate.poll(), GateState::Armed);
    }

    #[test]
    fn test_no_channel_releases_parts() {
        let sim = Sim::default();
        let mut pool = ResourcePool::new();
        for _ in 0..rp2040_fm::NUM_DMA_CHANNELS {
            core::mem::forget(pool.claim_dma_channel().unwrap());
        }
        let counter = EdgeCounter::configure(&sim, &mut pool, INPUT, EdgePolarity::Rising).unwrap();
        let timer = GateTimer::configure(
            &sim,
            &mut pool,
            GATE,
            DEFAULT_SYS_CLK,
            None,
            Microseconds::millis(1),
        )
        .unwrap();
        assert_eq!(
            GateController::init(counter, timer, &mut pool).err(),
            Some(ResourceError::NoFreeDmaChannel)
        );
        assert!(!pool.slice_in_use(SliceId::from_gpio(INPUT)));
        assert!(!pool.slice_in_use(SliceId::from_gpio(GATE)));
    }
}
