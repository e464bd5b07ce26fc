//! # Software model of the PWM, DMA and timer blocks
//!
//! [Sim] implements the hardware access traits with a cycle-accurate model of the parts of the
//! RP2040 that the frequency meter relies on. It is used by the unit tests of this crate and can
//! be enabled for downstream crates with the `sim` feature.
//!
//! Modelled behaviour:
//!
//! - PWM slices: free-running counting through the integer and fractional divider, phase-correct
//!   mode, rising or falling edge counting on channel B, wrap requests, the EN alias register.
//!   Level-gated counting is not modelled.
//! - DMA channels: TRANS_COUNT reload versus live remaining count, pacing by PWM wrap requests or
//!   the permanent request, byte/half-word/word transfers with optional address increments,
//!   aborts. A trigger on a channel that still has a transfer in flight is ignored, so the
//!   channel resumes with its stale count, just like the silicon.
//! - The 1 MHz timer, derived from the system clock.
//! - Square wave sources on GPIOs. A source only reaches its slice while the GPIO is muxed to
//!   the PWM function.
//!
//! Bus routing: PWM slice registers, TIMERAWL and the per-channel DMA words are resolved by the
//! model. Any other address programmed into a DMA channel is treated as host memory and accessed
//! directly, the same way the real DMA writes SRAM. Drivers must only program addresses of live
//! buffers.
//!
//! Time only advances through [Sim::advance_cycles], [Sim::advance_micros] or the
//! [embedded_hal::delay::DelayNs] implementation.
use core::cell::RefCell;

use rp2040_fm::{
    NUM_DMA_CHANNELS, NUM_GPIOS, NUM_PWM_SLICES,
    dma::{Ctrl, DREQ_PWM_WRAP0, DataSize, TREQ_PERMANENT},
    pwm::{self, Csr, Div, DivMode},
    timer::TIMERAWL_ADDR,
};

use crate::{
    gpio::{PinFunction, PwmChannel, pwm_channel},
    hw::{DmaBlock, MicrosClock, PinMux, PwmBlock},
    resources::{DmaChannelId, SliceId},
    time::{DEFAULT_SYS_CLK, Hertz},
};

/// Bus address of the DMA word of channel 0 inside the model. Placed in the striped SRAM range.
pub const SIM_WORDS_BASE_ADDR: usize = 0x2004_1000;

const BUSY_BIT: u32 = 1 << 24;

/// A periodic input signal in system clock cycles.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct SquareWave {
    period: u64,
    high: u64,
    phase: u64,
}

impl SquareWave {
    /// 50 % duty cycle wave with the given period. The first rising edge comes after half a
    /// period.
    pub const fn with_period(period_cycles: u64) -> Self {
        Self {
            period: period_cycles,
            high: period_cycles / 2,
            phase: period_cycles / 2,
        }
    }

    /// Cycles until the first rising edge.
    pub const fn with_phase(mut self, phase_cycles: u64) -> Self {
        self.phase = phase_cycles;
        self
    }

    pub const fn with_high_time(mut self, high_cycles: u64) -> Self {
        self.high = high_cycles;
        self
    }

    pub const fn period(&self) -> u64 {
        self.period
    }
}

#[derive(Debug, Copy, Clone)]
struct SignalModel {
    wave: SquareWave,
    level: bool,
    next_toggle: u64,
}

impl SignalModel {
    fn toggle(&mut self) {
        self.level = !self.level;
        self.next_toggle += if self.level {
            self.wave.high
        } else {
            self.wave.period - self.wave.high
        };
    }
}

#[derive(Debug, Copy, Clone)]
struct SliceModel {
    csr: Csr,
    div: Div,
    top: u16,
    /// Position inside one counter period. In phase-correct mode the second half of the period
    /// is the down-count.
    pos: u32,
    /// Accumulated divider input in 1/16 steps.
    sub: u32,
}

impl SliceModel {
    const RESET: Self = Self {
        csr: Csr::new_with_raw_value(0),
        div: Div::new_with_raw_value(0x10),
        top: 0xFFFF,
        pos: 0,
        sub: 0,
    };

    fn period(&self) -> u32 {
        let steps = self.top as u32 + 1;
        if self.csr.ph_correct() { steps * 2 } else { steps }
    }

    /// Divider in 1/16 steps.
    fn div16(&self) -> u32 {
        let int = match self.div.int() {
            0 => 256,
            int => int as u32,
        };
        int * 16 + self.div.frac().value() as u32
    }

    fn ctr(&self) -> u16 {
        let top = self.top as u32;
        if self.csr.ph_correct() && self.pos > top {
            (2 * top + 1 - self.pos) as u16
        } else {
            self.pos as u16
        }
    }

    fn free_running(&self) -> bool {
        self.csr.en() && self.csr.divmode() == DivMode::FreeRunning
    }

    /// Advance the divider by `steps` sixteenths. Returns the number of wraps.
    fn feed(&mut self, steps: u64) -> u64 {
        let div16 = self.div16() as u64;
        let total = self.sub as u64 + steps;
        let ticks = total / div16;
        self.sub = (total % div16) as u32;
        let pos = self.pos as u64 + ticks;
        let period = self.period() as u64;
        self.pos = (pos % period) as u32;
        pos / period
    }

    /// At least one cycle, also if a TOP write left the position past the new period.
    fn cycles_to_wrap(&self) -> u64 {
        let remaining_ticks = self.period().saturating_sub(self.pos) as u64;
        let steps = (remaining_ticks * self.div16() as u64).saturating_sub(self.sub as u64);
        steps.div_ceil(16).max(1)
    }
}

#[derive(Debug, Copy, Clone)]
struct ChannelModel {
    read_addr: usize,
    write_addr: usize,
    reload: u32,
    remaining: u32,
    ctrl: Ctrl,
    busy: bool,
    transfers: u64,
}

impl ChannelModel {
    const RESET: Self = Self {
        read_addr: 0,
        write_addr: 0,
        reload: 0,
        remaining: 0,
        ctrl: Ctrl::new_with_raw_value(0),
        busy: false,
        transfers: 0,
    };
}

struct State {
    sys_clk: Hertz,
    now: u64,
    slices: [SliceModel; NUM_PWM_SLICES],
    channels: [ChannelModel; NUM_DMA_CHANNELS],
    words: [u32; NUM_DMA_CHANNELS],
    functions: [Option<PinFunction>; NUM_GPIOS],
    signals: [Option<SignalModel>; NUM_GPIOS],
}

/// Simulated RP2040.
pub struct Sim {
    state: RefCell<State>,
}

impl Default for Sim {
    fn default() -> Self {
        Self::new(DEFAULT_SYS_CLK)
    }
}

impl Sim {
    /// `sys_clk` must be a whole number of megahertz so that the 1 MHz timer tick is exact.
    pub fn new(sys_clk: Hertz) -> Self {
        Self {
            state: RefCell::new(State {
                sys_clk,
                now: 0,
                slices: [SliceModel::RESET; NUM_PWM_SLICES],
                channels: [ChannelModel::RESET; NUM_DMA_CHANNELS],
                words: [0; NUM_DMA_CHANNELS],
                functions: [None; NUM_GPIOS],
                signals: [None; NUM_GPIOS],
            }),
        }
    }

    pub fn sys_clk(&self) -> Hertz {
        self.state.borrow().sys_clk
    }

    /// Current time in system clock cycles.
    pub fn now_cycles(&self) -> u64 {
        self.state.borrow().now
    }

    /// Period in cycles of a square wave with the given frequency.
    pub fn period_for(&self, frequency: Hertz) -> u64 {
        self.sys_clk().raw() as u64 / frequency.raw() as u64
    }

    /// Drive `gpio` with a square wave, starting at the current time.
    pub fn attach_signal(&self, gpio: u8, wave: SquareWave) {
        let mut state = self.state.borrow_mut();
        let now = state.now;
        state.signals[gpio as usize] = Some(SignalModel {
            wave,
            level: false,
            next_toggle: now + wave.phase,
        });
    }

    /// Drive `gpio` with a 50 % duty cycle square wave of the given frequency.
    pub fn attach_square_wave(&self, gpio: u8, frequency: Hertz) {
        self.attach_signal(gpio, SquareWave::with_period(self.period_for(frequency)));
    }

    /// Function the GPIO was last muxed to.
    pub fn pin_function(&self, gpio: u8) -> Option<PinFunction> {
        self.state.borrow().functions[gpio as usize]
    }

    /// Deliver `count` edges of the given polarity to the slice behind `gpio`, without advancing
    /// time. The pin mux is not checked.
    pub fn inject_edges(&self, gpio: u8, rising: bool, count: u32) {
        let mut state = self.state.borrow_mut();
        for _ in 0..count {
            state.edge(gpio, rising);
        }
    }

    /// Number of transfers a channel has performed since reset.
    pub fn transfers(&self, channel: DmaChannelId) -> u64 {
        self.state.borrow().channels[channel.index()].transfers
    }

    pub fn advance_cycles(&self, cycles: u64) {
        let mut state = self.state.borrow_mut();
        let end = state.now + cycles;
        state.run_until(end);
    }

    pub fn advance_micros(&self, micros: u32) {
        let cycles = micros as u64 * self.sys_clk().raw() as u64 / 1_000_000;
        self.advance_cycles(cycles);
    }

    pub fn advance_nanos(&self, nanos: u32) {
        let cycles = (nanos as u64 * self.sys_clk().raw() as u64).div_ceil(1_000_000_000);
        self.advance_cycles(cycles);
    }
}

impl State {
    fn now_micros(&self) -> u32 {
        (self.now * 1_000_000 / self.sys_clk.raw() as u64) as u32
    }

    fn run_until(&mut self, end: u64) {
        loop {
            let mut next = end;
            for signal in self.signals.iter().flatten() {
                next = next.min(signal.next_toggle);
            }
            for slice in self.slices.iter().filter(|slice| slice.free_running()) {
                next = next.min(self.now + slice.cycles_to_wrap());
            }
            let dt = next - self.now;
            self.now = next;

            let mut wrapped = 0u8;
            for (index, slice) in self.slices.iter_mut().enumerate() {
                if slice.free_running() && dt > 0 && slice.feed(dt * 16) > 0 {
                    wrapped |= 1 << index;
                }
            }
            for index in 0..NUM_PWM_SLICES {
                if wrapped & (1 << index) != 0 {
                    self.dreq(DREQ_PWM_WRAP0 + index as u8);
                }
            }

            for gpio in 0..NUM_GPIOS {
                let Some(signal) = self.signals[gpio].as_mut() else {
                    continue;
                };
                if signal.next_toggle != self.now {
                    continue;
                }
                signal.toggle();
                let rising = signal.level;
                if self.functions[gpio] == Some(PinFunction::Pwm) {
                    self.edge(gpio as u8, rising);
                }
            }

            if self.now >= end {
                break;
            }
        }
    }

    fn edge(&mut self, gpio: u8, rising: bool) {
        if pwm_channel(gpio) != PwmChannel::B {
            return;
        }
        let index = SliceId::from_gpio(gpio).index();
        let slice = &mut self.slices[index];
        if !slice.csr.en() {
            return;
        }
        let rising = rising != slice.csr.b_inv();
        let counts = match slice.csr.divmode() {
            DivMode::RisingEdge => rising,
            DivMode::FallingEdge => !rising,
            DivMode::FreeRunning | DivMode::Level => false,
        };
        if counts && slice.feed(16) > 0 {
            self.dreq(DREQ_PWM_WRAP0 + index as u8);
        }
    }

    fn dreq(&mut self, treq: u8) {
        for index in 0..NUM_DMA_CHANNELS {
            let channel = &self.channels[index];
            if channel.busy && channel.ctrl.en() && channel.ctrl.treq_sel().value() == treq {
                self.transfer(index);
            }
        }
    }

    fn trigger(&mut self, index: usize) {
        let channel = &mut self.channels[index];
        if !channel.ctrl.en() || channel.busy {
            return;
        }
        channel.remaining = channel.reload;
        channel.busy = channel.remaining > 0;
        if channel.ctrl.treq_sel().value() == TREQ_PERMANENT {
            while self.channels[index].busy {
                self.transfer(index);
            }
        }
    }

    fn transfer(&mut self, index: usize) {
        let channel = self.channels[index];
        let size = match channel.ctrl.data_size() {
            DataSize::Byte => 1,
            DataSize::HalfWord => 2,
            DataSize::Word | DataSize::Reserved => 4,
        };
        let value = self.bus_read(channel.read_addr, size);
        self.bus_write(channel.write_addr, size, value);

        let channel = &mut self.channels[index];
        if channel.ctrl.incr_read() {
            channel.read_addr += size;
        }
        if channel.ctrl.incr_write() {
            channel.write_addr += size;
        }
        channel.transfers += 1;
        channel.remaining -= 1;
        if channel.remaining == 0 {
            channel.busy = false;
        }
    }

    fn slice_register(addr: usize) -> Option<(usize, usize)> {
        let end = pwm::PWM_BASE_ADDR + NUM_PWM_SLICES * pwm::SLICE_STRIDE;
        if !(pwm::PWM_BASE_ADDR..end).contains(&addr) {
            return None;
        }
        let offset = addr - pwm::PWM_BASE_ADDR;
        Some((offset / pwm::SLICE_STRIDE, offset % pwm::SLICE_STRIDE))
    }

    fn word_index(addr: usize) -> Option<usize> {
        let end = SIM_WORDS_BASE_ADDR + NUM_DMA_CHANNELS * 4;
        if !(SIM_WORDS_BASE_ADDR..end).contains(&addr) {
            return None;
        }
        Some((addr - SIM_WORDS_BASE_ADDR) / 4)
    }

    fn bus_read(&self, addr: usize, size: usize) -> u32 {
        if let Some((index, offset)) = Self::slice_register(addr) {
            let slice = &self.slices[index];
            return match offset {
                0x00 => slice.csr.raw_value(),
                0x04 => slice.div.raw_value(),
                0x08 => slice.ctr() as u32,
                0x10 => slice.top as u32,
                _ => 0,
            };
        }
        if addr == TIMERAWL_ADDR {
            return self.now_micros();
        }
        if let Some(index) = Self::word_index(addr) {
            return self.words[index];
        }
        // Host memory, see the module documentation.
        unsafe {
            match size {
                1 => core::ptr::read_volatile(addr as *const u8) as u32,
                2 => core::ptr::read_volatile(addr as *const u16) as u32,
                _ => core::ptr::read_volatile(addr as *const u32),
            }
        }
    }

    fn bus_write(&mut self, addr: usize, size: usize, value: u32) {
        if let Some((index, offset)) = Self::slice_register(addr) {
            let slice = &mut self.slices[index];
            match offset {
                0x00 => slice.csr = sanitize_csr(Csr::new_with_raw_value(value)),
                0x04 => slice.div = Div::new_with_raw_value(value),
                0x08 => {
                    slice.pos = value & 0xFFFF;
                    slice.sub = 0;
                }
                0x10 => slice.top = value as u16,
                _ => (),
            }
            return;
        }
        if addr == TIMERAWL_ADDR {
            return;
        }
        if let Some(index) = Self::word_index(addr) {
            self.words[index] = value;
            return;
        }
        // Host memory, see the module documentation.
        unsafe {
            match size {
                1 => core::ptr::write_volatile(addr as *mut u8, value as u8),
                2 => core::ptr::write_volatile(addr as *mut u16, value as u16),
                _ => core::ptr::write_volatile(addr as *mut u32, value),
            }
        }
    }
}

/// The phase advance and retard bits are self-clearing.
fn sanitize_csr(csr: Csr) -> Csr {
    csr.with_ph_adv(false).with_ph_ret(false)
}

impl PwmBlock for Sim {
    fn read_csr(&self, slice: SliceId) -> Csr {
        self.state.borrow().slices[slice.index()].csr
    }

    fn write_csr(&self, slice: SliceId, csr: Csr) {
        self.state.borrow_mut().slices[slice.index()].csr = sanitize_csr(csr);
    }

    fn write_div(&self, slice: SliceId, div: Div) {
        self.state.borrow_mut().slices[slice.index()].div = div;
    }

    fn read_ctr(&self, slice: SliceId) -> u16 {
        self.state.borrow().slices[slice.index()].ctr()
    }

    fn write_ctr(&self, slice: SliceId, value: u16) {
        let mut state = self.state.borrow_mut();
        let slice = &mut state.slices[slice.index()];
        slice.pos = value as u32;
        slice.sub = 0;
    }

    fn read_top(&self, slice: SliceId) -> u16 {
        self.state.borrow().slices[slice.index()].top
    }

    fn write_top(&self, slice: SliceId, value: u16) {
        self.state.borrow_mut().slices[slice.index()].top = value;
    }

    fn read_enable_mask(&self) -> u8 {
        let state = self.state.borrow();
        state
            .slices
            .iter()
            .enumerate()
            .filter(|(_, slice)| slice.csr.en())
            .fold(0, |mask, (index, _)| mask | (1 << index))
    }

    fn write_enable_mask(&self, mask: u8) {
        let mut state = self.state.borrow_mut();
        for (index, slice) in state.slices.iter_mut().enumerate() {
            slice.csr.set_en(mask & (1 << index) != 0);
        }
    }

    fn csr_address(&self, slice: SliceId) -> usize {
        pwm::Slice::csr_addr(slice.index())
    }
}

impl DmaBlock for Sim {
    fn write_read_addr(&self, channel: DmaChannelId, addr: usize) {
        self.state.borrow_mut().channels[channel.index()].read_addr = addr;
    }

    fn write_write_addr(&self, channel: DmaChannelId, addr: usize) {
        self.state.borrow_mut().channels[channel.index()].write_addr = addr;
    }

    fn write_trans_count(&self, channel: DmaChannelId, count: u32) {
        self.state.borrow_mut().channels[channel.index()].reload = count;
    }

    fn write_trans_count_trig(&self, channel: DmaChannelId, count: u32) {
        let mut state = self.state.borrow_mut();
        state.channels[channel.index()].reload = count;
        state.trigger(channel.index());
    }

    fn read_trans_count(&self, channel: DmaChannelId) -> u32 {
        self.state.borrow().channels[channel.index()].remaining
    }

    fn write_ctrl(&self, channel: DmaChannelId, ctrl: Ctrl) {
        self.state.borrow_mut().channels[channel.index()].ctrl =
            Ctrl::new_with_raw_value(ctrl.raw_value() & !BUSY_BIT);
    }

    fn read_ctrl(&self, channel: DmaChannelId) -> Ctrl {
        let state = self.state.borrow();
        let channel = &state.channels[channel.index()];
        let busy = if channel.busy { BUSY_BIT } else { 0 };
        Ctrl::new_with_raw_value(channel.ctrl.raw_value() | busy)
    }

    fn abort(&self, channel: DmaChannelId) {
        let mut state = self.state.borrow_mut();
        let channel = &mut state.channels[channel.index()];
        channel.ctrl.set_en(false);
        channel.busy = false;
    }

    fn word_address(&self, channel: DmaChannelId) -> usize {
        SIM_WORDS_BASE_ADDR + channel.index() * 4
    }

    fn write_word(&self, channel: DmaChannelId, value: u32) {
        self.state.borrow_mut().words[channel.index()] = value;
    }

    fn read_word(&self, channel: DmaChannelId) -> u32 {
        self.state.borrow().words[channel.index()]
    }
}

impl MicrosClock for Sim {
    fn now_micros(&self) -> u32 {
        self.state.borrow().now_micros()
    }

    fn raw_low_address(&self) -> usize {
        TIMERAWL_ADDR
    }
}

impl PinMux for Sim {
    fn set_function(&self, gpio: u8, function: PinFunction) {
        self.state.borrow_mut().functions[gpio as usize] = Some(function);
    }
}

impl embedded_hal::delay::DelayNs for Sim {
    fn delay_ns(&mut self, ns: u32) {
        self.advance_nanos(ns);
    }
}

impl embedded_hal::delay::DelayNs for &Sim {
    fn delay_ns(&mut self, ns: u32) {
        self.advance_nanos(ns);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dma::{TransferConfig, TriggerTag};

    fn slice(index: u8) -> SliceId {
        SliceId::new(index).unwrap()
    }

    fn channel(index: u8) -> DmaChannelId {
        DmaChannelId::new(index).unwrap()
    }

    fn counting_csr() -> Csr {
        Csr::new_with_raw_value(0)
            .with_divmode(DivMode::RisingEdge)
            .with_en(true)
    }

    #[test]
    fn test_free_running_wrap_timing() {
        let sim = Sim::default();
        let s = slice(1);
        sim.write_top(s, 99);
        sim.write_div(s, Div::new_with_raw_value(0).with_int(5));
        sim.write_csr(s, Csr::new_with_raw_value(0).with_en(true));
        // 100 ticks of 5 cycles each.
        sim.advance_cycles(499);
        assert_eq!(sim.read_ctr(s), 99);
        sim.advance_cycles(1);
        assert_eq!(sim.read_ctr(s), 0);
    }

    #[test]
    fn test_phase_correct_counts_down() {
        let sim = Sim::default();
        let s = slice(2);
        sim.write_top(s, 9);
        sim.write_csr(
            s,
            Csr::new_with_raw_value(0)
                .with_ph_correct(true)
                .with_en(true),
        );
        sim.advance_cycles(9);
        assert_eq!(sim.read_ctr(s), 9);
        sim.advance_cycles(1);
        assert_eq!(sim.read_ctr(s), 9);
        sim.advance_cycles(5);
        assert_eq!(sim.read_ctr(s), 4);
    }

    #[test]
    fn test_edges_need_pwm_function() {
        let sim = Sim::default();
        let s = SliceId::from_gpio(5);
        sim.write_csr(s, counting_csr());
        sim.attach_square_wave(5, Hertz::from_raw(1_000_000));
        sim.advance_micros(10);
        assert_eq!(sim.read_ctr(s), 0);
        sim.set_function(5, PinFunction::Pwm);
        sim.advance_micros(10);
        assert_eq!(sim.read_ctr(s), 10);
    }

    #[test]
    fn test_even_pin_does_not_count() {
        let sim = Sim::default();
        let s = SliceId::from_gpio(4);
        sim.write_csr(s, counting_csr());
        sim.inject_edges(4, true, 10);
        assert_eq!(sim.read_ctr(s), 0);
        sim.inject_edges(5, true, 10);
        assert_eq!(sim.read_ctr(s), 10);
    }

    #[test]
    fn test_dma_counts_wraps() {
        let sim = Sim::default();
        let s = SliceId::from_gpio(3);
        let ch = channel(0);
        sim.write_top(s, 0);
        sim.write_csr(s, counting_csr());
        let config = TransferConfig::fixed_word(TriggerTag::pwm_wrap(s));
        crate::dma::prepare(&sim, ch, &config, sim.word_address(ch), sim.word_address(ch), 0);
        crate::dma::restart(&sim, ch, &config, 1000);
        sim.inject_edges(3, true, 250);
        assert_eq!(sim.read_trans_count(ch), 750);
        assert!(sim.is_busy(ch));
        sim.inject_edges(3, true, 750);
        assert_eq!(sim.read_trans_count(ch), 0);
        assert!(!sim.is_busy(ch));
        assert_eq!(sim.transfers(ch), 1000);
    }

    #[test]
    fn test_retrigger_without_abort_resumes_stale_transfer() {
        let sim = Sim::default();
        let s = SliceId::from_gpio(3);
        let ch = channel(1);
        sim.write_top(s, 0);
        sim.write_csr(s, counting_csr());
        let config = TransferConfig::fixed_word(TriggerTag::pwm_wrap(s));
        crate::dma::prepare(&sim, ch, &config, sim.word_address(ch), sim.word_address(ch), 0);
        crate::dma::restart(&sim, ch, &config, 100);
        sim.inject_edges(3, true, 40);
        crate::dma::pause(&sim, ch, &config);

        // Re-arm without the abort: the reload value is ignored.
        sim.write_ctrl(ch, config.ctrl(ch, true));
        sim.write_trans_count_trig(ch, 100);
        assert_eq!(sim.read_trans_count(ch), 60);

        // With the abort the new count is loaded.
        crate::dma::restart(&sim, ch, &config, 100);
        assert_eq!(sim.read_trans_count(ch), 100);
    }

    #[test]
    fn test_dma_writes_slice_csr() {
        let sim = Sim::default();
        let counter = SliceId::from_gpio(7);
        let gate = slice(0);
        let ch = channel(2);
        sim.write_csr(counter, counting_csr());
        sim.write_word(ch, counting_csr().with_en(false).raw_value());
        sim.write_top(gate, 9);
        let config = TransferConfig::fixed_word(TriggerTag::pwm_wrap(gate));
        crate::dma::prepare(&sim, ch, &config, sim.word_address(ch), sim.csr_address(counter), 1);
        crate::dma::restart(&sim, ch, &config, 1);
        sim.write_enable_mask(gate.mask() | counter.mask());
        sim.advance_cycles(10);
        assert!(!sim.read_csr(counter).en());
        assert!(sim.read_csr(gate).en());
        assert!(!sim.is_busy(ch));
    }

    #[test]
    fn test_timestamps_into_host_memory() {
        let sim = Sim::default();
        let s = SliceId::from_gpio(1);
        let ch = channel(3);
        let mut buffer = [0u32; 4];
        sim.write_top(s, 0);
        sim.write_csr(s, counting_csr());
        let config = TransferConfig::fixed_word(TriggerTag::pwm_wrap(s)).with_incr_write(true);
        crate::dma::prepare(
            &sim,
            ch,
            &config,
            sim.raw_low_address(),
            buffer.as_mut_ptr() as usize,
            4,
        );
        crate::dma::restart(&sim, ch, &config, 4);
        for _ in 0..6 {
            sim.advance_micros(100);
            sim.inject_edges(1, true, 1);
        }
        assert!(!sim.is_busy(ch));
        assert_eq!(buffer, [100, 200, 300, 400]);
    }

    #[test]
    fn test_enable_mask_alias() {
        let sim = Sim::default();
        sim.write_enable_mask(0b1000_0101);
        assert!(sim.read_csr(slice(0)).en());
        assert!(!sim.read_csr(slice(1)).en());
        assert!(sim.read_csr(slice(7)).en());
        assert_eq!(sim.read_enable_mask(), 0b1000_0101);
    }

    #[test]
    fn test_timer_and_delay() {
        use embedded_hal::delay::DelayNs;
        let mut sim = Sim::default();
        sim.delay_ms(3);
        assert_eq!(sim.now_micros(), 3000);
        assert_eq!(sim.now_cycles(), 375_000);
    }
}
