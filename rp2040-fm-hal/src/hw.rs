//! # Hardware access layer
//!
//! The measurement components never touch memory-mapped registers directly. Instead, they use the
//! register-sized operations of the traits in this module. [Rp2040] implements them on top of the
//! [rp2040_fm] register blocks, and the simulator in [crate::sim] implements them with a software
//! model of the same blocks.
//!
//! All methods take `&self`: on the real chip, every access is a single volatile bus transfer,
//! and the resource handles of [crate::resources] guarantee that two drivers never touch the same
//! slice or channel.
//!
//! The user is responsible for taking the PWM, DMA, TIMER and IO_BANK0 blocks out of reset
//! before using the [Rp2040] backend.
use rp2040_fm::{
    NUM_DMA_CHANNELS,
    dma::{self, ChannelMask, Ctrl},
    io_bank0::Gpio,
    pwm::{self, Counter, Csr, Div, SliceMask, Top},
    timer::{TIMERAWL_ADDR, Timer},
};
use vcell::VolatileCell;

use crate::{
    gpio::PinFunction,
    resources::{DmaChannelId, SliceId},
};

/// Register access to the PWM block.
pub trait PwmBlock {
    fn read_csr(&self, slice: SliceId) -> Csr;
    fn write_csr(&self, slice: SliceId, csr: Csr);
    fn write_div(&self, slice: SliceId, div: Div);
    fn read_ctr(&self, slice: SliceId) -> u16;
    fn write_ctr(&self, slice: SliceId, value: u16);
    fn read_top(&self, slice: SliceId) -> u16;
    fn write_top(&self, slice: SliceId, value: u16);
    /// Read the EN alias register, one bit per slice.
    fn read_enable_mask(&self) -> u8;
    /// Write the EN alias register. All slices change their enable state in the same cycle.
    fn write_enable_mask(&self, mask: u8);
    /// Bus address of the CSR of a slice, as seen by the DMA.
    fn csr_address(&self, slice: SliceId) -> usize;

    #[inline]
    fn modify_csr(&self, slice: SliceId, f: impl FnOnce(Csr) -> Csr) {
        self.write_csr(slice, f(self.read_csr(slice)));
    }
}

/// Register access to the DMA block.
pub trait DmaBlock {
    fn write_read_addr(&self, channel: DmaChannelId, addr: usize);
    fn write_write_addr(&self, channel: DmaChannelId, addr: usize);
    /// Set the transfer count loaded on the next trigger, without triggering.
    fn write_trans_count(&self, channel: DmaChannelId, count: u32);
    /// Set the transfer count and trigger the channel.
    fn write_trans_count_trig(&self, channel: DmaChannelId, count: u32);
    /// Live count of remaining transfers.
    fn read_trans_count(&self, channel: DmaChannelId) -> u32;
    /// Write the control register through the non-triggering alias.
    fn write_ctrl(&self, channel: DmaChannelId, ctrl: Ctrl);
    fn read_ctrl(&self, channel: DmaChannelId) -> Ctrl;
    /// Abort the in-flight transfer sequence of a channel. Returns once the abort has completed.
    fn abort(&self, channel: DmaChannelId);

    /// Bus address of the DMA-visible word reserved for a channel.
    fn word_address(&self, channel: DmaChannelId) -> usize;
    fn write_word(&self, channel: DmaChannelId, value: u32);
    fn read_word(&self, channel: DmaChannelId) -> u32;

    #[inline]
    fn is_busy(&self, channel: DmaChannelId) -> bool {
        self.read_ctrl(channel).busy()
    }
}

/// Free-running microsecond clock.
pub trait MicrosClock {
    fn now_micros(&self) -> u32;
    /// Bus address of the register holding the lower 32 bits of the clock. It must be readable
    /// by the DMA without side effects.
    fn raw_low_address(&self) -> usize;
}

/// GPIO function multiplexer.
pub trait PinMux {
    fn set_function(&self, gpio: u8, function: PinFunction);
}

/// Everything the measurement engine needs from the chip.
pub trait Hardware: PwmBlock + DmaBlock + MicrosClock + PinMux {}

impl<T: PwmBlock + DmaBlock + MicrosClock + PinMux> Hardware for T {}

impl<T: PwmBlock + ?Sized> PwmBlock for &T {
    #[inline]
    fn read_csr(&self, slice: SliceId) -> Csr {
        (**self).read_csr(slice)
    }
    #[inline]
    fn write_csr(&self, slice: SliceId, csr: Csr) {
        (**self).write_csr(slice, csr)
    }
    #[inline]
    fn write_div(&self, slice: SliceId, div: Div) {
        (**self).write_div(slice, div)
    }
    #[inline]
    fn read_ctr(&self, slice: SliceId) -> u16 {
        (**self).read_ctr(slice)
    }
    #[inline]
    fn write_ctr(&self, slice: SliceId, value: u16) {
        (**self).write_ctr(slice, value)
    }
    #[inline]
    fn read_top(&self, slice: SliceId) -> u16 {
        (**self).read_top(slice)
    }
    #[inline]
    fn write_top(&self, slice: SliceId, value: u16) {
        (**self).write_top(slice, value)
    }
    #[inline]
    fn read_enable_mask(&self) -> u8 {
        (**self).read_enable_mask()
    }
    #[inline]
    fn write_enable_mask(&self, mask: u8) {
        (**self).write_enable_mask(mask)
    }
    #[inline]
    fn csr_address(&self, slice: SliceId) -> usize {
        (**self).csr_address(slice)
    }
}

impl<T: DmaBlock + ?Sized> DmaBlock for &T {
    #[inline]
    fn write_read_addr(&self, channel: DmaChannelId, addr: usize) {
        (**self).write_read_addr(channel, addr)
    }
    #[inline]
    fn write_write_addr(&self, channel: DmaChannelId, addr: usize) {
        (**self).write_write_addr(channel, addr)
    }
    #[inline]
    fn write_trans_count(&self, channel: DmaChannelId, count: u32) {
        (**self).write_trans_count(channel, count)
    }
    #[inline]
    fn write_trans_count_trig(&self, channel: DmaChannelId, count: u32) {
        (**self).write_trans_count_trig(channel, count)
    }
    #[inline]
    fn read_trans_count(&self, channel: DmaChannelId) -> u32 {
        (**self).read_trans_count(channel)
    }
    #[inline]
    fn write_ctrl(&self, channel: DmaChannelId, ctrl: Ctrl) {
        (**self).write_ctrl(channel, ctrl)
    }
    #[inline]
    fn read_ctrl(&self, channel: DmaChannelId) -> Ctrl {
        (**self).read_ctrl(channel)
    }
    #[inline]
    fn abort(&self, channel: DmaChannelId) {
        (**self).abort(channel)
    }
    #[inline]
    fn word_address(&self, channel: DmaChannelId) -> usize {
        (**self).word_address(channel)
    }
    #[inline]
    fn write_word(&self, channel: DmaChannelId, value: u32) {
        (**self).write_word(channel, value)
    }
    #[inline]
    fn read_word(&self, channel: DmaChannelId) -> u32 {
        (**self).read_word(channel)
    }
}

impl<T: MicrosClock + ?Sized> MicrosClock for &T {
    #[inline]
    fn now_micros(&self) -> u32 {
        (**self).now_micros()
    }
    #[inline]
    fn raw_low_address(&self) -> usize {
        (**self).raw_low_address()
    }
}

impl<T: PinMux + ?Sized> PinMux for &T {
    #[inline]
    fn set_function(&self, gpio: u8, function: PinFunction) {
        (**self).set_function(gpio, function)
    }
}

/// One DMA-visible word per channel. Slot `n` is only accessed by the owner of the handle for
/// DMA channel `n`.
struct ChannelWords([VolatileCell<u32>; NUM_DMA_CHANNELS]);

unsafe impl Sync for ChannelWords {}

static CHANNEL_WORDS: ChannelWords =
    ChannelWords([const { VolatileCell::new(0) }; NUM_DMA_CHANNELS]);

/// RP2040 backend for the hardware access traits.
#[derive(Debug, Copy, Clone)]
pub struct Rp2040 {
    _private: (),
}

impl Rp2040 {
    /// Steal the register blocks used by the frequency meter.
    ///
    /// # Safety
    ///
    /// Circumvents ownership and safety guarantees by the HAL. The PWM slices and DMA channels
    /// must only be driven through handles of a single [crate::resources::ResourcePool].
    #[inline]
    pub const unsafe fn steal() -> Self {
        Self { _private: () }
    }
}

impl PwmBlock for Rp2040 {
    #[inline]
    fn read_csr(&self, slice: SliceId) -> Csr {
        unsafe { pwm::Slice::new_mmio_fixed(slice.index()) }.read_csr()
    }

    #[inline]
    fn write_csr(&self, slice: SliceId, csr: Csr) {
        unsafe { pwm::Slice::new_mmio_fixed(slice.index()) }.write_csr(csr);
    }

    #[inline]
    fn write_div(&self, slice: SliceId, div: Div) {
        unsafe { pwm::Slice::new_mmio_fixed(slice.index()) }.write_div(div);
    }

    #[inline]
    fn read_ctr(&self, slice: SliceId) -> u16 {
        unsafe { pwm::Slice::new_mmio_fixed(slice.index()) }
            .read_ctr()
            .value()
    }

    #[inline]
    fn write_ctr(&self, slice: SliceId, value: u16) {
        unsafe { pwm::Slice::new_mmio_fixed(slice.index()) }
            .write_ctr(Counter::new_with_raw_value(value as u32));
    }

    #[inline]
    fn read_top(&self, slice: SliceId) -> u16 {
        unsafe { pwm::Slice::new_mmio_fixed(slice.index()) }
            .read_top()
            .value()
    }

    #[inline]
    fn write_top(&self, slice: SliceId, value: u16) {
        unsafe { pwm::Slice::new_mmio_fixed(slice.index()) }
            .write_top(Top::new_with_raw_value(value as u32));
    }

    #[inline]
    fn read_enable_mask(&self) -> u8 {
        unsafe { pwm::PwmCommon::new_mmio_fixed() }.read_en().mask()
    }

    #[inline]
    fn write_enable_mask(&self, mask: u8) {
        unsafe { pwm::PwmCommon::new_mmio_fixed() }
            .write_en(SliceMask::new_with_raw_value(mask as u32));
    }

    #[inline]
    fn csr_address(&self, slice: SliceId) -> usize {
        pwm::Slice::csr_addr(slice.index())
    }
}

impl DmaBlock for Rp2040 {
    #[inline]
    fn write_read_addr(&self, channel: DmaChannelId, addr: usize) {
        unsafe { dma::Channel::new_mmio_fixed(channel.index()) }.write_read_addr(addr as u32);
    }

    #[inline]
    fn write_write_addr(&self, channel: DmaChannelId, addr: usize) {
        unsafe { dma::Channel::new_mmio_fixed(channel.index()) }.write_write_addr(addr as u32);
    }

    #[inline]
    fn write_trans_count(&self, channel: DmaChannelId, count: u32) {
        unsafe { dma::Channel::new_mmio_fixed(channel.index()) }.write_trans_count(count);
    }

    #[inline]
    fn write_trans_count_trig(&self, channel: DmaChannelId, count: u32) {
        unsafe { dma::Channel::new_mmio_fixed(channel.index()) }.write_al1_trans_count_trig(count);
    }

    #[inline]
    fn read_trans_count(&self, channel: DmaChannelId) -> u32 {
        unsafe { dma::Channel::new_mmio_fixed(channel.index()) }.read_trans_count()
    }

    #[inline]
    fn write_ctrl(&self, channel: DmaChannelId, ctrl: Ctrl) {
        unsafe { dma::Channel::new_mmio_fixed(channel.index()) }.write_al1_ctrl(ctrl);
    }

    #[inline]
    fn read_ctrl(&self, channel: DmaChannelId) -> Ctrl {
        unsafe { dma::Channel::new_mmio_fixed(channel.index()) }.read_al1_ctrl()
    }

    fn abort(&self, channel: DmaChannelId) {
        let mut regs = unsafe { dma::Channel::new_mmio_fixed(channel.index()) };
        // RP2040-E13: an abort can raise a spurious completion. Clearing the enable first keeps
        // the channel from being re-triggered through its chain.
        regs.modify_al1_ctrl(|mut ctrl| {
            ctrl.set_en(false);
            ctrl
        });
        let mut common = unsafe { dma::DmaCommon::new_mmio_fixed() };
        common.write_chan_abort(ChannelMask::new_with_raw_value(channel.mask() as u32));
        while common.read_chan_abort().mask() & channel.mask() != 0 {}
    }

    #[inline]
    fn word_address(&self, channel: DmaChannelId) -> usize {
        CHANNEL_WORDS.0[channel.index()].as_ptr() as usize
    }

    #[inline]
    fn write_word(&self, channel: DmaChannelId, value: u32) {
        CHANNEL_WORDS.0[channel.index()].set(value);
    }

    #[inline]
    fn read_word(&self, channel: DmaChannelId) -> u32 {
        CHANNEL_WORDS.0[channel.index()].get()
    }
}

impl MicrosClock for Rp2040 {
    #[inline]
    fn now_micros(&self) -> u32 {
        let regs = unsafe { Timer::new_mmio_fixed() };
        regs.read_timerawl()
    }

    #[inline]
    fn raw_low_address(&self) -> usize {
        TIMERAWL_ADDR
    }
}

impl PinMux for Rp2040 {
    fn set_function(&self, gpio: u8, function: PinFunction) {
        unsafe { Gpio::new_mmio_fixed(gpio as usize) }.modify_ctrl(|mut ctrl| {
            ctrl.set_funcsel(function.into());
            ctrl
        });
    }
}
