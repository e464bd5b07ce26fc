//! # DMA channel programming helpers
//!
//! The measurement components use single DMA channels in a few fixed patterns: a peripheral
//! request paces one word transfer at a time between two fixed or incrementing addresses. This
//! module encodes those patterns. It is not a general DMA driver.
//!
//! One rule applies to every user of this module: a channel must be aborted before it is armed
//! again. Re-enabling or re-triggering a channel which still has a transfer in flight resumes
//! that transfer with its stale remaining count instead of loading the new one.
use arbitrary_int::{u4, u6};
use rp2040_fm::dma::{Ctrl, DREQ_PWM_WRAP0, DataSize};

use crate::{
    hw::DmaBlock,
    resources::{DmaChannelId, SliceId},
};

/// Transfer request line which paces a DMA channel.
///
/// Components expose the tag of the event they generate, other components bind their DMA
/// channels to it.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct TriggerTag(u8);

impl TriggerTag {
    /// Request raised each time a PWM slice counter wraps.
    #[inline]
    pub const fn pwm_wrap(slice: SliceId) -> Self {
        Self(DREQ_PWM_WRAP0 + slice.index() as u8)
    }

    #[inline]
    pub const fn raw(&self) -> u8 {
        self.0
    }

    #[inline]
    pub fn treq_sel(&self) -> u6 {
        u6::new(self.0)
    }
}

/// Static configuration of a paced transfer.
#[derive(Debug, Copy, Clone)]
pub struct TransferConfig {
    pub trigger: TriggerTag,
    pub data_size: DataSize,
    pub incr_read: bool,
    pub incr_write: bool,
}

impl TransferConfig {
    /// Single word transfers without address increments.
    pub const fn fixed_word(trigger: TriggerTag) -> Self {
        Self {
            trigger,
            data_size: DataSize::Word,
            incr_read: false,
            incr_write: false,
        }
    }

    pub const fn with_incr_write(mut self, incr_write: bool) -> Self {
        self.incr_write = incr_write;
        self
    }

    /// Control register value for this configuration on `channel`.
    ///
    /// Chaining is disabled by chaining the channel to itself.
    pub fn ctrl(&self, channel: DmaChannelId, enable: bool) -> Ctrl {
        Ctrl::new_with_raw_value(0)
            .with_treq_sel(self.trigger.treq_sel())
            .with_chain_to(u4::new(channel.index() as u8))
            .with_incr_write(self.incr_write)
            .with_incr_read(self.incr_read)
            .with_data_size(self.data_size)
            .with_irq_quiet(true)
            .with_en(enable)
    }
}

/// Abort the channel and program addresses, count and control without starting it.
pub fn prepare<D: DmaBlock>(
    dma: &D,
    channel: DmaChannelId,
    config: &TransferConfig,
    read_addr: usize,
    write_addr: usize,
    count: u32,
) {
    dma.abort(channel);
    dma.write_read_addr(channel, read_addr);
    dma.write_write_addr(channel, write_addr);
    dma.write_trans_count(channel, count);
    dma.write_ctrl(channel, config.ctrl(channel, true));
}

/// Abort the channel, then reload the count and trigger it. The addresses are left as they are.
pub fn restart<D: DmaBlock>(
    dma: &D,
    channel: DmaChannelId,
    config: &TransferConfig,
    count: u32,
) {
    dma.abort(channel);
    arm(dma, channel, config, count);
}

/// Enable the channel and trigger it with a fresh count.
///
/// Only loads `count` if the channel was aborted or has completed its previous transfer.
pub fn arm<D: DmaBlock>(dma: &D, channel: DmaChannelId, config: &TransferConfig, count: u32) {
    dma.write_ctrl(channel, config.ctrl(channel, true));
    dma.write_trans_count_trig(channel, count);
}

/// Pause the channel. The in-flight transfer and its remaining count are kept.
pub fn pause<D: DmaBlock>(dma: &D, channel: DmaChannelId, config: &TransferConfig) {
    dma.write_ctrl(channel, config.ctrl(channel, false));
}
