//! DMA register module.
//!
//! Every channel has four registers, each mapped four times with a different register acting as
//! the trigger. Writing a trigger alias starts the channel if it is enabled and idle.
use arbitrary_int::{u4, u6};
use static_assertions::const_assert_eq;

use crate::NUM_DMA_CHANNELS;

pub const DMA_BASE_ADDR: usize = 0x5000_0000;
pub const CHANNEL_STRIDE: usize = 0x40;
pub const DMA_COMMON_BASE_ADDR: usize = DMA_BASE_ADDR + 0x400;

/// DREQ of PWM slice 0 wrapping. The other slices follow consecutively.
pub const DREQ_PWM_WRAP0: u8 = 24;
/// Unpaced transfers.
pub const TREQ_PERMANENT: u8 = 0x3F;

#[bitbybit::bitenum(u2, exhaustive = true)]
#[derive(Debug, PartialEq, Eq)]
pub enum DataSize {
    Byte = 0b00,
    HalfWord = 0b01,
    Word = 0b10,
    Reserved = 0b11,
}

#[bitbybit::bitfield(u32, default = 0x0, debug)]
pub struct Ctrl {
    /// Logical OR of the read and write error flags.
    #[bit(31, r)]
    ahb_error: bool,
    /// Write 1 to clear.
    #[bit(30, rw)]
    read_error: bool,
    /// Write 1 to clear.
    #[bit(29, rw)]
    write_error: bool,
    /// Set while a transfer sequence is in flight. Cleared by completion or by an abort.
    #[bit(24, r)]
    busy: bool,
    #[bit(23, rw)]
    sniff_en: bool,
    #[bit(22, rw)]
    bswap: bool,
    #[bit(21, rw)]
    irq_quiet: bool,
    /// Transfer request signal which paces the channel.
    #[bits(15..=20, rw)]
    treq_sel: u6,
    /// Channel to trigger on completion. Setting this to the channel itself disables chaining.
    #[bits(11..=14, rw)]
    chain_to: u4,
    #[bit(10, rw)]
    ring_sel: bool,
    #[bits(6..=9, rw)]
    ring_size: u4,
    #[bit(5, rw)]
    incr_write: bool,
    #[bit(4, rw)]
    incr_read: bool,
    #[bits(2..=3, rw)]
    data_size: DataSize,
    #[bit(1, rw)]
    high_priority: bool,
    /// A cleared enable pauses the channel without dropping the in-flight transfer.
    #[bit(0, rw)]
    en: bool,
}

/// One bit per channel.
#[bitbybit::bitfield(u32, default = 0x0, debug)]
pub struct ChannelMask {
    #[bits(0..=15, rw)]
    mask: u16,
}

/// Register block of a single DMA channel.
#[derive(derive_mmio::Mmio)]
#[repr(C)]
pub struct Channel {
    read_addr: u32,
    write_addr: u32,
    /// Writes set the count reloaded on the next trigger. Reads return the live remaining count.
    trans_count: u32,
    ctrl_trig: Ctrl,
    al1_ctrl: Ctrl,
    al1_read_addr: u32,
    al1_write_addr: u32,
    al1_trans_count_trig: u32,
    al2_ctrl: Ctrl,
    al2_trans_count: u32,
    al2_read_addr: u32,
    al2_write_addr_trig: u32,
    al3_ctrl: Ctrl,
    al3_write_addr: u32,
    al3_trans_count: u32,
    al3_read_addr_trig: u32,
}

const_assert_eq!(core::mem::size_of::<Channel>(), CHANNEL_STRIDE);

impl Channel {
    /// Create a new MMIO instance for DMA channel `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is not a valid channel index.
    ///
    /// # Safety
    ///
    /// This API can be used to potentially create a driver to the same peripheral structure
    /// from multiple threads. The user must ensure that concurrent accesses are safe and do not
    /// interfere with each other.
    #[inline]
    pub const unsafe fn new_mmio_fixed(index: usize) -> MmioChannel<'static> {
        assert!(index < NUM_DMA_CHANNELS);
        unsafe { Self::new_mmio_at(DMA_BASE_ADDR + index * CHANNEL_STRIDE) }
    }
}

/// Registers shared by all channels.
#[derive(derive_mmio::Mmio)]
#[repr(C)]
pub struct DmaCommon {
    intr: ChannelMask,
    inte0: ChannelMask,
    intf0: ChannelMask,
    #[mmio(PureRead)]
    ints0: ChannelMask,
    _reserved_0: u32,
    inte1: ChannelMask,
    intf1: ChannelMask,
    #[mmio(PureRead)]
    ints1: ChannelMask,
    timer: [u32; 4],
    multi_chan_trigger: ChannelMask,
    sniff_ctrl: u32,
    sniff_data: u32,
    _reserved_1: u32,
    #[mmio(PureRead)]
    fifo_levels: u32,
    /// Write a 1 to abort the channel. The bit reads back as 1 until the abort has completed.
    chan_abort: ChannelMask,
    #[mmio(PureRead)]
    n_channels: u32,
}

const_assert_eq!(core::mem::size_of::<DmaCommon>(), 0x4C);

impl DmaCommon {
    /// Create a new MMIO instance for the common DMA registers at [DMA_COMMON_BASE_ADDR].
    ///
    /// # Safety
    ///
    /// This API can be used to potentially create a driver to the same peripheral structure
    /// from multiple threads. The user must ensure that concurrent accesses are safe and do not
    /// interfere with each other.
    #[inline]
    pub const unsafe fn new_mmio_fixed() -> MmioDmaCommon<'static> {
        unsafe { Self::new_mmio_at(DMA_COMMON_BASE_ADDR) }
    }
}
