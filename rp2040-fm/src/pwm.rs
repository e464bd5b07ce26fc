//! PWM register module.
//!
//! Each of the eight slices owns a contiguous block of five registers. The common enable and
//! interrupt registers follow the last slice.
use arbitrary_int::u4;
use static_assertions::const_assert_eq;

use crate::NUM_PWM_SLICES;

pub const PWM_BASE_ADDR: usize = 0x4005_0000;
pub const SLICE_STRIDE: usize = 0x14;
pub const PWM_COMMON_BASE_ADDR: usize = PWM_BASE_ADDR + 0xA0;

/// Clock source of the slice counter.
#[bitbybit::bitenum(u2, exhaustive = true)]
#[derive(Debug, PartialEq, Eq)]
pub enum DivMode {
    /// Free-running counting at the rate dictated by the fractional divider.
    FreeRunning = 0b00,
    /// Fractional divider is gated by the channel B input level.
    Level = 0b01,
    /// Counter advances with each rising edge of the channel B input.
    RisingEdge = 0b10,
    /// Counter advances with each falling edge of the channel B input.
    FallingEdge = 0b11,
}

#[bitbybit::bitfield(u32, default = 0x0, debug)]
pub struct Csr {
    /// Advance the phase of the counter by one count while it is running. Self-clearing.
    #[bit(7, rw)]
    ph_adv: bool,
    /// Retard the phase of the counter by one count while it is running. Self-clearing.
    #[bit(6, rw)]
    ph_ret: bool,
    #[bits(4..=5, rw)]
    divmode: DivMode,
    #[bit(3, rw)]
    b_inv: bool,
    #[bit(2, rw)]
    a_inv: bool,
    /// Counter counts up to TOP, then back down to 0 before wrapping.
    #[bit(1, rw)]
    ph_correct: bool,
    #[bit(0, rw)]
    en: bool,
}

/// Fractional clock divider. An integer part of 0 divides by 256.
#[bitbybit::bitfield(u32, default = 0x10, debug)]
pub struct Div {
    #[bits(4..=11, rw)]
    int: u8,
    #[bits(0..=3, rw)]
    frac: u4,
}

#[bitbybit::bitfield(u32, default = 0x0, debug)]
pub struct Counter {
    #[bits(0..=15, rw)]
    value: u16,
}

#[bitbybit::bitfield(u32, default = 0x0, debug)]
pub struct CompareValues {
    #[bits(16..=31, rw)]
    b: u16,
    #[bits(0..=15, rw)]
    a: u16,
}

#[bitbybit::bitfield(u32, default = 0xFFFF, debug)]
pub struct Top {
    #[bits(0..=15, rw)]
    value: u16,
}

/// One bit per slice. Used for the EN alias and the interrupt registers.
#[bitbybit::bitfield(u32, default = 0x0, debug)]
pub struct SliceMask {
    #[bits(0..=7, rw)]
    mask: u8,
}

/// Register block of a single PWM slice.
#[derive(derive_mmio::Mmio)]
#[repr(C)]
pub struct Slice {
    csr: Csr,
    div: Div,
    ctr: Counter,
    cc: CompareValues,
    top: Top,
}

const_assert_eq!(core::mem::size_of::<Slice>(), SLICE_STRIDE);

impl Slice {
    /// Address of the CSR of slice `index`. This is the address DMA channels write to when they
    /// reconfigure a slice.
    #[inline]
    pub const fn csr_addr(index: usize) -> usize {
        PWM_BASE_ADDR + index * SLICE_STRIDE
    }

    /// Create a new MMIO instance for PWM slice `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is not a valid slice index.
    ///
    /// # Safety
    ///
    /// This API can be used to potentially create a driver to the same peripheral structure
    /// from multiple threads. The user must ensure that concurrent accesses are safe and do not
    /// interfere with each other.
    #[inline]
    pub const unsafe fn new_mmio_fixed(index: usize) -> MmioSlice<'static> {
        assert!(index < NUM_PWM_SLICES);
        unsafe { Self::new_mmio_at(Self::csr_addr(index)) }
    }
}

/// Registers shared by all slices.
#[derive(derive_mmio::Mmio)]
#[repr(C)]
pub struct PwmCommon {
    /// Alias of the EN bit of every slice CSR. Writing it starts or stops several slices in the
    /// same cycle.
    en: SliceMask,
    /// Raw interrupts. Write 1 to clear.
    intr: SliceMask,
    inte: SliceMask,
    intf: SliceMask,
    #[mmio(PureRead)]
    ints: SliceMask,
}

const_assert_eq!(core::mem::size_of::<PwmCommon>(), 0x14);

impl PwmCommon {
    /// Create a new MMIO instance for the common PWM registers at [PWM_COMMON_BASE_ADDR].
    ///
    /// # Safety
    ///
    /// This API can be used to potentially create a driver to the same peripheral structure
    /// from multiple threads. The user must ensure that concurrent accesses are safe and do not
    /// interfere with each other.
    #[inline]
    pub const unsafe fn new_mmio_fixed() -> MmioPwmCommon<'static> {
        unsafe { Self::new_mmio_at(PWM_COMMON_BASE_ADDR) }
    }
}
