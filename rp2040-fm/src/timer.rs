//! # Timer register module.
//!
//! The RP2040 timer is a 64-bit counter incremented once per microsecond from the watchdog tick.

use arbitrary_int::u4;
use static_assertions::const_assert_eq;

pub const TIMER_BASE_ADDR: usize = 0x4005_4000;
/// Address of the raw lower 32 bits of the counter. Reading it has no latching side effects,
/// which makes it a valid DMA read source.
pub const TIMERAWL_ADDR: usize = TIMER_BASE_ADDR + 0x28;

#[bitbybit::bitfield(u32, default = 0x0, debug)]
pub struct AlarmMask {
    #[bits(0..=3, rw)]
    mask: u4,
}

/// Microsecond timer.
#[derive(derive_mmio::Mmio)]
#[repr(C)]
pub struct Timer {
    /// Write to bits 63:32 of the time. Always write timelw before timehw.
    timehw: u32,
    /// Write to bits 31:0 of the time. Writes do not get copied to time until timehw is written.
    timelw: u32,
    /// Read from bits 63:32 of the time. Only valid after reading timelr.
    timehr: u32,
    /// Read from bits 31:0 of the time and latch the upper half.
    timelr: u32,
    alarm: [u32; 4],
    armed: AlarmMask,
    /// Raw read from bits 63:32 of the time, no side effects.
    #[mmio(PureRead)]
    timerawh: u32,
    /// Raw read from bits 31:0 of the time, no side effects.
    #[mmio(PureRead)]
    timerawl: u32,
    dbgpause: u32,
    pause: u32,
    intr: AlarmMask,
    inte: AlarmMask,
    intf: AlarmMask,
    #[mmio(PureRead)]
    ints: AlarmMask,
}

const_assert_eq!(core::mem::size_of::<Timer>(), 0x44);

impl Timer {
    /// Create a new timer MMIO instance at the fixed base address.
    ///
    /// # Safety
    ///
    /// This API can be used to potentially create a driver to the same peripheral structure
    /// from multiple threads. The user must ensure that concurrent accesses are safe and do not
    /// interfere with each other.
    #[inline]
    pub const unsafe fn new_mmio_fixed() -> MmioTimer<'static> {
        unsafe { Self::new_mmio_at(TIMER_BASE_ADDR) }
    }
}
