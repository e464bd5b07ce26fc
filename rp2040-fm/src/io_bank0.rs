//! # IO bank 0 pin control registers
//!
//! Every GPIO has a status and a control register. Only the function select and the override
//! fields are modelled.
use arbitrary_int::u2;
use static_assertions::const_assert_eq;

use crate::NUM_GPIOS;

pub const IO_BANK0_BASE_ADDR: usize = 0x4001_4000;
pub const GPIO_STRIDE: usize = 0x08;

#[bitbybit::bitenum(u5)]
#[derive(Debug, PartialEq, Eq)]
pub enum FunctionSelect {
    Spi = 1,
    Uart = 2,
    I2c = 3,
    Pwm = 4,
    Sio = 5,
    Pio0 = 6,
    Pio1 = 7,
    Clock = 8,
    Usb = 9,
    Null = 0x1F,
}

#[bitbybit::bitfield(u32, default = 0x1F, debug)]
pub struct GpioCtrl {
    #[bits(28..=29, rw)]
    irqover: u2,
    #[bits(16..=17, rw)]
    inover: u2,
    #[bits(12..=13, rw)]
    oeover: u2,
    #[bits(8..=9, rw)]
    outover: u2,
    #[bits(0..=4, rw)]
    funcsel: Option<FunctionSelect>,
}

#[bitbybit::bitfield(u32, debug)]
pub struct GpioStatus {
    #[bit(26, r)]
    irqtoproc: bool,
    #[bit(24, r)]
    irqfrompad: bool,
    #[bit(19, r)]
    intoperi: bool,
    #[bit(17, r)]
    infrompad: bool,
    #[bit(13, r)]
    oetopad: bool,
    #[bit(12, r)]
    oefromperi: bool,
    #[bit(9, r)]
    outtopad: bool,
    #[bit(8, r)]
    outfromperi: bool,
}

/// Status and control register pair of one GPIO.
#[derive(derive_mmio::Mmio)]
#[repr(C)]
pub struct Gpio {
    #[mmio(PureRead)]
    status: GpioStatus,
    ctrl: GpioCtrl,
}

const_assert_eq!(core::mem::size_of::<Gpio>(), GPIO_STRIDE);

impl Gpio {
    /// Create a new MMIO instance for the registers of GPIO `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is not a bank 0 GPIO.
    ///
    /// # Safety
    ///
    /// This API can be used to potentially create a driver to the same peripheral structure
    /// from multiple threads. The user must ensure that concurrent accesses are safe and do not
    /// interfere with each other.
    #[inline]
    pub const unsafe fn new_mmio_fixed(index: usize) -> MmioGpio<'static> {
        assert!(index < NUM_GPIOS);
        unsafe { Self::new_mmio_at(IO_BANK0_BASE_ADDR + index * GPIO_STRIDE) }
    }
}
