//! # Time units
//!
//! Clock rates in Hz and gate periods and timeouts in microseconds, which is also the tick of
//! the RP2040 timer.

pub type Hertz = fugit::HertzU32;

pub type Microseconds = fugit::MicrosDurationU32;

/// System clock after the usual PLL setup of the RP2040.
pub const DEFAULT_SYS_CLK: Hertz = Hertz::from_raw(125_000_000);
