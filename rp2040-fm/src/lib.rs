//! # Register access for the RP2040 frequency meter
//!
//! Raw register definitions for the subset of RP2040 peripherals that the frequency meter drives:
//! the PWM slices, the DMA controller, the microsecond timer and the IO bank 0 pin control.
//!
//! All register blocks are generated with [derive_mmio] and use [bitbybit] bitfields. Based on
//! the RP2040 datasheet, chapters 2.5 (DMA), 2.19 (GPIO), 4.5 (PWM) and 4.6 (Timer).
#![no_std]

pub mod dma;
pub mod io_bank0;
pub mod pwm;
pub mod timer;

/// Number of PWM slices.
pub const NUM_PWM_SLICES: usize = 8;
/// Number of DMA channels.
pub const NUM_DMA_CHANNELS: usize = 12;
/// Number of user GPIOs in bank 0.
pub const NUM_GPIOS: usize = 30;
