//! # Hardware-gated frequency meter for the RP2040
//!
//! Measures the frequency of a digital signal with PWM slices and DMA channels instead of CPU
//! timed loops or an interrupt per edge.
//!
//! - [counter::EdgeCounter] counts signal edges on a PWM slice.
//! - [extender::CounterExtender] widens that count to 32 bits with the transfer counter of a DMA
//!   channel.
//! - [gate_timer::GateTimer] is a second slice which wraps once per gate period.
//! - [gate::GateController] lets a DMA channel disable the counter at the end of the gate.
//! - [capture::EdgeTimestampCapture] records the 1 MHz timer on every edge for reciprocal
//!   measurements of slow signals.
//! - [engine::MeasurementEngine] combines these into complete measurements.
//!
//! The components access the chip through the traits of [hw]. [hw::Rp2040] implements them for
//! the real hardware. With the `sim` feature, [sim::Sim] provides a software model of the same
//! blocks for host tests.
#![no_std]

#[cfg(feature = "std")]
extern crate std;

pub mod capture;
pub mod counter;
pub mod dma;
pub mod engine;
pub mod extender;
pub mod gate;
pub mod gate_timer;
pub mod gpio;
pub mod hw;
pub mod resources;
#[cfg(any(test, feature = "sim"))]
pub mod sim;
pub mod time;
