//! # Edge timestamp capture
//!
//! Reciprocal measurement: the edge counter wraps on every edge, and each wrap request makes a DMA
//! channel copy the lower word of the 1 MHz timer into the next slot of a buffer. The frequency
//! follows from the mean interval between consecutive timestamps.
//!
//! The buffer is written by the DMA, so it must outlive any transfer. It is therefore a
//! `&'static mut` slice, and [EdgeTimestampCapture::free] aborts the channel before handing the
//! buffer back.
use core::sync::atomic::{Ordering, compiler_fence};

use crate::{
    counter::EdgeCounter,
    dma::{self, TransferConfig},
    hw::{DmaBlock, MicrosClock, PinMux, PwmBlock},
    resources::{DmaChannelHandle, DmaChannelId, ResourceError, ResourcePool},
};

/// Returned by [EdgeTimestampCapture::init] if no DMA channel is free. The counter is released to
/// the pool, the buffer is handed back.
#[derive(Debug)]
pub struct CaptureInitError {
    pub error: ResourceError,
    pub buffer: &'static mut [u32],
}

/// Mean interval between consecutive timestamps in microseconds, rounded to the nearest integer.
///
/// Only the first `captured` entries of `timestamps` are used. Returns [None] if fewer than two
/// timestamps are available. Timer wrap-arounds between two timestamps are handled.
pub fn compute_period(timestamps: &[u32], captured: usize) -> Option<u32> {
    let (sum, intervals) = interval_sum(timestamps, captured)?;
    Some(((sum + intervals / 2) / intervals) as u32)
}

/// Frequency in Hz derived from the mean interval between consecutive timestamps.
///
/// Returns [None] if fewer than two timestamps are available or if the mean interval is zero.
pub fn compute_frequency(timestamps: &[u32], captured: usize) -> Option<f32> {
    let (sum, intervals) = interval_sum(timestamps, captured)?;
    if sum == 0 {
        return None;
    }
    Some((intervals as f64 * 1_000_000.0 / sum as f64) as f32)
}

fn interval_sum(timestamps: &[u32], captured: usize) -> Option<(u64, u64)> {
    let captured = captured.min(timestamps.len());
    if captured < 2 {
        return None;
    }
    let sum = timestamps[..captured]
        .windows(2)
        .map(|pair| pair[1].wrapping_sub(pair[0]) as u64)
        .sum();
    Some((sum, captured as u64 - 1))
}

/// Records the timer value at each edge of the input signal.
pub struct EdgeTimestampCapture<H> {
    counter: EdgeCounter<H>,
    channel: DmaChannelHandle,
    config: TransferConfig,
    buffer: &'static mut [u32],
    armed: u32,
}

impl<H: PwmBlock + DmaBlock + MicrosClock + PinMux> EdgeTimestampCapture<H> {
    /// Bind a DMA channel which copies the timer into `buffer` on every edge counted by
    /// `counter`.
    ///
    /// The counter is disabled and set to wrap on every edge.
    pub fn init(
        mut counter: EdgeCounter<H>,
        pool: &mut ResourcePool,
        buffer: &'static mut [u32],
    ) -> Result<Self, CaptureInitError> {
        let channel = match pool.claim_dma_channel() {
            Ok(channel) => channel,
            Err(error) => {
                counter.release(pool);
                return Err(CaptureInitError { error, buffer });
            }
        };
        counter.set_enabled(false);
        counter.set_wrap(0);
        counter.reset();

        let id = channel.id();
        let config = TransferConfig::fixed_word(counter.trigger_tag()).with_incr_write(true);
        let hw = counter.hw();
        dma::prepare(
            hw,
            id,
            &config,
            hw.raw_low_address(),
            buffer.as_mut_ptr() as usize,
            buffer.len() as u32,
        );
        log::debug!(
            "timestamp capture on slice {} with DMA channel {}, {} slots",
            counter.slice().index(),
            id.index(),
            buffer.len()
        );
        Ok(Self {
            counter,
            channel,
            config,
            buffer,
            armed: 0,
        })
    }

    /// Capture timestamps until the buffer is full.
    #[inline]
    pub fn start(&mut self) {
        self.start_with_samples(self.buffer.len());
    }

    /// Capture `samples` timestamps, at most the buffer capacity.
    ///
    /// The buffer is zeroed and the channel is aborted and re-armed with the buffer start address
    /// and the sample count before the counter is enabled.
    pub fn start_with_samples(&mut self, samples: usize) {
        let samples = samples.min(self.buffer.len());
        self.counter.set_enabled(false);
        self.buffer.fill(0);
        compiler_fence(Ordering::SeqCst);
        self.counter.reset();

        let id = self.channel.id();
        let hw = self.counter.hw();
        hw.abort(id);
        hw.write_write_addr(id, self.buffer.as_mut_ptr() as usize);
        dma::arm(hw, id, &self.config, samples as u32);
        self.armed = samples as u32;
        self.counter.set_enabled(true);
        log::debug!("timestamp capture started for {} samples", samples);
    }

    /// Stop the counter. The DMA state is left alone, so the captured timestamps stay valid.
    pub fn stop(&mut self) {
        self.counter.set_enabled(false);
        log::debug!("timestamp capture stopped after {} samples", self.captured());
    }

    /// Not all requested timestamps have been captured yet.
    #[inline]
    pub fn is_busy(&self) -> bool {
        self.counter.hw().is_busy(self.channel.id())
    }

    /// Number of timestamps written since the last start.
    pub fn captured(&self) -> usize {
        let remaining = self.counter.hw().read_trans_count(self.channel.id());
        self.armed.saturating_sub(remaining) as usize
    }

    /// Timestamps written since the last start.
    pub fn timestamps(&self) -> &[u32] {
        let captured = self.captured();
        compiler_fence(Ordering::SeqCst);
        &self.buffer[..captured]
    }

    #[inline]
    pub fn period(&self) -> Option<u32> {
        compute_period(self.timestamps(), self.captured())
    }

    #[inline]
    pub fn frequency(&self) -> Option<f32> {
        compute_frequency(self.timestamps(), self.captured())
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    #[inline]
    pub const fn counter(&self) -> &EdgeCounter<H> {
        &self.counter
    }

    #[inline]
    pub const fn channel(&self) -> DmaChannelId {
        self.channel.id()
    }

    /// Stop the counter, abort the channel and return the channel to the pool.
    pub fn free(mut self, pool: &mut ResourcePool) -> (EdgeCounter<H>, &'static mut [u32]) {
        self.counter.set_enabled(false);
        self.counter.hw().abort(self.channel.id());
        compiler_fence(Ordering::SeqCst);
        pool.release_dma_channel(self.channel);
        (self.counter, self.buffer)
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use std::boxed::Box;

    use approx::assert_relative_eq;

    use super::*;
    use crate::{counter::EdgePolarity, sim::Sim, time::Hertz};

    const INPUT: u8 = 7;

    fn buffer(len: usize) -> &'static mut [u32] {
        Box::leak(std::vec![0xFFFF_FFFF; len].into_boxed_slice())
    }

    fn capture<'a>(
        sim: &'a Sim,
        pool: &mut ResourcePool,
        len: usize,
    ) -> EdgeTimestampCapture<&'a Sim> {
        let counter = EdgeCounter::configure(sim, pool, INPUT, EdgePolarity::Rising).unwrap();
        EdgeTimestampCapture::init(counter, pool, buffer(len)).unwrap()
    }

    #[test]
    fn test_period_of_evenly_spaced_timestamps() {
        let timestamps = [1000, 2000, 3000, 4000];
        assert_eq!(compute_period(&timestamps, 4), Some(1000));
        assert_relative_eq!(compute_frequency(&timestamps, 4).unwrap(), 1000.0);
    }

    #[test]
    fn test_too_few_samples() {
        assert_eq!(compute_period(&[], 0), None);
        assert_eq!(compute_period(&[1000], 1), None);
        assert_eq!(compute_period(&[1000, 2000], 1), None);
        assert_eq!(compute_frequency(&[1000], 1), None);
    }

    #[test]
    fn test_zero_interval() {
        assert_eq!(compute_period(&[5, 5, 5], 3), Some(0));
        assert_eq!(compute_frequency(&[5, 5, 5], 3), None);
    }

    #[test]
    fn test_timer_wrap_between_samples() {
        let timestamps = [u32::MAX - 499, 500, 1500];
        assert_eq!(compute_period(&timestamps, 3), Some(1000));
    }

    #[test]
    fn test_captured_count_clamped() {
        assert_eq!(compute_period(&[0, 10, 20], 10), Some(10));
    }

    #[test]
    fn test_capture_10_hz() {
        let sim = Sim::default();
        let mut pool = ResourcePool::new();
        let mut capture = capture(&sim, &mut pool, 9);
        sim.attach_square_wave(INPUT, Hertz::from_raw(10));
        capture.start();
        assert!(capture.is_busy());
        assert_eq!(capture.captured(), 0);
        while capture.is_busy() {
            sim.advance_micros(1000);
        }
        capture.stop();
        assert_eq!(capture.captured(), 9);
        assert_relative_eq!(capture.frequency().unwrap(), 10.0, epsilon = 0.01);
        assert_eq!(capture.period(), Some(100_000));
        let timestamps = capture.timestamps();
        assert_eq!(timestamps[0], 50_000);
        assert_eq!(timestamps[8], 850_000);
    }

    #[test]
    fn test_partial_capture_stays_valid() {
        let sim = Sim::default();
        let mut pool = ResourcePool::new();
        let mut capture = capture(&sim, &mut pool, 16);
        sim.attach_square_wave(INPUT, Hertz::from_raw(1000));
        capture.start();
        sim.advance_micros(5_000);
        capture.stop();
        assert_eq!(capture.captured(), 5);
        assert!(capture.is_busy());
        sim.advance_micros(5_000);
        assert_eq!(capture.captured(), 5);
        assert_eq!(capture.timestamps(), &[500, 1500, 2500, 3500, 4500]);
        assert_eq!(capture.period(), Some(1000));
    }

    #[test]
    fn test_restart_after_completion() {
        let sim = Sim::default();
        let mut pool = ResourcePool::new();
        let mut capture = capture(&sim, &mut pool, 4);
        sim.attach_square_wave(INPUT, Hertz::from_raw(1000));
        capture.start();
        sim.advance_micros(10_000);
        assert!(!capture.is_busy());
        assert_eq!(capture.timestamps(), &[500, 1500, 2500, 3500]);

        // The channel points past the end of the buffer now. A restart must re-arm it.
        capture.start();
        assert_eq!(capture.captured(), 0);
        sim.advance_micros(2_000);
        capture.stop();
        assert_eq!(capture.timestamps(), &[10_500, 11_500]);

        // Restart with a transfer still in flight.
        capture.start_with_samples(2);
        sim.advance_micros(3_000);
        assert_eq!(capture.timestamps(), &[12_500, 13_500]);
        assert!(!capture.is_busy());

        let (counter, buffer) = capture.free(&mut pool);
        assert_eq!(buffer, &[12_500, 13_500, 0, 0]);
        counter.release(&mut pool);
        assert_eq!(pool.dma_channels_in_use(), 0);
    }

    #[test]
    fn test_no_free_channel_returns_buffer() {
        let sim = Sim::default();
        let mut pool = ResourcePool::new();
        for _ in 0..rp2040_fm::NUM_DMA_CHANNELS {
            core::mem::forget(pool.claim_dma_channel().unwrap());
        }
        let counter = EdgeCounter::configure(&sim, &mut pool, INPUT, EdgePolarity::Rising).unwrap();
        let Err(e) = EdgeTimestampCapture::init(counter, &mut pool, buffer(3)) else {
            panic!("init should fail");
        };
        assert_eq!(e.error, ResourceError::NoFreeDmaChannel);
        assert_eq!(e.buffer.len(), 3);
        assert!(!pool.slice_in_use(crate::resources::SliceId::from_gpio(INPUT)));
    }
}
