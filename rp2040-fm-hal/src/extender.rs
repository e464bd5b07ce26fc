//! # 32-bit edge counter
//!
//! Extends the 16-bit [EdgeCounter] by counting its wraps with the transfer count of a DMA
//! channel. The counter wraps on every edge (TOP = 0), and each wrap request makes the channel
//! perform one dummy word transfer from its scratch word onto itself. The transfer count is a
//! down-counter, so the number of edges is the initial count minus the remaining count.
//!
//! The channel must be aborted before its count is reloaded. Re-triggering a channel that still
//! has a transfer in flight does not load the new count, the channel resumes the old sequence
//! instead. [CounterExtender::start] and [CounterExtender::rearm] always abort first.
//!
//! Once the remaining count reaches zero, the channel stops and the count saturates at
//! [INITIAL_TRANSFER_COUNT]. This is reported through [ExtendedCount::saturated].
use crate::{
    counter::EdgeCounter,
    dma::{self, TransferConfig},
    hw::{DmaBlock, PinMux, PwmBlock},
    resources::{DmaChannelHandle, DmaChannelId, ResourceError, ResourcePool},
};

/// Count loaded into the channel on every start.
pub const INITIAL_TRANSFER_COUNT: u32 = u32::MAX;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ExtendedCount {
    pub count: u32,
    /// The transfer count reached zero. The true number of edges may be higher than `count`.
    pub saturated: bool,
}

impl ExtendedCount {
    #[inline]
    pub const fn from_remaining(remaining: u32) -> Self {
        Self {
            count: INITIAL_TRANSFER_COUNT - remaining,
            saturated: remaining == 0,
        }
    }
}

/// Edge counter with a 32-bit count.
pub struct CounterExtender<H> {
    counter: EdgeCounter<H>,
    channel: DmaChannelHandle,
    config: TransferConfig,
}

impl<H: PwmBlock + DmaBlock + PinMux> CounterExtender<H> {
    /// Bind a DMA channel to the wraps of `counter`.
    ///
    /// The counter is disabled, set to wrap on every edge and reset. If no DMA channel is free,
    /// the counter is released to the pool.
    pub fn init(
        mut counter: EdgeCounter<H>,
        pool: &mut ResourcePool,
    ) -> Result<Self, ResourceError> {
        let channel = match pool.claim_dma_channel() {
            Ok(channel) => channel,
            Err(e) => {
                counter.release(pool);
                return Err(e);
            }
        };
        counter.set_enabled(false);
        counter.set_wrap(0);
        counter.reset();

        let id = channel.id();
        let hw = counter.hw();
        let config = TransferConfig::fixed_word(counter.trigger_tag());
        let scratch = hw.word_address(id);
        hw.write_word(id, 0);
        dma::prepare(hw, id, &config, scratch, scratch, 0);
        log::debug!(
            "counter extender on slice {} with DMA channel {}",
            counter.slice().index(),
            id.index()
        );
        Ok(Self {
            counter,
            channel,
            config,
        })
    }

    /// Zero the count and start counting.
    pub fn start(&mut self) {
        self.rearm();
        self.counter.set_enabled(true);
        log::debug!("counter extender started");
    }

    /// Zero the count without enabling the counter.
    ///
    /// Disables the counter, aborts the channel and reloads it with [INITIAL_TRANSFER_COUNT].
    pub fn rearm(&mut self) {
        self.counter.set_enabled(false);
        dma::restart(
            self.counter.hw(),
            self.channel.id(),
            &self.config,
            INITIAL_TRANSFER_COUNT,
        );
        self.counter.reset();
    }

    /// Number of edges since the last start.
    ///
    /// Before the first start, the count reads as saturated.
    #[inline]
    pub fn value(&self) -> ExtendedCount {
        ExtendedCount::from_remaining(self.counter.hw().read_trans_count(self.channel.id()))
    }

    /// Stop counting. The channel keeps its remaining count, so [Self::value] still reports the
    /// count at the time of the stop.
    pub fn stop(&mut self) {
        self.counter.set_enabled(false);
        dma::pause(self.counter.hw(), self.channel.id(), &self.config);
        log::debug!("counter extender stopped at {}", self.value().count);
    }

    #[inline]
    pub fn is_running(&self) -> bool {
        self.counter.is_enabled()
    }

    #[inline]
    pub const fn counter(&self) -> &EdgeCounter<H> {
        &self.counter
    }

    #[inline]
    pub(crate) fn counter_mut(&mut self) -> &mut EdgeCounter<H> {
        &mut self.counter
    }

    #[inline]
    pub const fn channel(&self) -> DmaChannelId {
        self.channel.id()
    }

    /// Stop the counter, abort the channel and return the channel to the pool. The counter keeps
    /// its wrap of 0.
    pub fn free(mut self, pool: &mut ResourcePool) -> EdgeCounter<H> {
        self.counter.set_enabled(false);
        self.counter.hw().abort(self.channel.id());
        pool.release_dma_channel(self.channel);
        self.counter
    }

    /// Release both the channel and the counter slice.
    pub fn release(self, pool: &mut ResourcePool) {
        let counter = self.free(pool);
        counter.release(pool);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{counter::EdgePolarity, sim::Sim, time::Hertz};

    fn extender<'a>(sim: &'a Sim, pool: &mut ResourcePool) -> CounterExtender<&'a Sim> {
        let counter = EdgeCounter::configure(sim, pool, 3, EdgePolarity::Rising).unwrap();
        CounterExtender::init(counter, pool).unwrap()
    }

    #[test]
    fn test_counts_past_16_bits() {
        let sim = Sim::default();
        let mut pool = ResourcePool::new();
        let mut ext = extender(&sim, &mut pool);
        ext.start();
        sim.inject_edges(3, true, 70_000);
        let value = ext.value();
        assert_eq!(value.count, 70_000);
        assert!(!value.saturated);
        ext.release(&mut pool);
        assert_eq!(pool.dma_channels_in_use(), 0);
    }

    #[test]
    fn test_value_kept_after_stop() {
        let sim = Sim::default();
        let mut pool = ResourcePool::new();
        let mut ext = extender(&sim, &mut pool);
        ext.start();
        sim.inject_edges(3, true, 1234);
        ext.stop();
        assert!(!ext.is_running());
        sim.inject_edges(3, true, 100);
        assert_eq!(ext.value().count, 1234);
    }

    #[test]
    fn test_double_start_matches_clean_start() {
        let sim = Sim::default();
        let mut pool = ResourcePool::new();
        let mut ext = extender(&sim, &mut pool);
        ext.start();
        sim.inject_edges(3, true, 500);
        ext.start();
        ext.start();
        sim.inject_edges(3, true, 321);
        assert_eq!(ext.value().count, 321);

        // Restart after a stop, with the old transfer still in flight.
        ext.stop();
        ext.start();
        sim.inject_edges(3, true, 42);
        assert_eq!(ext.value().count, 42);
    }

    #[test]
    fn test_square_wave() {
        let sim = Sim::default();
        let mut pool = ResourcePool::new();
        let mut ext = extender(&sim, &mut pool);
        sim.attach_square_wave(3, Hertz::from_raw(1_000_000));
        ext.start();
        sim.advance_micros(100_000);
        ext.stop();
        assert_eq!(ext.value().count, 100_000);
    }

    #[test]
    fn test_saturation() {
        assert_eq!(
            ExtendedCount::from_remaining(0),
            ExtendedCount {
                count: u32::MAX,
                saturated: true
            }
        );
        assert!(!ExtendedCount::from_remaining(1).saturated);
        let sim = Sim::default();
        let mut pool = ResourcePool::new();
        let ext = extender(&sim, &mut pool);
        assert!(ext.value().saturated);
    }

    #[test]
    fn test_no_free_channel_releases_counter() {
        let sim = Sim::default();
        let mut pool = ResourcePool::new();
        for _ in 0..rp2040_fm::NUM_DMA_CHANNELS {
            core::mem::forget(pool.claim_dma_channel().unwrap());
        }
        let counter = EdgeCounter::configure(&sim, &mut pool, 3, EdgePolarity::Rising).unwrap();
        assert_eq!(
            CounterExtender::init(counter, &mut pool).err(),
            Some(ResourceError::NoFreeDmaChannel)
        );
        assert!(!pool.slice_in_use(crate::resources::SliceId::from_gpio(3)));
    }
}
