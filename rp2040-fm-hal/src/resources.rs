//! # Exclusive ownership of PWM slices and DMA channels
//!
//! Every component of the frequency meter needs exclusive access to at least one PWM slice and
//! usually one DMA channel. A [ResourcePool] checks these out as non-cloneable handles so that two
//! components can never drive the same hardware channel. Handles are returned to the pool with
//! [ResourcePool::release_slice] and [ResourcePool::release_dma_channel].
use rp2040_fm::{NUM_DMA_CHANNELS, NUM_PWM_SLICES};

/// Index of one of the eight PWM slices.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct SliceId(u8);

impl SliceId {
    #[inline]
    pub const fn new(index: u8) -> Option<Self> {
        if index as usize >= NUM_PWM_SLICES {
            return None;
        }
        Some(Self(index))
    }

    /// Slice which owns the PWM function of a GPIO. GPIO 16 and above wrap around to slice 0.
    #[inline]
    pub const fn from_gpio(gpio: u8) -> Self {
        Self((gpio >> 1) & 0b111)
    }

    #[inline]
    pub const fn index(&self) -> usize {
        self.0 as usize
    }

    /// Bit of this slice in the PWM EN alias register.
    #[inline]
    pub const fn mask(&self) -> u8 {
        1 << self.0
    }
}

/// Index of one of the twelve DMA channels.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct DmaChannelId(u8);

impl DmaChannelId {
    #[inline]
    pub const fn new(index: u8) -> Option<Self> {
        if index as usize >= NUM_DMA_CHANNELS {
            return None;
        }
        Some(Self(index))
    }

    #[inline]
    pub const fn index(&self) -> usize {
        self.0 as usize
    }

    #[inline]
    pub const fn mask(&self) -> u16 {
        1 << self.0
    }
}

/// Exclusive claim on a PWM slice.
#[derive(Debug, PartialEq, Eq)]
pub struct SliceHandle {
    id: SliceId,
}

impl SliceHandle {
    #[inline]
    pub const fn id(&self) -> SliceId {
        self.id
    }
}

/// Exclusive claim on a DMA channel.
#[derive(Debug, PartialEq, Eq)]
pub struct DmaChannelHandle {
    id: DmaChannelId,
}

impl DmaChannelHandle {
    #[inline]
    pub const fn id(&self) -> DmaChannelId {
        self.id
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResourceError {
    #[error("PWM slice {0} is already in use")]
    SliceInUse(u8),
    #[error("no free DMA channel")]
    NoFreeDmaChannel,
}

/// Arena of PWM slices and DMA channels with exclusive checkout.
///
/// There should be exactly one pool per chip.
#[derive(Debug, Default)]
pub struct ResourcePool {
    slices: u8,
    channels: u16,
}

impl ResourcePool {
    pub const fn new() -> Self {
        Self {
            slices: 0,
            channels: 0,
        }
    }

    /// Claim a specific slice.
    pub fn claim_slice(&mut self, id: SliceId) -> Result<SliceHandle, ResourceError> {
        if self.slices & id.mask() != 0 {
            return Err(ResourceError::SliceInUse(id.0));
        }
        self.slices |= id.mask();
        Ok(SliceHandle { id })
    }

    /// Claim the lowest numbered free DMA channel.
    pub fn claim_dma_channel(&mut self) -> Result<DmaChannelHandle, ResourceError> {
        for index in 0..NUM_DMA_CHANNELS as u8 {
            let id = DmaChannelId(index);
            if self.channels & id.mask() == 0 {
                self.channels |= id.mask();
                return Ok(DmaChannelHandle { id });
            }
        }
        Err(ResourceError::NoFreeDmaChannel)
    }

    pub fn release_slice(&mut self, handle: SliceHandle) {
        self.slices &= !handle.id.mask();
    }

    pub fn release_dma_channel(&mut self, handle: DmaChannelHandle) {
        self.channels &= !handle.id.mask();
    }

    #[inline]
    pub const fn slice_in_use(&self, id: SliceId) -> bool {
        self.slices & id.mask() != 0
    }

    #[inline]
    pub const fn dma_channels_in_use(&self) -> u32 {
        self.channels.count_ones()
    }
}
