//! Multi-antenna sample buffers

use crate::InterfaceError;
use num_complex::Complex32;

/// Maximum number of receive channels
pub const MAX_CHANNELS: usize = 4;

/// Owned, size-checked sample buffers, one per receive antenna.
///
/// All channels share the same capacity. Buffers are allocated once and
/// reused for every receive call.
#[derive(Debug, Clone)]
pub struct AntennaBuffers {
    /// Per-antenna sample storage
    channels: Vec<Vec<Complex32>>,
    /// Samples per channel
    capacity: usize,
}

impl AntennaBuffers {
    /// Allocate `nof_channels` zeroed buffers of `capacity` samples
    pub fn new(nof_channels: usize, capacity: usize) -> Result<Self, InterfaceError> {
        if nof_channels == 0 || nof_channels > MAX_CHANNELS {
            return Err(InterfaceError::InvalidConfig(format!(
                "number of channels must be 1..={}, got {}",
                MAX_CHANNELS, nof_channels
            )));
        }

        let mut channels = Vec::with_capacity(nof_channels);
        for _ in 0..nof_channels {
            let mut buf = Vec::new();
            buf.try_reserve_exact(capacity).map_err(|e| {
                InterfaceError::InvalidConfig(format!("cannot allocate {} samples: {}", capacity, e))
            })?;
            buf.resize(capacity, Complex32::new(0.0, 0.0));
            channels.push(buf);
        }

        Ok(Self { channels, capacity })
    }

    /// Number of channels
    pub fn nof_channels(&self) -> usize {
        self.channels.len()
    }

    /// Samples per channel
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Read access to one channel
    pub fn channel(&self, idx: usize) -> &[Complex32] {
        &self.channels[idx]
    }

    /// Write access to one channel
    pub fn channel_mut(&mut self, idx: usize) -> &mut [Complex32] {
        &mut self.channels[idx]
    }

    /// Iterate over all channels
    pub fn iter(&self) -> impl Iterator<Item = &[Complex32]> {
        self.channels.iter().map(|c| c.as_slice())
    }

    /// Iterate mutably over all channels
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut [Complex32]> {
        self.channels.iter_mut().map(|c| c.as_mut_slice())
    }

    /// Verify that `offset + len` samples fit in every channel
    pub fn check_span(&self, offset: usize, len: usize) -> Result<(), InterfaceError> {
        let needed = offset + len;
        if needed > self.capacity {
            return Err(InterfaceError::BufferTooSmall {
                needed,
                capacity: self.capacity,
            });
        }
        Ok(())
    }

    /// Move `len` samples starting at `src` to the beginning of every channel
    pub fn shift_to_front(&mut self, src: usize, len: usize) -> Result<(), InterfaceError> {
        self.check_span(src, len)?;
        for ch in self.channels.iter_mut() {
            ch.copy_within(src..src + len, 0);
        }
        Ok(())
    }
}
