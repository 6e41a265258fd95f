//! Sample Provider Interface
//!
//! The receiver pulls complex baseband samples synchronously through
//! [`SampleProvider::recv`]. Blocking until samples are available is the
//! provider's concern; the receiver never waits on I/O itself.

use crate::{AntennaBuffers, GainControl, InterfaceError};
use num_complex::Complex32;
use tracing::{debug, trace};

/// Outcome of a receive call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Received {
    /// Number of samples written per channel
    pub nof_samples: usize,
    /// Sample index of the first received sample
    pub timestamp: u64,
}

/// Source of baseband samples, one stream per receive antenna
pub trait SampleProvider {
    /// Number of receive channels delivered by this provider
    fn nof_channels(&self) -> usize;

    /// Write `nof_samples` samples into every channel of `buffers` starting
    /// at `offset`.
    fn recv(
        &mut self,
        buffers: &mut AntennaBuffers,
        offset: usize,
        nof_samples: usize,
    ) -> Result<Received, InterfaceError>;

    /// Receive gain control of the front-end, if it has one
    fn gain_control(&mut self) -> Option<&mut dyn GainControl> {
        None
    }
}

/// Behavior of a [`ReplaySource`] once the recorded samples are exhausted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndBehavior {
    /// Fail with [`InterfaceError::EndOfStream`]
    Stop,
    /// Restart from the first sample
    Wrap,
    /// Deliver zeros forever
    Zeros,
}

/// In-memory replay of a recorded or synthesized sample stream
#[derive(Debug, Clone)]
pub struct ReplaySource {
    /// Recorded samples per channel, all of equal length
    channels: Vec<Vec<Complex32>>,
    /// Read position in the recording
    position: usize,
    /// Samples delivered so far
    timestamp: u64,
    /// What happens after the last recorded sample
    end: EndBehavior,
    /// Applied receive gain in dB
    gain_db: f32,
    /// Linear amplitude scale derived from `gain_db`
    scale: f32,
}

impl ReplaySource {
    /// Single-channel replay
    pub fn new(samples: Vec<Complex32>, end: EndBehavior) -> Self {
        Self {
            channels: vec![samples],
            position: 0,
            timestamp: 0,
            end,
            gain_db: 0.0,
            scale: 1.0,
        }
    }

    /// Multi-channel replay; every channel must have the same length
    pub fn multi_channel(channels: Vec<Vec<Complex32>>, end: EndBehavior) -> Result<Self, InterfaceError> {
        if channels.is_empty() || channels.len() > crate::MAX_CHANNELS {
            return Err(InterfaceError::InvalidConfig(format!(
                "replay needs 1..={} channels, got {}",
                crate::MAX_CHANNELS,
                channels.len()
            )));
        }
        let len = channels[0].len();
        if channels.iter().any(|c| c.len() != len) {
            return Err(InterfaceError::InvalidConfig(
                "replay channels differ in length".to_string(),
            ));
        }
        Ok(Self {
            channels,
            position: 0,
            timestamp: 0,
            end,
            gain_db: 0.0,
            scale: 1.0,
        })
    }

    /// Length of the recording in samples
    pub fn len(&self) -> usize {
        self.channels[0].len()
    }

    /// Whether the recording is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Samples delivered so far
    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    fn sample_at(&self, ch: usize, pos: usize) -> Complex32 {
        if pos < self.len() {
            self.channels[ch][pos] * self.scale
        } else {
            Complex32::new(0.0, 0.0)
        }
    }
}

impl SampleProvider for ReplaySource {
    fn nof_channels(&self) -> usize {
        self.channels.len()
    }

    fn recv(
        &mut self,
        buffers: &mut AntennaBuffers,
        offset: usize,
        nof_samples: usize,
    ) -> Result<Received, InterfaceError> {
        if buffers.nof_channels() != self.channels.len() {
            return Err(InterfaceError::ChannelMismatch {
                provider: self.channels.len(),
                buffers: buffers.nof_channels(),
            });
        }
        buffers.check_span(offset, nof_samples)?;

        let len = self.len();
        if self.end == EndBehavior::Stop && self.position + nof_samples > len {
            debug!("Replay exhausted at sample {}", self.position);
            return Err(InterfaceError::EndOfStream);
        }
        if self.end == EndBehavior::Wrap && len == 0 {
            return Err(InterfaceError::EndOfStream);
        }

        for ch in 0..self.channels.len() {
            let mut pos = self.position;
            for i in 0..nof_samples {
                if self.end == EndBehavior::Wrap && pos >= len {
                    pos = 0;
                }
                let sample = self.sample_at(ch, pos);
                buffers.channel_mut(ch)[offset + i] = sample;
                pos += 1;
            }
        }

        let timestamp = self.timestamp;
        self.position = match self.end {
            EndBehavior::Wrap => (self.position + nof_samples) % len,
            _ => self.position + nof_samples,
        };
        self.timestamp += nof_samples as u64;
        trace!("Replayed {} samples at timestamp {}", nof_samples, timestamp);

        Ok(Received {
            nof_samples,
            timestamp,
        })
    }

    fn gain_control(&mut self) -> Option<&mut dyn GainControl> {
        Some(self)
    }
}

impl GainControl for ReplaySource {
    fn set_gain(&mut self, gain_db: f32) -> Result<f32, InterfaceError> {
        if !gain_db.is_finite() {
            return Err(InterfaceError::Device(format!("invalid gain {}", gain_db)));
        }
        self.gain_db = gain_db;
        self.scale = 10f32.powf(gain_db / 20.0);
        debug!("Replay gain set to {:.1} dB", gain_db);
        Ok(gain_db)
    }

    fn gain(&self) -> f32 {
        self.gain_db
    }
}
