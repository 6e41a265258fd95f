//! Radio Front-End Interfaces Library
//!
//! This crate defines the collaborators the downlink receiver consumes: a
//! synchronous sample provider delivering complex baseband samples per
//! antenna, the receive gain control used by AGC, and an in-memory replay
//! source for captured or synthesized sample streams.

pub mod buffers;
pub mod gain;
pub mod sample_provider;

pub use buffers::{AntennaBuffers, MAX_CHANNELS};
pub use gain::GainControl;
pub use sample_provider::{EndBehavior, Received, ReplaySource, SampleProvider};

use thiserror::Error;

/// Interface errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum InterfaceError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Interface not initialized")]
    NotInitialized,

    #[error("Channel count mismatch: provider has {provider}, buffers have {buffers}")]
    ChannelMismatch { provider: usize, buffers: usize },

    #[error("Buffer too small: need {needed} samples, capacity is {capacity}")]
    BufferTooSmall { needed: usize, capacity: usize },

    #[error("End of sample stream")]
    EndOfStream,

    #[error("Device error: {0}")]
    Device(String),
}
