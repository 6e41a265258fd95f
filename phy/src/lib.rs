//! LTE Downlink Synchronization and Channel Estimation Library
//!
//! This crate implements the receive-side core of the LTE physical layer
//! according to 3GPP TS 36.211: PSS/SSS cell search, time and frequency
//! synchronization, subframe tracking and cell-specific reference signal
//! based channel estimation.

pub mod agc;
pub mod chest;
pub mod config;
pub mod generator;
pub mod logging;
pub mod ofdm;
pub mod receiver;
pub mod resource_grid;
pub mod sequence;
pub mod sync;
pub mod ue_sync;

pub use chest::{ChannelEstimator, ChestResult};
pub use config::PhyConfig;
pub use receiver::DownlinkReceiver;
pub use resource_grid::ResourceGrid;
pub use sync::{CellSearchResult, CellSearcher, SearchOutcome, SyncFind, Synchronizer};
pub use ue_sync::{SyncState, SyncStatus, UeSync};

use interfaces::InterfaceError;
use num_complex::Complex32;
use thiserror::Error;

/// Common errors for the physical layer
#[derive(Error, Debug)]
pub enum PhyError {
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Buffer size mismatch in {context}: expected {expected}, got {actual}")]
    SizeMismatch {
        context: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("Component not initialized: {0}")]
    NotInitialized(&'static str),

    #[error("Resource unavailable: {0}")]
    ResourceUnavailable(String),

    #[error("Processing error: {0}")]
    ProcessingError(String),

    #[error("Sample provider error: {0}")]
    Interface(#[from] InterfaceError),
}

/// Allocate a zeroed complex buffer, reporting allocation failure as an error
pub(crate) fn alloc_cf(len: usize) -> Result<Vec<Complex32>, PhyError> {
    alloc_filled(len, Complex32::new(0.0, 0.0))
}

/// Allocate a buffer filled with `value`, reporting allocation failure as an error
pub(crate) fn alloc_filled<T: Clone>(len: usize, value: T) -> Result<Vec<T>, PhyError> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(len)
        .map_err(|e| PhyError::ResourceUnavailable(format!("{} elements: {}", len, e)))?;
    buf.resize(len, value);
    Ok(buf)
}

/// Check that a caller-provided buffer has exactly the expected length
pub(crate) fn check_len(context: &'static str, expected: usize, actual: usize) -> Result<(), PhyError> {
    if expected != actual {
        return Err(PhyError::SizeMismatch {
            context,
            expected,
            actual,
        });
    }
    Ok(())
}
