//! Receive gain control

use crate::InterfaceError;

/// Narrow gain control interface used by the automatic gain control loop.
///
/// Implementations apply the requested receive gain and report the value
/// actually set, which may be clamped to the device range.
pub trait GainControl {
    /// Request a receive gain in dB, returning the applied gain
    fn set_gain(&mut self, gain_db: f32) -> Result<f32, InterfaceError>;

    /// Currently applied receive gain in dB
    fn gain(&self) -> f32;
}
