//! Automatic Gain Control
//!
//! Steers the receive gain so the average sample power approaches a target.
//! The loop only measures and decides; the gain is applied through the
//! front-end's [`GainControl`].

use crate::config::AgcConfig;
use crate::PhyError;
use common::utils::{avg_power, ema, pow_to_db};
use interfaces::GainControl;
use num_complex::Complex32;
use tracing::{debug, trace};

/// Receive gain loop
#[derive(Debug, Clone)]
pub struct Agc {
    /// Target average power in dB
    target_db: f32,
    min_gain_db: f32,
    max_gain_db: f32,
    /// Smoothing of the measured power
    alpha: f32,
    /// Gain last applied, in dB
    gain_db: f32,
    /// Smoothed power of the samples received with `gain_db`
    power: Option<f32>,
}

impl Agc {
    pub fn new(config: &AgcConfig) -> Self {
        Self {
            target_db: config.target_power_db,
            min_gain_db: config.min_gain_db,
            max_gain_db: config.max_gain_db,
            alpha: config.ema_alpha,
            gain_db: config.initial_gain_db.clamp(config.min_gain_db, config.max_gain_db),
            power: None,
        }
    }

    /// Current gain in dB
    pub fn gain_db(&self) -> f32 {
        self.gain_db
    }

    /// Smoothed measured power in dB, if any samples were seen
    pub fn power_db(&self) -> Option<f32> {
        self.power.map(pow_to_db)
    }

    /// Apply the current gain to the front-end
    pub fn init(&mut self, control: &mut dyn GainControl) -> Result<(), PhyError> {
        self.gain_db = control.set_gain(self.gain_db)?;
        self.power = None;
        debug!("AGC initial gain {:.1} dB", self.gain_db);
        Ok(())
    }

    /// Measure `samples` and return the gain that would bring them to the target
    pub fn process(&mut self, samples: &[Complex32]) -> Option<f32> {
        let measured = avg_power(samples);
        if measured <= 0.0 {
            return None;
        }
        let power = match self.power {
            Some(avg) => ema(measured, avg, self.alpha),
            None => measured,
        };
        self.power = Some(power);
        let gain = (self.gain_db + self.target_db - pow_to_db(power)).clamp(self.min_gain_db, self.max_gain_db);
        trace!("AGC: power {:.1} dB, gain {:.1} dB", pow_to_db(power), gain);
        Some(gain)
    }

    /// Measure `samples` and update the front-end gain
    pub fn update(&mut self, samples: &[Complex32], control: &mut dyn GainControl) -> Result<(), PhyError> {
        let Some(gain) = self.process(samples) else {
            return Ok(());
        };
        if (gain - self.gain_db).abs() < f32::EPSILON {
            return Ok(());
        }
        let applied = control.set_gain(gain)?;
        // Rescale the average to what the new gain would have measured
        if let Some(power) = self.power.as_mut() {
            *power *= 10f32.powf((applied - self.gain_db) / 10.0);
        }
        debug!("AGC gain {:.1} -> {:.1} dB", self.gain_db, applied);
        self.gain_db = applied;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use interfaces::{AntennaBuffers, EndBehavior, ReplaySource, SampleProvider};

    #[test]
    fn test_gain_step_towards_target() {
        let config = AgcConfig {
            enable: true,
            target_power_db: -10.0,
            initial_gain_db: 0.0,
            min_gain_db: -30.0,
            max_gain_db: 30.0,
            ema_alpha: 0.5,
            ..AgcConfig::default()
        };
        let mut agc = Agc::new(&config);
        // Power 1.0 = 0 dB, 10 dB above target
        let samples = vec![Complex32::new(1.0, 0.0); 100];
        assert!((agc.process(&samples).unwrap() + 10.0).abs() < 1e-4);
        assert_eq!(agc.process(&[Complex32::new(0.0, 0.0); 4]), None);
    }

    #[test]
    fn test_gain_limits() {
        let config = AgcConfig {
            target_power_db: 0.0,
            initial_gain_db: 10.0,
            min_gain_db: 0.0,
            max_gain_db: 20.0,
            ..AgcConfig::default()
        };
        let mut agc = Agc::new(&config);
        let weak = vec![Complex32::new(1e-3, 0.0); 10];
        assert_eq!(agc.process(&weak), Some(20.0));
    }

    #[test]
    fn test_loop_converges_through_front_end() {
        let config = AgcConfig {
            enable: true,
            target_power_db: -6.0,
            initial_gain_db: 0.0,
            min_gain_db: -40.0,
            max_gain_db: 40.0,
            ema_alpha: 0.5,
            ..AgcConfig::default()
        };
        let mut source = ReplaySource::new(vec![Complex32::new(0.01, 0.0); 64], EndBehavior::Wrap);
        let mut buffers = AntennaBuffers::new(1, 64).unwrap();
        let mut agc = Agc::new(&config);
        agc.init(&mut source).unwrap();
        for _ in 0..10 {
            source.recv(&mut buffers, 0, 64).unwrap();
            agc.update(buffers.channel(0), &mut source).unwrap();
        }
        source.recv(&mut buffers, 0, 64).unwrap();
        let power_db = pow_to_db(avg_power(buffers.channel(0)));
        assert!((power_db + 6.0).abs() < 0.1, "power {} dB", power_db);
        assert!((agc.gain_db() - 34.0).abs() < 0.1);
    }
}
