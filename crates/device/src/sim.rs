//! Simulated hardware backend for local development (default `sim` feature).
//!
//! Models the analog sensor behaviour well enough to exercise the whole
//! pipeline without a board:
//! - Temporal coherence via random walk with mean reversion
//! - Per-reading ADC electronic noise
//! - Occasional spikes (sensor flakiness)
//! - Lamp feedback on the light channel (the simulated room gets brighter
//!   when the lamp is on)
//!
//! Actuator, voice and display calls are logged instead of driving pins.

use std::fmt;

use tracing::info;

use crate::hal::{ClimateReading, Hardware, VoiceClip};

// ---------------------------------------------------------------------------
// Gaussian approximation (no extra dependency)
// ---------------------------------------------------------------------------

/// Approximate a sample from N(0,1) using the Irwin-Hall method:
/// sum of 12 uniform [0,1) values minus 6.
fn approx_std_normal() -> f64 {
    let mut sum: f64 = 0.0;
    for _ in 0..12 {
        sum += fastrand::f64();
    }
    sum - 6.0
}

/// Sample from N(mean, sigma).
fn gaussian(mean: f64, sigma: f64) -> f64 {
    mean + sigma * approx_std_normal()
}

// ---------------------------------------------------------------------------
// Scenario presets
// ---------------------------------------------------------------------------

/// Pre-configured simulation profiles selectable via `SIM_SCENARIO` env var.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scenario {
    /// Clean air, bright room, low noise. The boring happy path.
    Calm,
    /// Gas level slowly climbs toward the alarm range. Tests the baseline
    /// differential and the ppm remap under a real trend.
    GasLeak,
    /// Light fades toward darkness. Tests the auto-mode thresholds.
    Dusk,
    /// High noise sigma, ~8% spike rate. Tests smoothing robustness.
    Flaky,
}

impl Scenario {
    pub fn from_str_lossy(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "gasleak" | "gas_leak" => Self::GasLeak,
            "dusk" => Self::Dusk,
            "flaky" => Self::Flaky,
            _ => Self::Calm, // default
        }
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Calm => write!(f, "calm"),
            Self::GasLeak => write!(f, "gasleak"),
            Self::Dusk => write!(f, "dusk"),
            Self::Flaky => write!(f, "flaky"),
        }
    }
}

// ---------------------------------------------------------------------------
// Analog channel
// ---------------------------------------------------------------------------

/// One simulated ADC channel: random walk with mean reversion plus noise
/// and occasional spikes.
struct Channel {
    /// Current "true" value in ADC units. Evolves each sample.
    base: f64,
    /// Value the walk reverts toward (shifted by drift over time).
    center: f64,
    drift_per_sample: f64,
    walk_sigma: f64,
    mean_reversion: f64,
    noise_sigma: f64,
    spike_prob: f32,
    spike_sigma: f64,
    min: f64,
    max: f64,
}

impl Channel {
    fn sample(&mut self) -> u16 {
        self.center = (self.center + self.drift_per_sample).clamp(self.min, self.max);

        let pull = self.mean_reversion * (self.center - self.base);
        let walk = gaussian(0.0, self.walk_sigma);
        self.base = (self.base + pull + walk).clamp(self.min, self.max);

        let noise = gaussian(0.0, self.noise_sigma);
        let spike = if fastrand::f32() < self.spike_prob {
            gaussian(0.0, self.spike_sigma)
        } else {
            0.0
        };

        (self.base + noise + spike).round().clamp(self.min, self.max) as u16
    }
}

// ---------------------------------------------------------------------------
// Simulated board
// ---------------------------------------------------------------------------

pub struct SimHardware {
    gas: Channel,
    light: Channel,
    lamp_on: bool,
    /// How much the room brightens (raw ADC drop) while the lamp is on.
    lamp_light_boost: f64,
}

impl SimHardware {
    pub fn new(scenario: Scenario) -> Self {
        info!(%scenario, "simulated hardware backend");

        // (gas_start, gas_drift, light_start, light_drift, walk, noise, spike_prob, spike_sigma)
        let p = match scenario {
            Scenario::Calm => (400.0, 0.0, 1200.0, 0.0, 8.0, 5.0, 0.005_f32, 300.0),
            Scenario::GasLeak => (400.0, 4.0, 1200.0, 0.0, 10.0, 6.0, 0.01, 300.0),
            Scenario::Dusk => (400.0, 0.0, 1200.0, 12.0, 10.0, 6.0, 0.01, 300.0),
            Scenario::Flaky => (450.0, 0.0, 1500.0, 0.0, 40.0, 60.0, 0.08, 900.0),
        };
        let (gas_start, gas_drift, light_start, light_drift, walk, noise, spike_prob, spike_sigma) =
            p;

        let channel = |start: f64, drift: f64| Channel {
            base: start,
            center: start,
            drift_per_sample: drift,
            walk_sigma: walk,
            mean_reversion: 0.05,
            noise_sigma: noise,
            spike_prob,
            spike_sigma,
            min: 0.0,
            max: 4095.0,
        };

        Self {
            gas: channel(gas_start, gas_drift),
            light: channel(light_start, light_drift),
            lamp_on: false,
            lamp_light_boost: 600.0,
        }
    }

    pub fn from_env() -> Self {
        let scenario = std::env::var("SIM_SCENARIO")
            .map(|s| Scenario::from_str_lossy(&s))
            .unwrap_or(Scenario::Calm);
        Self::new(scenario)
    }
}

impl Hardware for SimHardware {
    fn read_climate(&mut self) -> Option<ClimateReading> {
        Some(ClimateReading {
            temperature_c: gaussian(22.0, 0.3) as f32,
            humidity_pct: gaussian(50.0, 1.0).clamp(0.0, 100.0) as f32,
        })
    }

    fn read_gas_raw(&mut self) -> u16 {
        self.gas.sample()
    }

    fn read_light_raw(&mut self) -> u16 {
        let raw = self.light.sample();
        if self.lamp_on {
            // Brighter room reads lower on the divider.
            (f64::from(raw) - self.lamp_light_boost).max(0.0) as u16
        } else {
            raw
        }
    }

    fn set_lamp(&mut self, on: bool) {
        self.lamp_on = on;
        info!(on, "sim: lamp relay");
    }

    fn set_lock(&mut self, locked: bool) {
        info!(locked, "sim: door lock");
    }

    fn set_curtain(&mut self, open: bool) {
        info!(open, "sim: curtain servo");
    }

    fn set_buzzer(&mut self, on: bool) {
        info!(on, "sim: buzzer");
    }

    fn play_voice(&mut self, clip: VoiceClip) {
        info!(?clip, "sim: voice clip");
    }

    fn poll_key(&mut self) -> Option<char> {
        None
    }

    fn show_line(&mut self, row: u8, text: &str) {
        info!(row, text, "sim: display");
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn collect_gas(hw: &mut SimHardware, n: usize) -> Vec<u16> {
        (0..n).map(|_| hw.read_gas_raw()).collect()
    }

    #[test]
    fn readings_within_adc_range() {
        let mut hw = SimHardware::new(Scenario::Flaky);
        for _ in 0..500 {
            assert!(hw.read_gas_raw() <= 4095);
            assert!(hw.read_light_raw() <= 4095);
        }
    }

    #[test]
    fn temporal_coherence() {
        // Consecutive calm readings should be far closer than the full range.
        let mut hw = SimHardware::new(Scenario::Calm);
        let samples = collect_gas(&mut hw, 100);
        let max_jump = samples
            .windows(2)
            .map(|w| w[1].abs_diff(w[0]))
            .max()
            .unwrap();
        assert!(max_jump < 1500, "max consecutive jump too large: {max_jump}");
    }

    #[test]
    fn gas_leak_scenario_trends_upward() {
        let mut hw = SimHardware::new(Scenario::GasLeak);
        let early: f64 = collect_gas(&mut hw, 20).iter().map(|&v| f64::from(v)).sum::<f64>() / 20.0;
        for _ in 0..300 {
            hw.read_gas_raw();
        }
        let late: f64 = collect_gas(&mut hw, 20).iter().map(|&v| f64::from(v)).sum::<f64>() / 20.0;
        assert!(late > early, "leak should trend up: early={early:.0} late={late:.0}");
    }

    #[test]
    fn lamp_brightens_the_room() {
        let mut hw = SimHardware::new(Scenario::Calm);
        let dark: f64 = (0..30).map(|_| f64::from(hw.read_light_raw())).sum::<f64>() / 30.0;
        hw.set_lamp(true);
        let lit: f64 = (0..30).map(|_| f64::from(hw.read_light_raw())).sum::<f64>() / 30.0;
        assert!(lit < dark, "lamp on must lower the raw light reading");
    }

    #[test]
    fn scenario_from_str_lossy() {
        assert_eq!(Scenario::from_str_lossy("gasleak"), Scenario::GasLeak);
        assert_eq!(Scenario::from_str_lossy("GAS_LEAK"), Scenario::GasLeak);
        assert_eq!(Scenario::from_str_lossy("Dusk"), Scenario::Dusk);
        assert_eq!(Scenario::from_str_lossy("flaky"), Scenario::Flaky);
        assert_eq!(Scenario::from_str_lossy("unknown"), Scenario::Calm);
        assert_eq!(Scenario::from_str_lossy(""), Scenario::Calm);
    }

    #[test]
    fn keypad_is_empty() {
        assert!(SimHardware::new(Scenario::Calm).poll_key().is_none());
    }
}
