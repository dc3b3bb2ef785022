//! Sensor acquisition: runs once per read interval, smooths the analog
//! channels and derives the published values.
//!
//! Gas goes through three gates: the boot warm-up delay, the one-shot
//! baseline calibration, and the post-lamp-switch skip window (raw samples
//! keep flowing into the ring buffer during the skip window, but the
//! published ppm stays frozen).

use std::time::Instant;

use tracing::{debug, info, warn};

use crate::config::Config;
use crate::hal::Hardware;
use crate::state::AppState;

/// Top of the published gas/light scales.
const SCALE_MAX: u32 = 1000;

// ---------------------------------------------------------------------------
// Read tick
// ---------------------------------------------------------------------------

pub fn read_tick<H: Hardware>(state: &mut AppState, hw: &mut H, cfg: &Config, now: Instant) {
    read_climate(state, hw);
    read_gas(state, hw, cfg, now);
    read_light(state, hw, cfg);
}

/// Temperature/humidity: a failed or non-finite read keeps the previous
/// values. Never fatal.
fn read_climate<H: Hardware>(state: &mut AppState, hw: &mut H) {
    match hw.read_climate() {
        Some(c) if c.temperature_c.is_finite() && c.humidity_pct.is_finite() => {
            state.sample.temperature_c = c.temperature_c;
            state.sample.humidity_pct = c.humidity_pct;
        }
        _ => {
            state.counters.sensor_faults += 1;
            warn!("climate read failed — keeping last values");
        }
    }
}

fn read_gas<H: Hardware>(state: &mut AppState, hw: &mut H, cfg: &Config, now: Instant) {
    let raw = hw.read_gas_raw();
    state.gas_window.push(raw);
    let avg = state.gas_window.average();

    if !state.gas_cal.is_calibrated() {
        if now < state.gas_warmup_until {
            return; // heater still warming up
        }
        if state.gas_cal.note_sample(avg, cfg.gas.baseline_samples) {
            info!(baseline = state.gas_cal.baseline(), "gas baseline calibrated");
        }
        return;
    }

    if state.in_gas_skip_window(now) {
        debug!("gas read inside skip window — published value frozen");
        return;
    }

    let diff = avg.saturating_sub(state.gas_cal.baseline());
    state.sample.gas_ppm = gas_ppm_from_diff(diff, cfg.gas.noise_threshold, cfg.gas.raw_span);
}

fn read_light<H: Hardware>(state: &mut AppState, hw: &mut H, cfg: &Config) {
    let raw = hw.read_light_raw();
    state.light_window.push(raw);
    state.sample.light_lux = lux_from_raw(state.light_window.average(), cfg.light.adc_max);
}

// ---------------------------------------------------------------------------
// Remaps
// ---------------------------------------------------------------------------

/// Map the raw differential over the baseline onto the 0-1000 ppm scale.
/// Below the noise threshold the reading is reported as 0 ("safe"); the
/// span endpoint is a config policy choice, not a physical constant.
pub fn gas_ppm_from_diff(diff: u16, noise_threshold: u16, raw_span: u16) -> u16 {
    if diff <= noise_threshold {
        return 0;
    }
    let scaled = u32::from(diff) * SCALE_MAX / u32::from(raw_span);
    scaled.min(SCALE_MAX) as u16
}

/// The photoresistor divider reads *lower* in bright light, so the raw
/// range is inverted to publish 0 (dark) .. 1000 (bright).
pub fn lux_from_raw(avg: u16, adc_max: u16) -> u16 {
    let clamped = avg.min(adc_max);
    (u32::from(adc_max - clamped) * SCALE_MAX / u32::from(adc_max)) as u16
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::MockHardware;
    use crate::smoothing::WINDOW_CAPACITY;
    use std::time::Duration;

    fn setup() -> (AppState, MockHardware, Config, Instant) {
        let cfg = Config::default();
        let now = Instant::now();
        (
            AppState::new(&cfg, now),
            MockHardware::with_climate(24.5, 60.0),
            cfg,
            now,
        )
    }

    /// Run read ticks from the end of warm-up until the gas baseline is
    /// calibrated, returning the instant after the last read.
    fn calibrate(state: &mut AppState, hw: &mut MockHardware, cfg: &Config) -> Instant {
        let mut t = state.gas_warmup_until;
        for _ in 0..cfg.gas.baseline_samples {
            read_tick(state, hw, cfg, t);
            t += cfg.intervals.sensor_read();
        }
        assert!(state.gas_cal.is_calibrated());
        t
    }

    // -- Climate -------------------------------------------------------------

    #[test]
    fn climate_read_updates_sample() {
        let (mut st, mut hw, cfg, now) = setup();
        read_tick(&mut st, &mut hw, &cfg, now);
        assert_eq!(st.sample.temperature_c, 24.5);
        assert_eq!(st.sample.humidity_pct, 60.0);
    }

    #[test]
    fn climate_fault_retains_last_values() {
        let (mut st, mut hw, cfg, now) = setup();
        read_tick(&mut st, &mut hw, &cfg, now);

        hw.climate = None;
        read_tick(&mut st, &mut hw, &cfg, now + Duration::from_secs(2));

        assert_eq!(st.sample.temperature_c, 24.5);
        assert_eq!(st.sample.humidity_pct, 60.0);
        assert_eq!(st.counters.sensor_faults, 1);
    }

    #[test]
    fn climate_nan_is_a_fault() {
        let (mut st, mut hw, cfg, now) = setup();
        read_tick(&mut st, &mut hw, &cfg, now);

        hw.climate = Some(crate::hal::ClimateReading {
            temperature_c: f32::NAN,
            humidity_pct: 60.0,
        });
        read_tick(&mut st, &mut hw, &cfg, now + Duration::from_secs(2));

        assert_eq!(st.sample.temperature_c, 24.5);
        assert_eq!(st.counters.sensor_faults, 1);
    }

    // -- Gas: calibration ------------------------------------------------------

    #[test]
    fn gas_stays_zero_before_warmup_ends() {
        let (mut st, mut hw, cfg, now) = setup();
        hw.gas_raw = 3000;

        read_tick(&mut st, &mut hw, &cfg, now);
        assert!(!st.gas_cal.is_calibrated());
        assert_eq!(st.sample.gas_ppm, 0);
    }

    #[test]
    fn gas_baseline_set_after_sampling_pass() {
        let (mut st, mut hw, cfg, _now) = setup();
        hw.gas_raw = 400;
        calibrate(&mut st, &mut hw, &cfg);
        // Constant input for a full window: baseline equals the raw level.
        assert_eq!(st.gas_cal.baseline(), 400);
        assert_eq!(st.sample.gas_ppm, 0);
    }

    // -- Gas: remap ------------------------------------------------------------

    #[test]
    fn gas_below_noise_threshold_reports_safe() {
        assert_eq!(gas_ppm_from_diff(0, 50, 600), 0);
        assert_eq!(gas_ppm_from_diff(50, 50, 600), 0);
    }

    #[test]
    fn gas_above_threshold_maps_linearly() {
        assert_eq!(gas_ppm_from_diff(300, 50, 600), 500);
        assert_eq!(gas_ppm_from_diff(600, 50, 600), 1000);
    }

    #[test]
    fn gas_remap_saturates_at_scale_top() {
        assert_eq!(gas_ppm_from_diff(5000, 50, 600), 1000);
    }

    #[test]
    fn gas_rise_after_calibration_is_published() {
        let (mut st, mut hw, cfg, _now) = setup();
        hw.gas_raw = 400;
        let mut t = calibrate(&mut st, &mut hw, &cfg);

        // Gas concentration rises well above baseline + noise.
        hw.gas_raw = 1000;
        for _ in 0..WINDOW_CAPACITY {
            read_tick(&mut st, &mut hw, &cfg, t);
            t += cfg.intervals.sensor_read();
        }
        // diff = 1000 - 400 = 600 → full scale with default span.
        assert_eq!(st.sample.gas_ppm, 1000);
    }

    // -- Gas: skip window ---------------------------------------------------------

    #[test]
    fn skip_window_freezes_published_gas() {
        let (mut st, mut hw, cfg, _now) = setup();
        hw.gas_raw = 400;
        let mut t = calibrate(&mut st, &mut hw, &cfg);

        hw.gas_raw = 700;
        for _ in 0..WINDOW_CAPACITY {
            read_tick(&mut st, &mut hw, &cfg, t);
            t += cfg.intervals.sensor_read();
        }
        let published = st.sample.gas_ppm;
        assert!(published > 0);

        // Lamp relay switched: skip window opens. New (huge) raw samples
        // must keep flowing into the window without moving the published
        // value.
        st.gas_skip_until = Some(t + cfg.gas.skip_after_lamp());
        hw.gas_raw = 4000;
        let sum_before = st.gas_window.running_sum();
        read_tick(&mut st, &mut hw, &cfg, t);
        assert_eq!(st.sample.gas_ppm, published, "published gas must stay frozen");
        assert_ne!(st.gas_window.running_sum(), sum_before, "smoothing keeps running");

        // Window over: the next read publishes again.
        let after = t + cfg.gas.skip_after_lamp();
        read_tick(&mut st, &mut hw, &cfg, after);
        assert!(st.sample.gas_ppm > published);
    }

    // -- Light ---------------------------------------------------------------------

    #[test]
    fn lux_inverts_raw_scale() {
        assert_eq!(lux_from_raw(0, 4095), 1000); // bright: low raw
        assert_eq!(lux_from_raw(4095, 4095), 0); // dark: high raw
    }

    #[test]
    fn lux_clamps_out_of_range_raw() {
        assert_eq!(lux_from_raw(5000, 4095), 0);
    }

    #[test]
    fn light_read_smooths_then_inverts() {
        let (mut st, mut hw, cfg, now) = setup();
        hw.light_raw = 4095;
        let mut t = now;
        for _ in 0..WINDOW_CAPACITY {
            read_tick(&mut st, &mut hw, &cfg, t);
            t += cfg.intervals.sensor_read();
        }
        assert_eq!(st.sample.light_lux, 0);

        hw.light_raw = 0;
        for _ in 0..WINDOW_CAPACITY {
            read_tick(&mut st, &mut hw, &cfg, t);
            t += cfg.intervals.sensor_read();
        }
        assert_eq!(st.sample.light_lux, 1000);
    }
}
