//! TOML config file loading and validation. Every tunable the controller
//! uses (intervals, lux thresholds, gas calibration endpoints, GPIO pins)
//! lives here with a default, so the device runs with no config file at all.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::time::Duration;

// ---------------------------------------------------------------------------
// Config sections
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub mqtt: MqttConfig,
    #[serde(default)]
    pub intervals: Intervals,
    #[serde(default)]
    pub thresholds: Thresholds,
    #[serde(default)]
    pub gas: GasConfig,
    #[serde(default)]
    pub light: LightConfig,
    #[serde(default)]
    pub devices: DevicesConfig,
    #[serde(default)]
    pub door: DoorConfig,
    #[serde(default)]
    pub access: AccessConfig,
    #[serde(default)]
    pub display: DisplayConfig,
    #[serde(default)]
    pub gpio: GpioConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 1883,
            client_id: "smarthome-device".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Intervals {
    /// How often all sensors are read (seconds).
    pub sensor_read_sec: u64,
    /// How often the auto-mode evaluator compares light against thresholds.
    pub auto_eval_sec: u64,
    /// How often telemetry + the debug payload are published.
    pub telemetry_sec: u64,
    /// Buzzer on/off toggle period while active (milliseconds).
    pub buzzer_toggle_ms: u64,
}

impl Default for Intervals {
    fn default() -> Self {
        Self {
            sensor_read_sec: 2,
            auto_eval_sec: 3,
            telemetry_sec: 5,
            buzzer_toggle_ms: 500,
        }
    }
}

impl Intervals {
    pub fn sensor_read(&self) -> Duration {
        Duration::from_secs(self.sensor_read_sec)
    }
    pub fn auto_eval(&self) -> Duration {
        Duration::from_secs(self.auto_eval_sec)
    }
    pub fn telemetry(&self) -> Duration {
        Duration::from_secs(self.telemetry_sec)
    }
    pub fn buzzer_toggle(&self) -> Duration {
        Duration::from_millis(self.buzzer_toggle_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    /// Lamp auto mode turns the lamp on when published lux drops below this.
    pub lamp_on_below_lux: u16,
    /// Curtain auto mode opens the curtain when published lux drops below this.
    pub curtain_open_below_lux: u16,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            lamp_on_below_lux: 300,
            curtain_open_below_lux: 400,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GasConfig {
    /// Warm-up delay after boot before baseline sampling starts (seconds).
    /// The MQ-type sensor heater needs time before readings are meaningful.
    pub warmup_sec: u64,
    /// Number of smoothed samples averaged into the baseline.
    pub baseline_samples: u32,
    /// Raw differential below this is reported as 0 ppm ("safe").
    pub noise_threshold: u16,
    /// Raw differential mapped to the top of the 0-1000 ppm scale. This is a
    /// policy endpoint, not a physical constant.
    pub raw_span: u16,
    /// Gas readings are frozen for this long after any lamp relay switch,
    /// which electrically disturbs the analog gas sensor.
    pub skip_after_lamp_sec: u64,
}

impl Default for GasConfig {
    fn default() -> Self {
        Self {
            warmup_sec: 30,
            baseline_samples: 10,
            noise_threshold: 50,
            raw_span: 600,
            skip_after_lamp_sec: 3,
        }
    }
}

impl GasConfig {
    pub fn warmup(&self) -> Duration {
        Duration::from_secs(self.warmup_sec)
    }
    pub fn skip_after_lamp(&self) -> Duration {
        Duration::from_secs(self.skip_after_lamp_sec)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LightConfig {
    /// Maximum raw ADC value for the light sensor (12-bit by default).
    /// Brighter light produces a *lower* raw value, so the published lux
    /// scale is inverted against this endpoint.
    pub adc_max: u16,
}

impl Default for LightConfig {
    fn default() -> Self {
        Self { adc_max: 4095 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DevicesConfig {
    /// Minimum gap between applied lamp/curtain commands. A repeat inside
    /// this window is ignored and logged, never queued.
    pub debounce_sec: u64,
}

impl Default for DevicesConfig {
    fn default() -> Self {
        Self { debounce_sec: 2 }
    }
}

impl DevicesConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_secs(self.debounce_sec)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DoorConfig {
    /// Automatic relock delay after entering Unlocked.
    pub relock_sec: u64,
}

impl Default for DoorConfig {
    fn default() -> Self {
        Self { relock_sec: 5 }
    }
}

impl DoorConfig {
    pub fn relock(&self) -> Duration {
        Duration::from_secs(self.relock_sec)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AccessConfig {
    /// How long to wait for a PIN verification response before clearing the
    /// session. The door never unlocks on timeout.
    pub verify_timeout_sec: u64,
}

impl Default for AccessConfig {
    fn default() -> Self {
        Self { verify_timeout_sec: 5 }
    }
}

impl AccessConfig {
    pub fn verify_timeout(&self) -> Duration {
        Duration::from_secs(self.verify_timeout_sec)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    /// How long transient messages (access result, PIN feedback) stay on the
    /// second display row before the normal view returns.
    pub transient_sec: u64,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self { transient_sec: 3 }
    }
}

impl DisplayConfig {
    pub fn transient(&self) -> Duration {
        Duration::from_secs(self.transient_sec)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GpioConfig {
    pub lamp_pin: u8,
    pub lock_pin: u8,
    pub buzzer_pin: u8,
    pub servo_pin: u8,
    /// Many common relay boards are active-low.
    pub active_low: bool,
    /// ADS1115 I2C address (gas on AIN0, light on AIN1).
    pub adc_addr: u16,
    /// SHT31 temperature/humidity sensor I2C address.
    pub climate_addr: u16,
    pub keypad_rows: [u8; 4],
    pub keypad_cols: [u8; 4],
}

impl Default for GpioConfig {
    fn default() -> Self {
        Self {
            lamp_pin: 17,
            lock_pin: 27,
            buzzer_pin: 22,
            servo_pin: 18,
            active_low: true,
            adc_addr: 0x48,
            climate_addr: 0x44,
            keypad_rows: [5, 6, 13, 19],
            keypad_cols: [26, 20, 21, 16],
        }
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// BCM GPIO pins available on the Raspberry Pi 40-pin header for general
/// use. GPIO 0-1 are reserved for the ID EEPROM and must never be used.
const VALID_GPIO_PINS: &[u8] = &[
    2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 17, 18, 19, 20, 21, 22, 23, 24, 25, 26, 27,
];

impl Config {
    /// Validate all config entries. Returns `Ok(())` or an error describing
    /// every violation found (not just the first one).
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        self.validate_timing(&mut errors);
        self.validate_sensing(&mut errors);
        self.validate_gpio(&mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            bail!(
                "config validation failed ({} error{}):\n  - {}",
                errors.len(),
                if errors.len() == 1 { "" } else { "s" },
                errors.join("\n  - ")
            );
        }
    }

    fn validate_timing(&self, errors: &mut Vec<String>) {
        let positive: &[(&str, u64)] = &[
            ("intervals.sensor_read_sec", self.intervals.sensor_read_sec),
            ("intervals.auto_eval_sec", self.intervals.auto_eval_sec),
            ("intervals.telemetry_sec", self.intervals.telemetry_sec),
            ("intervals.buzzer_toggle_ms", self.intervals.buzzer_toggle_ms),
            ("devices.debounce_sec", self.devices.debounce_sec),
            ("door.relock_sec", self.door.relock_sec),
            ("access.verify_timeout_sec", self.access.verify_timeout_sec),
            ("display.transient_sec", self.display.transient_sec),
        ];
        for (name, value) in positive {
            if *value == 0 {
                errors.push(format!("{name} must be positive"));
            }
        }
    }

    fn validate_sensing(&self, errors: &mut Vec<String>) {
        if self.thresholds.lamp_on_below_lux > 1000 {
            errors.push(format!(
                "thresholds.lamp_on_below_lux {} out of lux scale [0, 1000]",
                self.thresholds.lamp_on_below_lux
            ));
        }
        if self.thresholds.curtain_open_below_lux > 1000 {
            errors.push(format!(
                "thresholds.curtain_open_below_lux {} out of lux scale [0, 1000]",
                self.thresholds.curtain_open_below_lux
            ));
        }
        if self.gas.baseline_samples == 0 {
            errors.push("gas.baseline_samples must be positive".to_string());
        }
        if self.gas.raw_span == 0 {
            errors.push("gas.raw_span must be positive — remap range is zero".to_string());
        }
        if self.gas.noise_threshold >= self.gas.raw_span {
            errors.push(format!(
                "gas.noise_threshold ({}) must be below gas.raw_span ({})",
                self.gas.noise_threshold, self.gas.raw_span
            ));
        }
        if self.light.adc_max == 0 {
            errors.push("light.adc_max must be positive".to_string());
        }
    }

    fn validate_gpio(&self, errors: &mut Vec<String>) {
        let mut seen: HashSet<u8> = HashSet::new();
        let mut pins: Vec<(&str, u8)> = vec![
            ("gpio.lamp_pin", self.gpio.lamp_pin),
            ("gpio.lock_pin", self.gpio.lock_pin),
            ("gpio.buzzer_pin", self.gpio.buzzer_pin),
            ("gpio.servo_pin", self.gpio.servo_pin),
        ];
        for (i, p) in self.gpio.keypad_rows.iter().enumerate() {
            pins.push((["gpio.keypad_rows[0]", "gpio.keypad_rows[1]", "gpio.keypad_rows[2]", "gpio.keypad_rows[3]"][i], *p));
        }
        for (i, p) in self.gpio.keypad_cols.iter().enumerate() {
            pins.push((["gpio.keypad_cols[0]", "gpio.keypad_cols[1]", "gpio.keypad_cols[2]", "gpio.keypad_cols[3]"][i], *p));
        }

        for (name, pin) in pins {
            if !VALID_GPIO_PINS.contains(&pin) {
                errors.push(format!(
                    "{name}: pin {pin} is not a valid BCM GPIO pin (allowed: 2-27)"
                ));
            } else if !seen.insert(pin) {
                errors.push(format!("{name}: pin {pin} is already used elsewhere"));
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Load
// ---------------------------------------------------------------------------

/// Read, parse, and validate a TOML config file.
pub fn load(path: &str) -> Result<Config> {
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("failed to read config: {path}"))?;
    let config: Config =
        toml::from_str(&contents).with_context(|| format!("failed to parse config: {path}"))?;
    config
        .validate()
        .with_context(|| format!("invalid config: {path}"))?;
    Ok(config)
}

// ===========================================================================
// Tests
// ===========================================================================
