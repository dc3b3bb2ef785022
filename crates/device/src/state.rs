//! In-memory device state. One `AppState` is owned by the scheduler loop and
//! passed by `&mut` into every controller entry point — no globals, no locks;
//! correctness rests on the single-threaded tick ordering.

use serde::{Deserialize, Serialize};
use std::time::Instant;

use crate::config::Config;
use crate::smoothing::{GasCalibration, SmoothingWindow};

// ---------------------------------------------------------------------------
// Shared enums
// ---------------------------------------------------------------------------

/// Operating mode for the lamp and curtain: direct commands only, or driven
/// by the light-threshold evaluator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Manual,
    Auto,
}

/// Who caused an actuator transition. Carried in status events so
/// subscribers can tell a user toggle from an automatic one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    Manual,
    Auto,
}

/// How the door was locked/unlocked, carried through to the status event
/// for the backend's access log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockMethod {
    Remote,
    Pin,
    Face,
    Auto,
    Startup,
}

// ---------------------------------------------------------------------------
// Sensor state
// ---------------------------------------------------------------------------

/// Most recent derived readings, recomputed once per sensor-read tick.
/// Temperature/humidity keep their last valid value across sensor faults;
/// `gas_ppm` is frozen during the post-lamp-switch skip window.
#[derive(Debug, Clone, Copy, Default)]
pub struct SensorSample {
    pub temperature_c: f32,
    pub humidity_pct: f32,
    pub gas_ppm: u16,
    pub light_lux: u16,
}

// ---------------------------------------------------------------------------
// Actuator state
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct LampState {
    pub on: bool,
    pub mode: Mode,
    /// Timestamp of the last applied transition; drives both the command
    /// debounce and the gas skip window.
    pub last_change: Option<Instant>,
}

#[derive(Debug)]
pub struct CurtainState {
    pub open: bool,
    pub mode: Mode,
    pub last_change: Option<Instant>,
}

#[derive(Debug)]
pub struct DoorState {
    pub locked: bool,
    pub relock_pending: bool,
    pub unlocked_at: Option<Instant>,
}

#[derive(Debug, Default)]
pub struct BuzzerState {
    pub active: bool,
    /// Current physical output while the on/off pattern runs.
    pub output_on: bool,
    pub last_toggle: Option<Instant>,
}

// ---------------------------------------------------------------------------
// Access state
// ---------------------------------------------------------------------------

/// Live keypad entry. At most one session exists (the device has one
/// keypad); cleared on submit result, cancel key, or timeout.
#[derive(Debug, Default)]
pub struct PinSession {
    pub digits: String,
    pub awaiting_verification: bool,
    pub requested_at: Option<Instant>,
}

/// Transient second-row display message with its expiry deadline.
#[derive(Debug)]
pub struct Transient {
    pub text: String,
    pub until: Instant,
}

// ---------------------------------------------------------------------------
// Diagnostics
// ---------------------------------------------------------------------------

/// Internal counters published in the debug payload.
#[derive(Debug, Default, Serialize)]
pub struct Counters {
    pub lamp_toggles: u32,
    pub curtain_moves: u32,
    pub door_unlocks: u32,
    pub door_relocks: u32,
    pub debounce_rejects: u32,
    pub decode_errors: u32,
    pub pin_rejects: u32,
    pub pin_timeouts: u32,
    pub sensor_faults: u32,
}

// ---------------------------------------------------------------------------
// AppState
// ---------------------------------------------------------------------------

pub struct AppState {
    pub started_at: Instant,

    // Sensors
    pub sample: SensorSample,
    pub gas_window: SmoothingWindow,
    pub light_window: SmoothingWindow,
    pub gas_cal: GasCalibration,
    /// Baseline sampling starts only after this instant (heater warm-up).
    pub gas_warmup_until: Instant,
    /// While set and in the future, the published gas value stays frozen.
    pub gas_skip_until: Option<Instant>,

    // Actuators
    pub lamp: LampState,
    pub curtain: CurtainState,
    pub door: DoorState,
    pub buzzer: BuzzerState,

    // Access
    pub pin: Option<PinSession>,
    pub transient: Option<Transient>,

    pub counters: Counters,
}

impl AppState {
    pub fn new(cfg: &Config, now: Instant) -> Self {
        Self {
            started_at: now,
            sample: SensorSample::default(),
            gas_window: SmoothingWindow::new(),
            light_window: SmoothingWindow::new(),
            gas_cal: GasCalibration::default(),
            gas_warmup_until: now + cfg.gas.warmup(),
            gas_skip_until: None,
            lamp: LampState {
                on: false,
                mode: Mode::Manual,
                last_change: None,
            },
            curtain: CurtainState {
                open: false,
                mode: Mode::Manual,
                last_change: None,
            },
            door: DoorState {
                locked: true,
                relock_pending: false,
                unlocked_at: None,
            },
            buzzer: BuzzerState::default(),
            pin: None,
            transient: None,
            counters: Counters::default(),
        }
    }

    /// True while gas readings must stay frozen after a lamp relay switch.
    pub fn in_gas_skip_window(&self, now: Instant) -> bool {
        self.gas_skip_until.is_some_and(|until| now < until)
    }

    pub fn uptime_sec(&self, now: Instant) -> u64 {
        now.duration_since(self.started_at).as_secs()
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn boot_state_is_failsafe() {
        let st = AppState::new(&Config::default(), Instant::now());
        assert!(st.door.locked);
        assert!(!st.lamp.on);
        assert!(!st.curtain.open);
        assert!(!st.buzzer.active);
        assert_eq!(st.lamp.mode, Mode::Manual);
        assert!(st.pin.is_none());
    }

    #[test]
    fn gas_skip_window_expires() {
        let now = Instant::now();
        let mut st = AppState::new(&Config::default(), now);
        assert!(!st.in_gas_skip_window(now));

        st.gas_skip_until = Some(now + Duration::from_secs(3));
        assert!(st.in_gas_skip_window(now));
        assert!(st.in_gas_skip_window(now + Duration::from_secs(2)));
        assert!(!st.in_gas_skip_window(now + Duration::from_secs(3)));
    }

    #[test]
    fn mode_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Mode::Auto).unwrap(), "\"auto\"");
        assert_eq!(
            serde_json::to_string(&LockMethod::Startup).unwrap(),
            "\"startup\""
        );
    }
}
