//! Hardware capability interface. The controllers never touch pins
//! directly; they go through this trait so the control logic runs unchanged
//! against the simulator (`sim` feature), the Raspberry Pi board (`gpio`
//! feature), or the recording mock used by tests.

/// One temperature/humidity read. `None` means the sensor faulted this tick
/// (the previous values are retained upstream).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClimateReading {
    pub temperature_c: f32,
    pub humidity_pct: f32,
}

/// Clips on the voice-playback module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceClip {
    AccessGranted,
    AccessDenied,
}

pub trait Hardware {
    // -- sensors --
    fn read_climate(&mut self) -> Option<ClimateReading>;
    fn read_gas_raw(&mut self) -> u16;
    fn read_light_raw(&mut self) -> u16;

    // -- actuators (each output is owned by exactly one controller) --
    fn set_lamp(&mut self, on: bool);
    fn set_lock(&mut self, locked: bool);
    fn set_curtain(&mut self, open: bool);
    fn set_buzzer(&mut self, on: bool);
    fn play_voice(&mut self, clip: VoiceClip);

    // -- local keypad / display --
    /// Non-blocking: returns at most one pending key per call.
    fn poll_key(&mut self) -> Option<char>;
    fn show_line(&mut self, row: u8, text: &str);
}

// ---------------------------------------------------------------------------
// Recording mock (tests only)
// ---------------------------------------------------------------------------

/// Test double that returns scripted sensor values and records every
/// actuator/display call.
#[cfg(test)]
#[derive(Debug, Default)]
pub struct MockHardware {
    pub climate: Option<ClimateReading>,
    pub gas_raw: u16,
    pub light_raw: u16,

    pub lamp_calls: Vec<bool>,
    pub lock_calls: Vec<bool>,
    pub curtain_calls: Vec<bool>,
    pub buzzer_calls: Vec<bool>,
    pub voice_calls: Vec<VoiceClip>,

    pub key_queue: std::collections::VecDeque<char>,
    pub lines: [String; 2],
}

#[cfg(test)]
impl MockHardware {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_climate(temperature_c: f32, humidity_pct: f32) -> Self {
        Self {
            climate: Some(ClimateReading {
                temperature_c,
                humidity_pct,
            }),
            ..Self::default()
        }
    }

    pub fn press_keys(&mut self, keys: &str) {
        self.key_queue.extend(keys.chars());
    }
}

#[cfg(test)]
impl Hardware for MockHardware {
    fn read_climate(&mut self) -> Option<ClimateReading> {
        self.climate
    }

    fn read_gas_raw(&mut self) -> u16 {
        self.gas_raw
    }

    fn read_light_raw(&mut self) -> u16 {
        self.light_raw
    }

    fn set_lamp(&mut self, on: bool) {
        self.lamp_calls.push(on);
    }

    fn set_lock(&mut self, locked: bool) {
        self.lock_calls.push(locked);
    }

    fn set_curtain(&mut self, open: bool) {
        self.curtain_calls.push(open);
    }

    fn set_buzzer(&mut self, on: bool) {
        self.buzzer_calls.push(on);
    }

    fn play_voice(&mut self, clip: VoiceClip) {
        self.voice_calls.push(clip);
    }

    fn poll_key(&mut self) -> Option<char> {
        self.key_queue.pop_front()
    }

    fn show_line(&mut self, row: u8, text: &str) {
        self.lines[usize::from(row).min(1)] = text.to_string();
    }
}
