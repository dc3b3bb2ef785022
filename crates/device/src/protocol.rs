//! MQTT topic map, payload codecs and inbound dispatch.
//!
//! Everything on the wire is compact JSON. Outbound messages are queued into
//! an [`Outbox`] by the controllers and drained by the main loop, so no
//! controller ever touches the network client directly. Inbound messages are
//! decoded here and routed to exactly one controller; a payload that fails to
//! decode is counted, logged and dropped — it never stops the loop.

use std::time::Instant;

use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use crate::access;
use crate::config::Config;
use crate::devices;
use crate::hal::Hardware;
use crate::state::{AppState, LockMethod, Mode, Origin};

// ---------------------------------------------------------------------------
// Topics
// ---------------------------------------------------------------------------

/// Wildcard covering all device control topics.
pub const TOPIC_CONTROL_FILTER: &str = "home/control/+";
const TOPIC_CONTROL_PREFIX: &str = "home/control/";

pub const TOPIC_SENSOR_TEMPERATURE: &str = "home/sensor/temperature";
pub const TOPIC_SENSOR_HUMIDITY: &str = "home/sensor/humidity";
pub const TOPIC_SENSOR_GAS: &str = "home/sensor/gas";
pub const TOPIC_SENSOR_LIGHT: &str = "home/sensor/light";
pub const TOPIC_SENSOR_DEBUG: &str = "home/sensor/debug";

pub const TOPIC_STATUS_LAMP: &str = "home/status/lamp";
pub const TOPIC_STATUS_DOOR: &str = "home/status/door";
pub const TOPIC_STATUS_CURTAIN: &str = "home/status/curtain";

pub const TOPIC_PIN_REQUEST: &str = "home/door/pin/request";
pub const TOPIC_PIN_RESPONSE: &str = "home/door/pin/response";

// ---------------------------------------------------------------------------
// Outbox
// ---------------------------------------------------------------------------

/// One message queued for publication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub topic: &'static str,
    pub payload: Vec<u8>,
}

/// Queue of messages produced during a tick. The main loop drains it after
/// every tick and hands the messages to the MQTT client.
#[derive(Debug, Default)]
pub struct Outbox {
    queue: Vec<OutboundMessage>,
}

impl Outbox {
    pub fn push(&mut self, msg: OutboundMessage) {
        self.queue.push(msg);
    }

    pub fn drain(&mut self) -> Vec<OutboundMessage> {
        std::mem::take(&mut self.queue)
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Outbound payload builders
// ---------------------------------------------------------------------------

pub fn lamp_status(on: bool, mode: Mode, origin: Origin) -> OutboundMessage {
    OutboundMessage {
        topic: TOPIC_STATUS_LAMP,
        payload: json!({
            "status": if on { "on" } else { "off" },
            "mode": mode,
            "origin": origin,
        })
        .to_string()
        .into_bytes(),
    }
}

pub fn curtain_status(open: bool, mode: Mode, origin: Origin) -> OutboundMessage {
    OutboundMessage {
        topic: TOPIC_STATUS_CURTAIN,
        payload: json!({
            "status": if open { "open" } else { "closed" },
            "mode": mode,
            "origin": origin,
        })
        .to_string()
        .into_bytes(),
    }
}

pub fn door_status(locked: bool, method: LockMethod) -> OutboundMessage {
    OutboundMessage {
        topic: TOPIC_STATUS_DOOR,
        payload: json!({
            "status": if locked { "locked" } else { "unlocked" },
            "method": method,
        })
        .to_string()
        .into_bytes(),
    }
}

pub fn pin_request(pin: &str) -> OutboundMessage {
    OutboundMessage {
        topic: TOPIC_PIN_REQUEST,
        payload: json!({ "pin_code": pin }).to_string().into_bytes(),
    }
}

/// Queue the full telemetry set: one message per sensor channel plus the
/// internal diagnostics payload.
pub fn publish_telemetry(state: &AppState, out: &mut Outbox, now: Instant) {
    let s = &state.sample;
    out.push(OutboundMessage {
        topic: TOPIC_SENSOR_TEMPERATURE,
        payload: json!({ "value": s.temperature_c, "unit": "C" })
            .to_string()
            .into_bytes(),
    });
    out.push(OutboundMessage {
        topic: TOPIC_SENSOR_HUMIDITY,
        payload: json!({ "value": s.humidity_pct, "unit": "%" })
            .to_string()
            .into_bytes(),
    });
    out.push(OutboundMessage {
        topic: TOPIC_SENSOR_GAS,
        payload: json!({ "ppm": s.gas_ppm, "unit": "ppm" })
            .to_string()
            .into_bytes(),
    });
    out.push(OutboundMessage {
        topic: TOPIC_SENSOR_LIGHT,
        payload: json!({ "lux": s.light_lux, "unit": "lux" })
            .to_string()
            .into_bytes(),
    });
    out.push(OutboundMessage {
        topic: TOPIC_SENSOR_DEBUG,
        payload: json!({
            "uptime_sec": state.uptime_sec(now),
            "counters": state.counters,
            "gas_avg_raw": state.gas_window.average(),
            "gas_baseline": state.gas_cal.baseline(),
            "gas_calibrated": state.gas_cal.is_calibrated(),
        })
        .to_string()
        .into_bytes(),
    });
}

// ---------------------------------------------------------------------------
// Inbound payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
enum SwitchAction {
    On,
    Off,
}

impl SwitchAction {
    fn is_on(self) -> bool {
        self == SwitchAction::On
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
enum DoorAction {
    Lock,
    Unlock,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
enum CurtainAction {
    Open,
    Close,
}

/// `home/control/lamp`: at least one of the fields must be present.
#[derive(Debug, Deserialize)]
struct LampControl {
    action: Option<SwitchAction>,
    mode: Option<Mode>,
}

#[derive(Debug, Deserialize)]
struct DoorControl {
    action: DoorAction,
    #[serde(default = "default_lock_method")]
    method: LockMethod,
}

fn default_lock_method() -> LockMethod {
    LockMethod::Remote
}

#[derive(Debug, Deserialize)]
struct CurtainControl {
    action: Option<CurtainAction>,
    mode: Option<Mode>,
}

#[derive(Debug, Deserialize)]
struct BuzzerControl {
    action: SwitchAction,
}

#[derive(Debug, Deserialize)]
struct PinResponse {
    valid: bool,
    #[serde(default)]
    message: String,
}

// ---------------------------------------------------------------------------
// Inbound dispatch
// ---------------------------------------------------------------------------

/// Route one inbound publish to its controller. Unknown topics and payloads
/// that fail to decode are logged, counted and dropped.
pub fn handle_inbound<H: Hardware>(
    state: &mut AppState,
    hw: &mut H,
    out: &mut Outbox,
    cfg: &Config,
    now: Instant,
    topic: &str,
    payload: &[u8],
) {
    if topic == TOPIC_PIN_RESPONSE {
        match serde_json::from_slice::<PinResponse>(payload) {
            Ok(resp) => {
                access::handle_verify_response(state, hw, out, cfg, now, resp.valid, &resp.message)
            }
            Err(e) => drop_malformed(state, topic, &e),
        }
        return;
    }

    let Some(device) = topic.strip_prefix(TOPIC_CONTROL_PREFIX) else {
        warn!(topic, "message on unexpected topic — dropped");
        return;
    };

    debug!(device, len = payload.len(), "control message");
    match device {
        "lamp" => match serde_json::from_slice::<LampControl>(payload) {
            Ok(ctl) if ctl.action.is_some() || ctl.mode.is_some() => {
                if let Some(mode) = ctl.mode {
                    devices::set_lamp_mode(state, out, mode);
                }
                if let Some(action) = ctl.action {
                    devices::set_lamp(state, hw, out, cfg, now, action.is_on(), Origin::Manual);
                }
            }
            Ok(_) => drop_empty(state, topic),
            Err(e) => drop_malformed(state, topic, &e),
        },
        "door" => match serde_json::from_slice::<DoorControl>(payload) {
            Ok(ctl) => match ctl.action {
                DoorAction::Lock => access::lock(state, hw, out, ctl.method),
                DoorAction::Unlock => access::unlock(state, hw, out, now, ctl.method),
            },
            Err(e) => drop_malformed(state, topic, &e),
        },
        "curtain" => match serde_json::from_slice::<CurtainControl>(payload) {
            Ok(ctl) if ctl.action.is_some() || ctl.mode.is_some() => {
                if let Some(mode) = ctl.mode {
                    devices::set_curtain_mode(state, out, mode);
                }
                if let Some(action) = ctl.action {
                    let open = action == CurtainAction::Open;
                    devices::set_curtain(state, hw, out, cfg, now, open, Origin::Manual);
                }
            }
            Ok(_) => drop_empty(state, topic),
            Err(e) => drop_malformed(state, topic, &e),
        },
        "buzzer" => match serde_json::from_slice::<BuzzerControl>(payload) {
            Ok(ctl) => devices::set_buzzer(state, hw, now, ctl.action.is_on()),
            Err(e) => drop_malformed(state, topic, &e),
        },
        other => warn!(device = other, "control for unknown device — dropped"),
    }
}

fn drop_malformed(state: &mut AppState, topic: &str, err: &serde_json::Error) {
    state.counters.decode_errors += 1;
    warn!(topic, %err, "malformed payload — dropped");
}

fn drop_empty(state: &mut AppState, topic: &str) {
    state.counters.decode_errors += 1;
    warn!(topic, "control payload with no action or mode — dropped");
}

// ===========================================================================
// Tests
// ===========================================================================
