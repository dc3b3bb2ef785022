//! Lamp, curtain and buzzer controllers.
//!
//! `set_lamp` / `set_curtain` are the only paths that touch the relay/servo:
//! they apply the debounce, drive the output, timestamp the change and queue
//! a status event carrying the origin of the transition. The auto-mode
//! evaluator runs on its own interval and only ever goes through these same
//! entry points, so manual and automatic changes behave identically.

use std::time::Instant;

use tracing::{debug, info, warn};

use crate::config::Config;
use crate::hal::Hardware;
use crate::protocol::{self, Outbox};
use crate::state::{AppState, Mode, Origin};

// ---------------------------------------------------------------------------
// Lamp
// ---------------------------------------------------------------------------

/// Switch the lamp relay. Returns `true` if the transition was applied.
///
/// A repeat of the current state is a silent no-op; a real toggle inside
/// the debounce window is ignored and logged, never queued.
/// Every applied transition starts the gas skip window, because switching
/// the relay electrically disturbs the analog gas sensor.
pub fn set_lamp<H: Hardware>(
    state: &mut AppState,
    hw: &mut H,
    out: &mut Outbox,
    cfg: &Config,
    now: Instant,
    on: bool,
    origin: Origin,
) -> bool {
    if state.lamp.on == on {
        return false;
    }
    if let Some(last) = state.lamp.last_change {
        if now.duration_since(last) < cfg.devices.debounce() {
            warn!(requested = on, "lamp command inside debounce window — ignored");
            state.counters.debounce_rejects += 1;
            return false;
        }
    }

    hw.set_lamp(on);
    state.lamp.on = on;
    state.lamp.last_change = Some(now);
    state.gas_skip_until = Some(now + cfg.gas.skip_after_lamp());
    state.counters.lamp_toggles += 1;
    out.push(protocol::lamp_status(on, state.lamp.mode, origin));

    info!(on, ?origin, "lamp switched");
    true
}

pub fn set_lamp_mode(state: &mut AppState, out: &mut Outbox, mode: Mode) {
    if state.lamp.mode == mode {
        return;
    }
    state.lamp.mode = mode;
    out.push(protocol::lamp_status(state.lamp.on, mode, Origin::Manual));
    info!(?mode, "lamp mode changed");
}

// ---------------------------------------------------------------------------
// Curtain
// ---------------------------------------------------------------------------

/// Move the curtain servo. Same debounce/status semantics as the lamp, but
/// no gas skip window (the servo does not share the relay supply).
pub fn set_curtain<H: Hardware>(
    state: &mut AppState,
    hw: &mut H,
    out: &mut Outbox,
    cfg: &Config,
    now: Instant,
    open: bool,
    origin: Origin,
) -> bool {
    if state.curtain.open == open {
        return false;
    }
    if let Some(last) = state.curtain.last_change {
        if now.duration_since(last) < cfg.devices.debounce() {
            warn!(requested = open, "curtain command inside debounce window — ignored");
            state.counters.debounce_rejects += 1;
            return false;
        }
    }

    hw.set_curtain(open);
    state.curtain.open = open;
    state.curtain.last_change = Some(now);
    state.counters.curtain_moves += 1;
    out.push(protocol::curtain_status(open, state.curtain.mode, origin));

    info!(open, ?origin, "curtain moved");
    true
}

pub fn set_curtain_mode(state: &mut AppState, out: &mut Outbox, mode: Mode) {
    if state.curtain.mode == mode {
        return;
    }
    state.curtain.mode = mode;
    out.push(protocol::curtain_status(
        state.curtain.open,
        mode,
        Origin::Manual,
    ));
    info!(?mode, "curtain mode changed");
}

// ---------------------------------------------------------------------------
// Buzzer
// ---------------------------------------------------------------------------

/// Start/stop the buzzer pattern. While active the output is toggled each
/// tick interval by `buzzer_tick`; deactivating forces the output off.
pub fn set_buzzer<H: Hardware>(state: &mut AppState, hw: &mut H, now: Instant, on: bool) {
    if state.buzzer.active == on {
        return;
    }
    state.buzzer.active = on;
    state.buzzer.output_on = on;
    state.buzzer.last_toggle = Some(now);
    hw.set_buzzer(on);
    info!(on, "buzzer pattern");
}

/// Advance the non-blocking on/off pattern. No-op while inactive.
pub fn buzzer_tick<H: Hardware>(state: &mut AppState, hw: &mut H, cfg: &Config, now: Instant) {
    if !state.buzzer.active {
        return;
    }
    let due = state
        .buzzer
        .last_toggle
        .is_none_or(|last| now.duration_since(last) >= cfg.intervals.buzzer_toggle());
    if due {
        state.buzzer.output_on = !state.buzzer.output_on;
        state.buzzer.last_toggle = Some(now);
        hw.set_buzzer(state.buzzer.output_on);
    }
}

// ---------------------------------------------------------------------------
// Auto-mode evaluator
// ---------------------------------------------------------------------------

/// Compare the current light level against the thresholds and drive the
/// lamp/curtain — but only for a device currently in `Auto` mode, and only
/// when the desired state differs from the current one. A device in `Manual`
/// mode is never touched, however stale its state.
pub fn auto_evaluate<H: Hardware>(
    state: &mut AppState,
    hw: &mut H,
    out: &mut Outbox,
    cfg: &Config,
    now: Instant,
) {
    let lux = state.sample.light_lux;

    if state.lamp.mode == Mode::Auto {
        let should_be_on = lux < cfg.thresholds.lamp_on_below_lux;
        if should_be_on != state.lamp.on {
            debug!(lux, should_be_on, "auto: lamp threshold crossed");
            set_lamp(state, hw, out, cfg, now, should_be_on, Origin::Auto);
        }
    }

    if state.curtain.mode == Mode::Auto {
        let should_be_open = lux < cfg.thresholds.curtain_open_below_lux;
        if should_be_open != state.curtain.open {
            debug!(lux, should_be_open, "auto: curtain threshold crossed");
            set_curtain(state, hw, out, cfg, now, should_be_open, Origin::Auto);
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::MockHardware;
    use std::time::Duration;

    fn setup() -> (AppState, MockHardware, Outbox, Config, Instant) {
        let cfg = Config::default();
        let now = Instant::now();
        (
            AppState::new(&cfg, now),
            MockHardware::new(),
            Outbox::default(),
            cfg,
            now,
        )
    }

    // -- Lamp: basic switching ---------------------------------------------

    #[test]
    fn lamp_on_drives_relay_and_publishes_status() {
        let (mut st, mut hw, mut out, cfg, now) = setup();

        assert!(set_lamp(&mut st, &mut hw, &mut out, &cfg, now, true, Origin::Manual));

        assert!(st.lamp.on);
        assert_eq!(hw.lamp_calls, vec![true]);
        assert_eq!(st.counters.lamp_toggles, 1);

        let msgs = out.drain();
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].topic, protocol::TOPIC_STATUS_LAMP);
        let json: serde_json::Value = serde_json::from_slice(&msgs[0].payload).unwrap();
        assert_eq!(json["status"], "on");
        assert_eq!(json["origin"], "manual");
    }

    #[test]
    fn lamp_same_state_is_noop() {
        let (mut st, mut hw, mut out, cfg, now) = setup();

        assert!(!set_lamp(&mut st, &mut hw, &mut out, &cfg, now, false, Origin::Manual));
        assert!(hw.lamp_calls.is_empty());
        assert!(out.drain().is_empty());
    }

    // -- Lamp: debounce ------------------------------------------------------

    #[test]
    fn lamp_off_within_debounce_rejected_state_stays_on() {
        let (mut st, mut hw, mut out, cfg, now) = setup();

        assert!(set_lamp(&mut st, &mut hw, &mut out, &cfg, now, true, Origin::Manual));
        let soon = now + Duration::from_millis(500);
        assert!(!set_lamp(&mut st, &mut hw, &mut out, &cfg, soon, false, Origin::Manual));

        assert!(st.lamp.on, "state must remain on");
        assert_eq!(hw.lamp_calls, vec![true], "relay must not be driven again");
        assert_eq!(st.counters.debounce_rejects, 1);
    }

    #[test]
    fn lamp_repeat_of_same_state_is_not_a_debounce_reject() {
        let (mut st, mut hw, mut out, cfg, now) = setup();

        set_lamp(&mut st, &mut hw, &mut out, &cfg, now, true, Origin::Manual);
        // "on" again while already on, inside the window: plain no-op.
        let soon = now + Duration::from_millis(500);
        assert!(!set_lamp(&mut st, &mut hw, &mut out, &cfg, soon, true, Origin::Manual));

        assert!(st.lamp.on);
        assert_eq!(st.counters.debounce_rejects, 0);
        assert_eq!(hw.lamp_calls, vec![true]);
    }

    #[test]
    fn lamp_toggle_after_debounce_window_applies() {
        let (mut st, mut hw, mut out, cfg, now) = setup();

        set_lamp(&mut st, &mut hw, &mut out, &cfg, now, true, Origin::Manual);
        let later = now + cfg.devices.debounce();
        assert!(set_lamp(&mut st, &mut hw, &mut out, &cfg, later, false, Origin::Manual));
        assert!(!st.lamp.on);
    }

    #[test]
    fn lamp_switch_starts_gas_skip_window() {
        let (mut st, mut hw, mut out, cfg, now) = setup();

        set_lamp(&mut st, &mut hw, &mut out, &cfg, now, true, Origin::Manual);
        assert!(st.in_gas_skip_window(now));
        assert!(!st.in_gas_skip_window(now + cfg.gas.skip_after_lamp()));
    }

    // -- Lamp: mode ----------------------------------------------------------

    #[test]
    fn lamp_mode_change_publishes_status() {
        let (mut st, _hw, mut out, _cfg, _now) = setup();

        set_lamp_mode(&mut st, &mut out, Mode::Auto);
        assert_eq!(st.lamp.mode, Mode::Auto);
        let msgs = out.drain();
        assert_eq!(msgs.len(), 1);
        let json: serde_json::Value = serde_json::from_slice(&msgs[0].payload).unwrap();
        assert_eq!(json["mode"], "auto");

        // Same mode again: silent no-op.
        set_lamp_mode(&mut st, &mut out, Mode::Auto);
        assert!(out.drain().is_empty());
    }

    // -- Curtain ---------------------------------------------------------------

    #[test]
    fn curtain_open_publishes_status_with_origin() {
        let (mut st, mut hw, mut out, cfg, now) = setup();
        st.curtain.mode = Mode::Auto;

        assert!(set_curtain(&mut st, &mut hw, &mut out, &cfg, now, true, Origin::Auto));
        assert!(st.curtain.open);
        assert_eq!(hw.curtain_calls, vec![true]);

        let msgs = out.drain();
        assert_eq!(msgs[0].topic, protocol::TOPIC_STATUS_CURTAIN);
        let json: serde_json::Value = serde_json::from_slice(&msgs[0].payload).unwrap();
        assert_eq!(json["status"], "open");
        assert_eq!(json["mode"], "auto");
        assert_eq!(json["origin"], "auto");
    }

    #[test]
    fn curtain_does_not_touch_gas_skip_window() {
        let (mut st, mut hw, mut out, cfg, now) = setup();
        set_curtain(&mut st, &mut hw, &mut out, &cfg, now, true, Origin::Manual);
        assert!(st.gas_skip_until.is_none());
    }

    #[test]
    fn curtain_debounce_rejects_rapid_repeat() {
        let (mut st, mut hw, mut out, cfg, now) = setup();

        set_curtain(&mut st, &mut hw, &mut out, &cfg, now, true, Origin::Manual);
        let soon = now + Duration::from_millis(100);
        assert!(!set_curtain(&mut st, &mut hw, &mut out, &cfg, soon, false, Origin::Manual));
        assert!(st.curtain.open);
    }

    #[test]
    fn curtain_repeat_of_same_state_is_not_a_debounce_reject() {
        let (mut st, mut hw, mut out, cfg, now) = setup();

        set_curtain(&mut st, &mut hw, &mut out, &cfg, now, true, Origin::Manual);
        let soon = now + Duration::from_millis(100);
        assert!(!set_curtain(&mut st, &mut hw, &mut out, &cfg, soon, true, Origin::Manual));

        assert_eq!(st.counters.debounce_rejects, 0);
        assert_eq!(hw.curtain_calls, vec![true]);
    }

    // -- Buzzer ------------------------------------------------------------------

    #[test]
    fn buzzer_activate_then_pattern_toggles() {
        let (mut st, mut hw, _out, cfg, now) = setup();

        set_buzzer(&mut st, &mut hw, now, true);
        assert_eq!(hw.buzzer_calls, vec![true]);

        // Not due yet.
        buzzer_tick(&mut st, &mut hw, &cfg, now + Duration::from_millis(100));
        assert_eq!(hw.buzzer_calls, vec![true]);

        // Due: output flips off.
        buzzer_tick(&mut st, &mut hw, &cfg, now + cfg.intervals.buzzer_toggle());
        assert_eq!(hw.buzzer_calls, vec![true, false]);

        // And back on one interval later.
        buzzer_tick(&mut st, &mut hw, &cfg, now + cfg.intervals.buzzer_toggle() * 2);
        assert_eq!(hw.buzzer_calls, vec![true, false, true]);
    }

    #[test]
    fn buzzer_deactivate_forces_output_off() {
        let (mut st, mut hw, _out, cfg, now) = setup();

        set_buzzer(&mut st, &mut hw, now, true);
        set_buzzer(&mut st, &mut hw, now + Duration::from_secs(1), false);
        assert_eq!(hw.buzzer_calls, vec![true, false]);

        // Inactive pattern never toggles.
        buzzer_tick(&mut st, &mut hw, &cfg, now + Duration::from_secs(10));
        assert_eq!(hw.buzzer_calls, vec![true, false]);
    }

    // -- Auto-mode evaluator ------------------------------------------------------

    #[test]
    fn auto_never_touches_manual_device() {
        let (mut st, mut hw, mut out, cfg, now) = setup();
        // Manual mode, any light level.
        for lux in [0, 299, 300, 999] {
            st.sample.light_lux = lux;
            auto_evaluate(&mut st, &mut hw, &mut out, &cfg, now);
        }
        assert!(hw.lamp_calls.is_empty());
        assert!(hw.curtain_calls.is_empty());
        assert!(out.drain().is_empty());
    }

    #[test]
    fn auto_turns_lamp_on_below_threshold() {
        let (mut st, mut hw, mut out, cfg, now) = setup();
        st.lamp.mode = Mode::Auto;
        st.sample.light_lux = cfg.thresholds.lamp_on_below_lux - 1;

        auto_evaluate(&mut st, &mut hw, &mut out, &cfg, now);

        assert!(st.lamp.on);
        let msgs = out.drain();
        let json: serde_json::Value = serde_json::from_slice(&msgs[0].payload).unwrap();
        assert_eq!(json["origin"], "auto");
    }

    #[test]
    fn auto_turns_lamp_off_above_threshold() {
        let (mut st, mut hw, mut out, cfg, now) = setup();
        st.lamp.mode = Mode::Auto;
        st.lamp.on = true;
        st.sample.light_lux = cfg.thresholds.lamp_on_below_lux;

        auto_evaluate(&mut st, &mut hw, &mut out, &cfg, now);
        assert!(!st.lamp.on);
    }

    #[test]
    fn auto_noop_when_state_already_matches() {
        let (mut st, mut hw, mut out, cfg, now) = setup();
        st.lamp.mode = Mode::Auto;
        st.curtain.mode = Mode::Auto;
        st.sample.light_lux = 900; // bright: lamp off, curtain closed — already true

        auto_evaluate(&mut st, &mut hw, &mut out, &cfg, now);
        assert!(hw.lamp_calls.is_empty());
        assert!(hw.curtain_calls.is_empty());
        assert!(out.drain().is_empty());
    }

    #[test]
    fn auto_opens_curtain_when_light_drops() {
        // End-to-end at controller level: light falls below the curtain
        // threshold while in auto and closed → one evaluation opens it and
        // publishes {open, auto}.
        let (mut st, mut hw, mut out, cfg, now) = setup();
        st.curtain.mode = Mode::Auto;
        st.sample.light_lux = cfg.thresholds.curtain_open_below_lux - 10;

        auto_evaluate(&mut st, &mut hw, &mut out, &cfg, now);

        assert!(st.curtain.open);
        let msgs = out.drain();
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].topic, protocol::TOPIC_STATUS_CURTAIN);
        let json: serde_json::Value = serde_json::from_slice(&msgs[0].payload).unwrap();
        assert_eq!(json["status"], "open");
        assert_eq!(json["mode"], "auto");
    }
}
