//! Door lock and keypad access control.
//!
//! The door is a two-state machine (Locked/Unlocked) with an auto-relock
//! deadline armed on every unlock. PIN entry is buffered locally; `#`
//! submits the buffer as a verification request over the bus and the door
//! only moves on a positive response — never on timeout, never on a short
//! PIN. All timed behaviour is deadline fields polled each scheduler tick.

use std::time::Instant;

use tracing::{info, warn};

use crate::config::Config;
use crate::hal::{Hardware, VoiceClip};
use crate::protocol::{self, Outbox};
use crate::state::{AppState, LockMethod, PinSession, Transient};

/// Submissions shorter than this are rejected locally, without any network
/// round trip.
pub const MIN_PIN_DIGITS: usize = 4;
/// Digits beyond this are ignored, not an error.
pub const MAX_PIN_DIGITS: usize = 6;

// ---------------------------------------------------------------------------
// Door transitions
// ---------------------------------------------------------------------------

/// Lock the door. Clears any pending auto-relock, so a relock can never
/// fire twice for one unlock.
pub fn lock<H: Hardware>(
    state: &mut AppState,
    hw: &mut H,
    out: &mut Outbox,
    method: LockMethod,
) {
    state.door.relock_pending = false;
    state.door.unlocked_at = None;
    if state.door.locked {
        return;
    }

    hw.set_lock(true);
    state.door.locked = true;
    out.push(protocol::door_status(true, method));
    refresh_display(state, hw);
    info!(?method, "door locked");
}

/// Unlock the door and arm the auto-relock deadline. A second unlock while
/// already unlocked re-arms the deadline.
pub fn unlock<H: Hardware>(
    state: &mut AppState,
    hw: &mut H,
    out: &mut Outbox,
    now: Instant,
    method: LockMethod,
) {
    hw.set_lock(false);
    state.door.locked = false;
    state.door.relock_pending = true;
    state.door.unlocked_at = Some(now);
    state.counters.door_unlocks += 1;
    out.push(protocol::door_status(false, method));
    refresh_display(state, hw);
    info!(?method, "door unlocked");
}

/// Poll the relock deadline. Fires at most once per unlock: `lock` clears
/// the pending flag on any lock transition.
pub fn poll_relock<H: Hardware>(
    state: &mut AppState,
    hw: &mut H,
    out: &mut Outbox,
    cfg: &Config,
    now: Instant,
) {
    if !state.door.relock_pending {
        return;
    }
    let due = state
        .door
        .unlocked_at
        .is_some_and(|at| now.duration_since(at) >= cfg.door.relock());
    if due {
        state.counters.door_relocks += 1;
        info!("auto-relock deadline elapsed");
        lock(state, hw, out, LockMethod::Auto);
    }
}

// ---------------------------------------------------------------------------
// Keypad flow
// ---------------------------------------------------------------------------

/// Handle one keypad key. Digits buffer (up to 6), `*` cancels, `#` submits.
pub fn handle_key<H: Hardware>(
    state: &mut AppState,
    hw: &mut H,
    out: &mut Outbox,
    cfg: &Config,
    now: Instant,
    key: char,
) {
    match key {
        '0'..='9' => {
            // A digit while a verification is pending starts a fresh session
            // and supersedes the pending one.
            let stale = state
                .pin
                .as_ref()
                .is_some_and(|s| s.awaiting_verification);
            if stale {
                state.pin = None;
            }
            let session = state.pin.get_or_insert_with(PinSession::default);
            if session.digits.len() < MAX_PIN_DIGITS {
                session.digits.push(key);
            }
            refresh_display(state, hw);
        }
        '*' => {
            state.pin = None;
            refresh_display(state, hw);
        }
        '#' => submit(state, hw, out, cfg, now),
        _ => {} // A–D function keys unused
    }
}

fn submit<H: Hardware>(
    state: &mut AppState,
    hw: &mut H,
    out: &mut Outbox,
    cfg: &Config,
    now: Instant,
) {
    let Some(session) = state.pin.as_mut() else {
        return; // '#' with nothing entered
    };
    if session.awaiting_verification {
        return; // request already in flight
    }

    if session.digits.len() < MIN_PIN_DIGITS {
        warn!(entered = session.digits.len(), "PIN too short — rejected locally");
        state.pin = None;
        state.counters.pin_rejects += 1;
        show_transient(state, hw, cfg, now, "PIN too short");
        return;
    }

    out.push(protocol::pin_request(&session.digits));
    session.awaiting_verification = true;
    session.requested_at = Some(now);
    // Don't keep the PIN in memory past the submit.
    session.digits.clear();
    show_transient(state, hw, cfg, now, "Verifying...");
}

/// Apply a verification response from the backend. A response with no
/// matching in-flight request is stale and ignored.
pub fn handle_verify_response<H: Hardware>(
    state: &mut AppState,
    hw: &mut H,
    out: &mut Outbox,
    cfg: &Config,
    now: Instant,
    valid: bool,
    message: &str,
) {
    let awaiting = state
        .pin
        .as_ref()
        .is_some_and(|s| s.awaiting_verification);
    if !awaiting {
        warn!(valid, "verification response with no pending request — ignored");
        return;
    }
    state.pin = None;

    if valid {
        unlock(state, hw, out, now, LockMethod::Pin);
        hw.play_voice(VoiceClip::AccessGranted);
        let text = if message.is_empty() { "Access granted" } else { message };
        show_transient(state, hw, cfg, now, text);
    } else {
        hw.play_voice(VoiceClip::AccessDenied);
        let text = if message.is_empty() { "Access denied" } else { message };
        show_transient(state, hw, cfg, now, text);
        info!("PIN rejected by verifier");
    }
}

/// Poll the verification deadline. On timeout the session is cleared and a
/// timeout indication shown — the door never unlocks on timeout.
pub fn poll_verification_timeout<H: Hardware>(
    state: &mut AppState,
    hw: &mut H,
    cfg: &Config,
    now: Instant,
) {
    let timed_out = state.pin.as_ref().is_some_and(|s| {
        s.awaiting_verification
            && s.requested_at
                .is_some_and(|at| now.duration_since(at) >= cfg.access.verify_timeout())
    });
    if timed_out {
        warn!("PIN verification timed out — clearing session");
        state.pin = None;
        state.counters.pin_timeouts += 1;
        show_transient(state, hw, cfg, now, "Verify timeout");
    }
}

// ---------------------------------------------------------------------------
// Display
// ---------------------------------------------------------------------------

/// Redraw both display rows from current state: door state on row 0, and on
/// row 1 the active transient message, else the masked PIN entry, else blank.
pub fn refresh_display<H: Hardware>(state: &AppState, hw: &mut H) {
    let row0 = if state.door.locked {
        "Door: LOCKED"
    } else {
        "Door: UNLOCKED"
    };
    hw.show_line(0, row0);

    if let Some(t) = &state.transient {
        hw.show_line(1, &t.text);
    } else if let Some(s) = &state.pin {
        let masked = "*".repeat(s.digits.len());
        hw.show_line(1, &format!("PIN: {masked}"));
    } else {
        hw.show_line(1, "");
    }
}

/// Put a transient message on row 1 with its auto-expiry deadline.
pub fn show_transient<H: Hardware>(
    state: &mut AppState,
    hw: &mut H,
    cfg: &Config,
    now: Instant,
    text: &str,
) {
    state.transient = Some(Transient {
        text: text.to_string(),
        until: now + cfg.display.transient(),
    });
    refresh_display(state, hw);
}

/// Expire the transient message and restore the normal view.
pub fn poll_transient<H: Hardware>(state: &mut AppState, hw: &mut H, now: Instant) {
    let expired = state.transient.as_ref().is_some_and(|t| now >= t.until);
    if expired {
        state.transient = None;
        refresh_display(state, hw);
    }
}

// ===========================================================================
// Tests
// ===========================================================================
