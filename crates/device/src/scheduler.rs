//! Cooperative tick scheduler. The main loop calls [`Scheduler::tick`] once
//! per iteration with the current instant; every timed behaviour in the
//! device is an explicit deadline compared against that instant, so nothing
//! here ever sleeps or blocks and the whole schedule is testable with
//! synthetic clocks.

use std::time::Instant;

use crate::access;
use crate::config::Config;
use crate::devices;
use crate::hal::Hardware;
use crate::protocol::{self, Outbox};
use crate::sensors;
use crate::state::AppState;

pub struct Scheduler {
    next_sensor_read: Instant,
    next_auto_eval: Instant,
    next_telemetry: Instant,
}

impl Scheduler {
    pub fn new(now: Instant, cfg: &Config) -> Self {
        Self {
            next_sensor_read: now,
            next_auto_eval: now + cfg.intervals.auto_eval(),
            next_telemetry: now + cfg.intervals.telemetry(),
        }
    }

    /// Run one tick: drain the keypad, fire whichever intervals are due, and
    /// poll every deadline. Ordering matters — sensors are read before the
    /// evaluator and telemetry so both see this tick's values.
    pub fn tick<H: Hardware>(
        &mut self,
        state: &mut AppState,
        hw: &mut H,
        out: &mut Outbox,
        cfg: &Config,
        now: Instant,
    ) {
        while let Some(key) = hw.poll_key() {
            access::handle_key(state, hw, out, cfg, now, key);
        }

        if now >= self.next_sensor_read {
            sensors::read_tick(state, hw, cfg, now);
            self.next_sensor_read = now + cfg.intervals.sensor_read();
        }

        if now >= self.next_auto_eval {
            devices::auto_evaluate(state, hw, out, cfg, now);
            self.next_auto_eval = now + cfg.intervals.auto_eval();
        }

        if now >= self.next_telemetry {
            protocol::publish_telemetry(state, out, now);
            self.next_telemetry = now + cfg.intervals.telemetry();
        }

        access::poll_relock(state, hw, out, cfg, now);
        access::poll_verification_timeout(state, hw, cfg, now);
        access::poll_transient(state, hw, now);
        devices::buzzer_tick(state, hw, cfg, now);
    }
}

// ===========================================================================
// Tests
// ===========================================================================
