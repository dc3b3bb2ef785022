//! Fixed-capacity smoothing buffers for the noisy analog sensors (gas,
//! light), plus the one-shot gas baseline calibration taken after boot.

/// Ring-buffer capacity. One instance per noisy sensor.
pub const WINDOW_CAPACITY: usize = 10;

// ---------------------------------------------------------------------------
// Smoothing window
// ---------------------------------------------------------------------------

/// Fixed-size ring buffer with an O(1) running sum.
///
/// Invariant: `running_sum == sum(samples)` after every insertion. The
/// buffer starts zero-filled, so early averages are biased low until
/// `WINDOW_CAPACITY` samples have arrived; the gas warm-up delay covers that
/// startup period.
#[derive(Debug, Clone)]
pub struct SmoothingWindow {
    samples: [u16; WINDOW_CAPACITY],
    running_sum: u32,
    write_index: usize,
}

impl Default for SmoothingWindow {
    fn default() -> Self {
        Self::new()
    }
}

impl SmoothingWindow {
    pub fn new() -> Self {
        Self {
            samples: [0; WINDOW_CAPACITY],
            running_sum: 0,
            write_index: 0,
        }
    }

    /// Insert a raw sample: subtract the evicted value, add the new one,
    /// advance the index modulo capacity.
    pub fn push(&mut self, raw: u16) {
        let evicted = self.samples[self.write_index];
        self.running_sum -= u32::from(evicted);
        self.running_sum += u32::from(raw);
        self.samples[self.write_index] = raw;
        self.write_index = (self.write_index + 1) % WINDOW_CAPACITY;
    }

    /// Smoothed reading: `running_sum / capacity`.
    pub fn average(&self) -> u16 {
        (self.running_sum / WINDOW_CAPACITY as u32) as u16
    }

    pub fn running_sum(&self) -> u32 {
        self.running_sum
    }
}

// ---------------------------------------------------------------------------
// Gas baseline calibration
// ---------------------------------------------------------------------------

/// Clean-air baseline for the gas sensor. Set once after the warm-up delay
/// by averaging a fixed number of smoothed samples; read-only afterwards.
#[derive(Debug, Clone, Default)]
pub struct GasCalibration {
    baseline: u16,
    calibrated: bool,
    samples_seen: u32,
}

impl GasCalibration {
    /// Feed one post-warm-up smoothed sample. Once `required` samples have
    /// been seen the current window average becomes the permanent baseline.
    /// Returns `true` on the call that completes calibration.
    pub fn note_sample(&mut self, window_avg: u16, required: u32) -> bool {
        if self.calibrated {
            return false;
        }
        self.samples_seen += 1;
        if self.samples_seen >= required {
            self.baseline = window_avg;
            self.calibrated = true;
            return true;
        }
        false
    }

    pub fn is_calibrated(&self) -> bool {
        self.calibrated
    }

    pub fn baseline(&self) -> u16 {
        self.baseline
    }
}

// ===========================================================================
// Tests
// ===========================================================================
