//! Bulk delay estimation between the loudspeaker output and the mic pickup.
//!
//! The loudspeaker signal reappears in the microphone after an acoustic +
//! device-buffering delay that can reach hundreds of milliseconds. The
//! estimator keeps far/near sample histories and periodically runs a
//! cross-correlation search for the lag that best explains the pickup, then
//! exposes a frame-alignment shift so the adaptive filter sees a reference
//! roughly in phase with the echo.
//!
//! The correlation is normalized by the far-signal energy only, not a full
//! normalized cross-correlation. That asymmetry is intentional and keeps
//! the score scale tied to the reference level.

use crate::ring_buffer::RingBuffer;
use tracing::debug;

/// Run the correlation search at most once every this many near frames,
/// bounding the O(max_delay * window) cost to roughly once per 100ms.
const UPDATE_PERIOD: u64 = 5;
/// Analysis window over the most recent history samples (~43ms at 48kHz).
const CORRELATION_WINDOW: usize = 2048;
/// Candidate search range; excludes degenerate near-zero and near-max lags.
const SEARCH_MIN: usize = 50;
const SEARCH_MAX: usize = 2000;
/// Correlation score a candidate must beat before the estimate moves.
const MIN_CORRELATION: f32 = 0.3;
/// Exponential smoothing applied to accepted delay updates.
const SMOOTHING: f32 = 0.95;
/// Starting guess (~2ms) before any correlation evidence arrives.
pub(crate) const INITIAL_DELAY: usize = 100;

pub struct DelayEstimator {
    max_delay: usize,
    history_size: usize,
    far_history: RingBuffer,
    near_history: RingBuffer,
    correlation: Vec<f32>,
    current_delay: usize,
    frame_count: u64,
}

impl DelayEstimator {
    pub fn new(max_delay: usize) -> Self {
        Self {
            max_delay,
            history_size: max_delay * 2,
            far_history: RingBuffer::new(max_delay * 2),
            near_history: RingBuffer::new(max_delay * 2),
            correlation: vec![0.0; max_delay],
            current_delay: INITIAL_DELAY,
            frame_count: 0,
        }
    }

    /// Record a far-end frame. Called from the playout side, decoupled in
    /// time from `estimate`.
    pub fn push_far(&self, frame: &[f32]) {
        self.far_history.write(frame);
    }

    /// Record a near-end frame and return the current delay estimate in
    /// samples, always within `[0, max_delay)`. The correlation search only
    /// reruns every `UPDATE_PERIOD` frames once both histories are full;
    /// otherwise the previous estimate is returned unchanged.
    pub fn estimate(&mut self, near: &[f32]) -> usize {
        self.near_history.write(near);
        self.frame_count += 1;

        if self.frame_count % UPDATE_PERIOD == 0
            && self.far_history.len() >= self.history_size
            && self.near_history.len() >= self.history_size
        {
            self.compute_correlation();
            self.find_best_delay();
        }

        self.current_delay.min(self.max_delay - 1)
    }

    fn compute_correlation(&mut self) {
        let far = self.far_history.read(self.history_size);
        let near = self.near_history.read(self.history_size);
        if far.len() != self.history_size || near.len() != self.history_size {
            return;
        }

        for d in 0..self.max_delay {
            let mut corr = 0.0f32;
            let mut far_power = 0.0f32;

            for i in 0..CORRELATION_WINDOW {
                let far_idx = self.history_size - CORRELATION_WINDOW + i;
                let near_idx = far_idx as isize - d as isize;
                if near_idx >= 0 {
                    let f = far[far_idx];
                    corr += f * near[near_idx as usize];
                    far_power += f * f;
                }
            }

            self.correlation[d] = if far_power > 0.0 {
                corr / far_power.sqrt()
            } else {
                0.0
            };
        }
    }

    fn find_best_delay(&mut self) {
        let search_max = SEARCH_MAX.min(self.max_delay);
        let mut best_corr = -1.0f32;
        let mut best_delay = self.current_delay;

        for d in SEARCH_MIN..search_max {
            if self.correlation[d] > best_corr {
                best_corr = self.correlation[d];
                best_delay = d;
            }
        }

        // Low-confidence candidates are rejected, keeping the old estimate.
        if best_corr > MIN_CORRELATION {
            self.current_delay = (SMOOTHING * self.current_delay as f32
                + (1.0 - SMOOTHING) * best_delay as f32) as usize;
            debug!(
                delay = self.current_delay,
                candidate = best_delay,
                correlation = best_corr,
                "delay estimate updated"
            );
        }
    }

    /// Shift a reference frame to compensate for the estimated delay.
    /// Positive delay drops the first `delay` samples and zero-pads the
    /// tail; negative zero-pads the front. A shift of at least one whole
    /// frame yields silence: alignment is impossible for this frame.
    pub fn adjust_delay(&self, frame: &[f32], delay: isize) -> Vec<f32> {
        let n = frame.len();
        let mut out = vec![0.0; n];
        if delay.unsigned_abs() >= n {
            return out;
        }
        if delay >= 0 {
            let d = delay as usize;
            out[..n - d].copy_from_slice(&frame[d..]);
        } else {
            let d = (-delay) as usize;
            out[d..].copy_from_slice(&frame[..n - d]);
        }
        out
    }

    pub fn current_delay(&self) -> usize {
        self.current_delay
    }

    /// Clear both histories and restore the initial delay guess.
    pub fn reset(&mut self) {
        self.far_history.clear();
        self.near_history.clear();
        self.current_delay = INITIAL_DELAY;
        self.frame_count = 0;
    }
}
