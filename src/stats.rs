//! Rolling echo cancellation telemetry.
//!
//! Everything here is a best-effort estimate for diagnostics panels and
//! logs; callers must not treat it as authoritative.

use serde::Serialize;

/// How much weight a new ERLE measurement gets against the rolling value.
const ERLE_SMOOTHING: f32 = 0.1;
/// Smoothed ERLE above which the filter is declared converged. Latched:
/// once true it stays true for the life of the session.
const CONVERGED_ERLE_DB: f32 = 15.0;

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct EchoStats {
    /// Mean power of the far-end reference for the last frame.
    pub far_power: f32,
    /// Mean power of the near-end (mic) input for the last frame.
    pub near_power: f32,
    /// Mean power of the processed output for the last frame.
    pub residual_power: f32,
    /// Smoothed echo return loss enhancement in dB.
    pub erle_db: f32,
    /// Smoothed residual echo level from the suppressor.
    pub residual_echo_level: f32,
    /// Adaptive filter convergence score in [0, 1].
    pub convergence: f32,
    /// Current bulk delay estimate in samples.
    pub current_delay: usize,
    /// Whether double-talk was active at the end of the last frame.
    pub double_talk: bool,
    /// Latched once the smoothed ERLE first exceeds 15dB.
    pub filter_converged: bool,
    /// Frames processed while active (passthrough frames do not count).
    pub frame_count: u64,
}

impl EchoStats {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn update_frame(
        &mut self,
        far: &[f32],
        near: &[f32],
        out: &[f32],
        delay: usize,
        double_talk: bool,
        convergence: f32,
        residual_echo_level: f32,
    ) {
        self.frame_count += 1;
        self.far_power = mean_power(far);
        self.near_power = mean_power(near);
        self.residual_power = mean_power(out);

        if self.near_power > 0.0 && self.residual_power > 0.0 {
            let erle = 10.0 * (self.near_power / self.residual_power).log10();
            self.erle_db = (1.0 - ERLE_SMOOTHING) * self.erle_db + ERLE_SMOOTHING * erle;
        }
        if self.erle_db > CONVERGED_ERLE_DB {
            self.filter_converged = true;
        }

        self.current_delay = delay;
        self.double_talk = double_talk;
        self.convergence = convergence;
        self.residual_echo_level = residual_echo_level;
    }

    pub(crate) fn reset(&mut self) {
        *self = Self::default();
    }
}

fn mean_power(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn erle_accumulates_and_latches_convergence() {
        let mut stats = EchoStats::default();
        let near = vec![0.5f32; 16];
        let out = vec![0.005f32; 16]; // 40dB of enhancement
        for _ in 0..60 {
            stats.update_frame(&near, &near, &out, 120, false, 0.9, 0.01);
        }
        assert!(stats.erle_db > CONVERGED_ERLE_DB);
        assert!(stats.filter_converged);

        // Converged flag is never re-evaluated downward.
        let loud = vec![0.5f32; 16];
        for _ in 0..200 {
            stats.update_frame(&near, &near, &loud, 120, false, 0.9, 0.01);
        }
        assert!(stats.erle_db < CONVERGED_ERLE_DB);
        assert!(stats.filter_converged);
    }

    #[test]
    fn silent_frames_leave_erle_untouched() {
        let mut stats = EchoStats::default();
        let zeros = vec![0.0f32; 16];
        stats.update_frame(&zeros, &zeros, &zeros, 100, false, 0.0, 0.0);
        assert_eq!(stats.erle_db, 0.0);
        assert_eq!(stats.frame_count, 1);
    }

    #[test]
    fn reset_zeroes_everything() {
        let mut stats = EchoStats::default();
        let x = vec![0.5f32; 16];
        stats.update_frame(&x, &x, &x, 300, true, 0.4, 0.2);
        stats.reset();
        assert_eq!(stats.frame_count, 0);
        assert_eq!(stats.erle_db, 0.0);
        assert_eq!(stats.current_delay, 0);
        assert!(!stats.double_talk);
    }
}
