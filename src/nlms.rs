//! NLMS adaptive filter modelling the echo path, with double-talk gating.
//!
//! A finite-impulse-response filter convolves the delay-aligned reference
//! with its taps to predict the echo present in the microphone signal; the
//! prediction error is the echo-cancelled output and also drives the tap
//! update. The update is *normalized* LMS: the step is divided by the
//! instantaneous reference power, which keeps adaptation stable across
//! wildly varying signal levels.
//!
//! Adaptation pauses while double-talk (simultaneous near-end speech) is
//! detected, otherwise the near-end voice would be treated as error and
//! the filter would diverge.
//!
//! This is the dominant cost of the pipeline: O(frame * taps) per frame
//! with several thousand taps for a realistic echo tail.

use crate::suppressor::ResidualEchoSuppressor;
use rand::RngExt;
use tracing::debug;

/// Smoothing for the per-sample near/echo power estimates feeding the
/// double-talk decision.
const POWER_SMOOTHING: f32 = 0.99;
/// Smoothing for the per-frame convergence score.
const CONVERGENCE_SMOOTHING: f32 = 0.95;
/// Guard against zero denominators in power ratios.
const EPS: f32 = 1e-10;
/// Spread of the random tap seeding (matches the reference tuning).
const TAP_SEED_SPREAD: f32 = 0.005;

pub struct AdaptiveFilter {
    taps: Vec<f32>,
    /// The most recent `taps.len()` reference samples, oldest first.
    history: Vec<f32>,
    /// Configured step size (mu).
    base_step: f32,
    /// Running step size; reduced while double-talk is active.
    step: f32,
    regularization: f32,
    double_talk_threshold: f32,
    adapt: bool,
    near_power: f32,
    echo_power: f32,
    double_talk: bool,
    convergence: f32,
    suppressor: ResidualEchoSuppressor,
}

impl AdaptiveFilter {
    /// `taps` is the filter length L; the caller derives it from the
    /// configured echo-tail duration. Must be at least one frame long.
    pub fn new(taps: usize, step_size: f32, regularization: f32, double_talk_threshold: f32) -> Self {
        let mut f = Self {
            taps: vec![0.0; taps],
            history: vec![0.0; taps],
            base_step: step_size,
            step: step_size,
            regularization,
            double_talk_threshold,
            adapt: true,
            near_power: 0.0,
            echo_power: 0.0,
            double_talk: false,
            convergence: 0.0,
            suppressor: ResidualEchoSuppressor::new(),
        };
        f.seed_taps();
        f
    }

    /// Small random initial taps; a perfectly zero filter is a stationary
    /// point for some degenerate inputs.
    fn seed_taps(&mut self) {
        let mut rng = rand::rng();
        for t in self.taps.iter_mut() {
            *t = rng.random_range(-TAP_SEED_SPREAD..TAP_SEED_SPREAD);
        }
    }

    /// Cancel the echo of `reference` out of `mic`. Both slices must be one
    /// frame long; the caller guarantees the length. Returns the suppressed
    /// error signal.
    pub fn process(&mut self, reference: &[f32], mic: &[f32]) -> Vec<f32> {
        let n = mic.len();
        let l = self.taps.len();
        debug_assert_eq!(reference.len(), n);
        debug_assert!(l >= n);

        // Slide the reference history left by one frame and append.
        self.history.copy_within(n.., 0);
        self.history[l - n..].copy_from_slice(reference);

        let mut out = vec![0.0; n];
        let mut frame_near_power = 0.0f32;
        let mut frame_error_power = 0.0f32;

        for i in 0..n {
            // Newest history sample for this instant; the input vector runs
            // backwards from here. Taps for samples older than the stored
            // history contribute nothing.
            let newest = l - n + i;
            let mut echo_estimate = 0.0f32;
            let mut input_power = 0.0f32;
            for (j, &tap) in self.taps.iter().enumerate() {
                if j > newest {
                    break;
                }
                let x = self.history[newest - j];
                echo_estimate += tap * x;
                input_power += x * x;
            }

            let error = mic[i] - echo_estimate;

            self.detect_double_talk(mic[i], echo_estimate);

            if self.adapt && !self.double_talk {
                let normalized_step = self.step / (input_power + self.regularization);
                let scale = normalized_step * error;
                for (j, tap) in self.taps.iter_mut().enumerate() {
                    if j > newest {
                        break;
                    }
                    *tap += scale * self.history[newest - j];
                }
            }

            frame_near_power += mic[i] * mic[i];
            frame_error_power += error * error;

            out[i] = self.suppressor.process_sample(error, echo_estimate);
        }

        // ERLE-like per-frame score in [0,1]; feeds telemetry only.
        let ratio = (1.0 - frame_error_power / (frame_near_power + EPS)).clamp(0.0, 1.0);
        self.convergence =
            CONVERGENCE_SMOOTHING * self.convergence + (1.0 - CONVERGENCE_SMOOTHING) * ratio;

        out
    }

    /// Per-sample double-talk decision with step-size hysteresis: the step
    /// drops on the transition into double-talk and is restored on the way
    /// out, so borderline ratios do not make it oscillate.
    fn detect_double_talk(&mut self, near: f32, echo_estimate: f32) {
        self.near_power = POWER_SMOOTHING * self.near_power + (1.0 - POWER_SMOOTHING) * near * near;
        self.echo_power = POWER_SMOOTHING * self.echo_power
            + (1.0 - POWER_SMOOTHING) * echo_estimate * echo_estimate;

        let ratio = self.near_power / (self.echo_power + EPS);
        let active = ratio > self.double_talk_threshold;
        if active != self.double_talk {
            self.step = if active { self.base_step / 3.0 } else { self.base_step };
            debug!(active, ratio, "double-talk transition");
        }
        self.double_talk = active;
    }

    pub fn double_talk(&self) -> bool {
        self.double_talk
    }

    /// Smoothed convergence score in [0, 1].
    pub fn convergence(&self) -> f32 {
        self.convergence
    }

    pub fn residual_echo_level(&self) -> f32 {
        self.suppressor.residual_level()
    }

    pub fn set_adaptation(&mut self, enabled: bool) {
        self.adapt = enabled;
    }

    pub fn set_step_size(&mut self, step_size: f32) {
        self.base_step = step_size;
        if !self.double_talk {
            self.step = step_size;
        }
    }

    pub fn set_regularization(&mut self, regularization: f32) {
        self.regularization = regularization;
    }

    pub fn set_double_talk_threshold(&mut self, threshold: f32) {
        self.double_talk_threshold = threshold;
    }

    /// Full reset: re-seed the taps and clear everything else.
    pub fn reset(&mut self) {
        self.seed_taps();
        self.history.fill(0.0);
        self.soft_reset();
    }

    /// Reset the control state (step size, double-talk, convergence,
    /// suppressor) while keeping the learned echo path. Used across call
    /// segments where the acoustic path has not changed.
    pub fn soft_reset(&mut self) {
        self.step = self.base_step;
        self.adapt = true;
        self.near_power = 0.0;
        self.echo_power = 0.0;
        self.double_talk = false;
        self.convergence = 0.0;
        self.suppressor.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FRAME_SIZE;

    fn noise(seed: &mut u32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|_| {
                *seed = seed.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
                ((*seed >> 16) as f32 / 32768.0 - 1.0) * 0.5
            })
            .collect()
    }

    fn rms(samples: &[f32]) -> f32 {
        (samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32).sqrt()
    }

    #[test]
    fn converges_on_trivial_self_echo() {
        // reference == mic is a perfect zero-delay echo path. A very high
        // double-talk threshold keeps the gate out of the way.
        let mut filter = AdaptiveFilter::new(FRAME_SIZE, 0.3, 1e-7, 1e9);
        let mut seed = 42u32;
        let mut in_rms = 0.0;
        let mut out_rms = 0.0;
        for frame in 0..220 {
            let x = noise(&mut seed, FRAME_SIZE);
            let y = filter.process(&x, &x);
            if frame >= 210 {
                in_rms += rms(&x);
                out_rms += rms(&y);
            }
        }
        assert!(
            out_rms < 0.1 * in_rms,
            "filter failed to converge: out={out_rms} in={in_rms}"
        );
        assert!(!filter.double_talk());
        assert!(filter.convergence() > 0.5);
    }

    #[test]
    fn silence_produces_silence_without_double_talk() {
        let mut filter = AdaptiveFilter::new(FRAME_SIZE, 0.3, 1e-7, 2.0);
        let zeros = vec![0.0; FRAME_SIZE];
        for _ in 0..20 {
            let out = filter.process(&zeros, &zeros);
            assert!(out.iter().all(|&s| s == 0.0));
            assert!(!filter.double_talk());
        }
    }

    #[test]
    fn near_end_speech_with_quiet_reference_raises_double_talk() {
        let mut filter = AdaptiveFilter::new(FRAME_SIZE, 0.3, 1e-7, 2.0);
        let mut seed = 9u32;
        let speech = noise(&mut seed, FRAME_SIZE);
        let quiet = vec![0.0; FRAME_SIZE];
        for _ in 0..5 {
            filter.process(&quiet, &speech);
        }
        assert!(filter.double_talk());
    }

    #[test]
    fn adaptation_can_be_disabled() {
        let mut a = AdaptiveFilter::new(FRAME_SIZE, 0.3, 1e-7, 1e9);
        let mut b = AdaptiveFilter::new(FRAME_SIZE, 0.3, 1e-7, 1e9);
        b.set_adaptation(false);
        let mut seed = 5u32;
        let mut a_out = 0.0;
        let mut b_out = 0.0;
        for _ in 0..60 {
            let x = noise(&mut seed, FRAME_SIZE);
            a_out = rms(&a.process(&x, &x));
            b_out = rms(&b.process(&x, &x));
        }
        // Only the adapting filter learns the echo path.
        assert!(a_out < b_out);
    }

    #[test]
    fn full_reset_forgets_learned_path() {
        let mut filter = AdaptiveFilter::new(FRAME_SIZE, 0.3, 1e-7, 1e9);
        let mut seed = 11u32;
        let mut converged_rms = 0.0;
        for _ in 0..200 {
            let x = noise(&mut seed, FRAME_SIZE);
            converged_rms = rms(&filter.process(&x, &x));
        }
        filter.reset();

        // Taps are back inside the seeding spread and the history is clear.
        assert!(filter.taps.iter().all(|t| t.abs() < TAP_SEED_SPREAD));
        assert!(filter.taps.iter().any(|&t| t != 0.0));
        assert!(filter.history.iter().all(|&h| h == 0.0));
        assert_eq!(filter.convergence(), 0.0);
        assert!(!filter.double_talk());

        // Unlike soft_reset, the echo path must be re-learned: the first
        // post-reset frame cancels far less than the converged filter did.
        let x = noise(&mut seed, FRAME_SIZE);
        let out = filter.process(&x, &x);
        assert!(rms(&out) > 10.0 * converged_rms);
    }

    #[test]
    fn soft_reset_preserves_learned_path() {
        let mut filter = AdaptiveFilter::new(FRAME_SIZE, 0.3, 1e-7, 1e9);
        let mut seed = 3u32;
        for _ in 0..200 {
            let x = noise(&mut seed, FRAME_SIZE);
            filter.process(&x, &x);
        }
        filter.soft_reset();
        assert_eq!(filter.convergence(), 0.0);
        // The taps survive: the first post-reset frame still cancels.
        let x = noise(&mut seed, FRAME_SIZE);
        let out = filter.process(&x, &x);
        assert!(rms(&out) < 0.2 * rms(&x));
    }
}
