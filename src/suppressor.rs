//! Statistical residual echo suppression.
//!
//! The linear NLMS filter never removes all of the echo (its tail is
//! finite, the room moves, the delay estimate jitters). This post-filter
//! mops up what is left: noise-floor and echo-level estimators feed a
//! decision-directed Wiener gain that attenuates the error signal whenever
//! the residual looks like echo or noise rather than near-end speech.

/// Additive guard used before every division.
const EPS: f32 = 1e-10;
/// Updates spent in running-mean warm-up before the asymmetric tracker
/// takes over (100 frames worth of samples).
const NOISE_WARMUP: u64 = 100 * crate::FRAME_SIZE as u64;
/// Lowest noise level the estimator will report.
const NOISE_FLOOR_MIN: f32 = 1e-5;

/// Noise-floor level tracker. Starts as a plain running mean, then switches
/// to asymmetric exponential smoothing: slow rise, slower-still decay, an
/// approximation of minimum-statistics noise tracking.
pub struct NoiseEstimator {
    level: f32,
    updates: u64,
}

impl NoiseEstimator {
    pub fn new() -> Self {
        Self { level: NOISE_FLOOR_MIN, updates: 0 }
    }

    /// Feed one sample magnitude; returns the current noise level.
    pub fn update(&mut self, magnitude: f32) -> f32 {
        self.updates += 1;
        if self.updates <= NOISE_WARMUP {
            self.level += (magnitude - self.level) / self.updates as f32;
        } else if magnitude > self.level {
            self.level = 0.98 * self.level + 0.02 * magnitude;
        } else {
            self.level = 0.99 * self.level + 0.01 * magnitude;
        }
        self.level = self.level.max(NOISE_FLOOR_MIN);
        self.level
    }

    pub fn level(&self) -> f32 {
        self.level
    }

    pub fn reset(&mut self) {
        self.level = NOISE_FLOOR_MIN;
        self.updates = 0;
    }
}

/// Echo-estimate level tracker with asymmetric smoothing: quick to follow a
/// rising echo, slower to release.
pub struct EchoEstimator {
    level: f32,
}

impl EchoEstimator {
    pub fn new() -> Self {
        Self { level: 0.0 }
    }

    pub fn update(&mut self, magnitude: f32) -> f32 {
        if magnitude > self.level {
            self.level = 0.9 * self.level + 0.1 * magnitude;
        } else {
            self.level = 0.95 * self.level + 0.05 * magnitude;
        }
        self.level
    }

    pub fn reset(&mut self) {
        self.level = 0.0;
    }
}

pub struct ResidualEchoSuppressor {
    noise: NoiseEstimator,
    echo: EchoEstimator,
    /// Decision-directed prior SNR carried across samples.
    prior_snr: f32,
    /// Smoothed residual echo level, exported as telemetry.
    residual_level: f32,
}

impl ResidualEchoSuppressor {
    pub fn new() -> Self {
        Self {
            noise: NoiseEstimator::new(),
            echo: EchoEstimator::new(),
            prior_snr: 1.0,
            residual_level: 0.0,
        }
    }

    /// Suppress residual echo in one error-signal sample given the linear
    /// filter's echo estimate for the same instant.
    pub fn process_sample(&mut self, error: f32, echo_estimate: f32) -> f32 {
        let noise_level = self.noise.update(error.abs());
        let echo_level = self.echo.update(echo_estimate.abs());

        let signal_power = error * error + EPS;
        let echo_power = echo_level * echo_level + EPS;
        let noise_power = noise_level * noise_level + EPS;

        let posterior_snr = signal_power / (echo_power + noise_power);
        self.prior_snr = 0.98 * self.prior_snr + 0.02 * (posterior_snr - 1.0).max(0.0);

        // Wiener / MMSE-STSA style gain on the amplitude.
        let gain = self.prior_snr / (1.0 + self.prior_snr);

        self.residual_level = 0.95 * self.residual_level + 0.05 * echo_power.sqrt();

        error * gain.sqrt()
    }

    /// Smoothed residual echo level for telemetry. Best-effort estimate,
    /// not a correctness guarantee.
    pub fn residual_level(&self) -> f32 {
        self.residual_level
    }

    pub fn reset(&mut self) {
        self.noise.reset();
        self.echo.reset();
        self.prior_snr = 1.0;
        self.residual_level = 0.0;
    }
}
