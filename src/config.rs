//! Echo canceller configuration.
//!
//! All knobs have usable defaults; out-of-range values are substituted with
//! the defaults rather than reported as errors, so construction never fails.

use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AecConfig {
    /// Whether echo cancellation is active. A disabled canceller passes
    /// frames through untouched but keeps its filter state.
    pub enabled: bool,
    /// Modeled echo tail in milliseconds. Fixes the adaptive filter tap
    /// count at construction; not hot-swappable.
    pub filter_length_ms: u32,
    /// NLMS step size (mu), in (0, 1). Larger adapts faster but risks
    /// instability on noisy input.
    pub step_size: f32,
    /// Additive regularization (eps) for the NLMS power normalization.
    pub regularization: f32,
    /// Near/echo power ratio above which double-talk is declared and
    /// adaptation pauses.
    pub double_talk_threshold: f32,
    /// Warm-up frames passed through unprocessed after construction or
    /// reset, letting downstream buffers fill (50 frames ≈ 1s).
    pub initialization_frames: u32,
}

impl Default for AecConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            filter_length_ms: 200,
            step_size: 0.3,
            regularization: 1e-7,
            double_talk_threshold: 2.0,
            initialization_frames: 50,
        }
    }
}

impl AecConfig {
    /// Clamp out-of-range knobs back to the documented defaults. NaN fails
    /// every comparison and is substituted as well.
    pub fn sanitized(mut self) -> Self {
        let d = Self::default();
        if !(self.step_size > 0.0 && self.step_size < 1.0) {
            warn!(step_size = self.step_size, "step size outside (0,1), using default");
            self.step_size = d.step_size;
        }
        if !(self.regularization > 0.0) {
            warn!(
                regularization = self.regularization,
                "regularization must be positive, using default"
            );
            self.regularization = d.regularization;
        }
        if !(self.double_talk_threshold > 0.0) {
            warn!(
                threshold = self.double_talk_threshold,
                "double-talk threshold must be positive, using default"
            );
            self.double_talk_threshold = d.double_talk_threshold;
        }
        if self.filter_length_ms < 20 || self.filter_length_ms > 500 {
            warn!(
                filter_length_ms = self.filter_length_ms,
                "filter length outside 20..=500ms, using default"
            );
            self.filter_length_ms = d.filter_length_ms;
        }
        self
    }

    /// Adaptive filter tap count for the configured tail length.
    pub(crate) fn filter_taps(&self) -> usize {
        self.filter_length_ms as usize * crate::SAMPLE_RATE as usize / 1000
    }
}
