//! Frame-synchronous echo canceller orchestration.
//!
//! [`EchoCanceller`] owns the whole pipeline: the far-end reference ring,
//! the delay estimator, the NLMS filter (with its residual suppressor) and
//! the telemetry. It is a small state machine:
//!
//!   Disabled ──enable──▶ Active
//!   Initializing(n) ──n frames──▶ Active
//!
//! `add_far_end` may run on the playout thread while `process_frame` runs
//! on the capture thread; one lock per instance serializes them. At a 50Hz
//! frame rate the hold time is a small fraction of the frame period, so
//! the contention is harmless in practice.

use parking_lot::RwLock;
use tracing::debug;

use crate::config::AecConfig;
use crate::delay::DelayEstimator;
use crate::nlms::AdaptiveFilter;
use crate::pcm;
use crate::ring_buffer::RingBuffer;
use crate::stats::EchoStats;
use crate::{FRAME_SIZE, MAX_DELAY};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Disabled,
    /// Warm-up: frames left to pass through before cancelling starts.
    Initializing(u32),
    Active,
}

pub struct EchoCanceller {
    inner: RwLock<Inner>,
}

struct Inner {
    config: AecConfig,
    state: State,
    far_ring: RingBuffer,
    delay: DelayEstimator,
    filter: AdaptiveFilter,
    stats: EchoStats,
}

impl EchoCanceller {
    /// Canceller with the default configuration.
    pub fn new() -> Self {
        Self::with_config(AecConfig::default())
    }

    /// Canceller with an explicit configuration. Out-of-range knobs are
    /// replaced with defaults; construction never fails.
    pub fn with_config(config: AecConfig) -> Self {
        let config = config.sanitized();
        let filter = AdaptiveFilter::new(
            config.filter_taps(),
            config.step_size,
            config.regularization,
            config.double_talk_threshold,
        );
        let state = initial_state(&config);
        let mut stats = EchoStats::default();
        let delay = DelayEstimator::new(MAX_DELAY);
        stats.current_delay = delay.current_delay();
        Self {
            inner: RwLock::new(Inner {
                config,
                state,
                far_ring: RingBuffer::new(MAX_DELAY),
                delay,
                filter,
                stats,
            }),
        }
    }

    /// Process one near-end (microphone) frame and return the echo-reduced
    /// output. Frames of any length other than [`FRAME_SIZE`] are returned
    /// unchanged with no state touched.
    pub fn process_frame(&self, near: &[i16]) -> Vec<i16> {
        if near.len() != FRAME_SIZE {
            return near.to_vec();
        }

        let inner = &mut *self.inner.write();
        match inner.state {
            State::Disabled => near.to_vec(),
            State::Initializing(left) => {
                let left = left.saturating_sub(1);
                if left == 0 {
                    debug!("warm-up complete, cancelling active");
                    inner.state = State::Active;
                } else {
                    inner.state = State::Initializing(left);
                }
                near.to_vec()
            }
            State::Active => {
                let near_f = pcm::int16_to_f32(near);

                let reference = inner.far_ring.latest(FRAME_SIZE);
                let d = inner.delay.estimate(&near_f);
                let aligned = inner.delay.adjust_delay(&reference, d as isize);

                let out = inner.filter.process(&aligned, &near_f);

                inner.stats.update_frame(
                    &reference,
                    &near_f,
                    &out,
                    d,
                    inner.filter.double_talk(),
                    inner.filter.convergence(),
                    inner.filter.residual_echo_level(),
                );

                pcm::f32_to_int16(&out)
            }
        }
    }

    /// Push one far-end (loudspeaker) frame into the reference history.
    /// Called from whatever thread feeds playback; decoupled in time from
    /// `process_frame`. Wrong-length frames are ignored.
    pub fn add_far_end(&self, far: &[i16]) {
        if far.len() != FRAME_SIZE {
            return;
        }
        let inner = &mut *self.inner.write();
        let far_f = pcm::int16_to_f32(far);
        inner.far_ring.write(&far_f);
        inner.delay.push_far(&far_f);
    }

    /// Re-activate a disabled canceller. Filter and history state were kept
    /// across the disable, so cancelling resumes immediately (no warm-up).
    pub fn enable(&self) {
        let inner = &mut *self.inner.write();
        if inner.state == State::Disabled {
            debug!("echo cancellation enabled");
            inner.state = State::Active;
        }
        inner.config.enabled = true;
    }

    /// Pass frames through untouched without losing any state.
    pub fn disable(&self) {
        let inner = &mut *self.inner.write();
        if inner.state != State::Disabled {
            debug!("echo cancellation disabled");
        }
        inner.state = State::Disabled;
        inner.config.enabled = false;
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.read().state != State::Disabled
    }

    /// Swap behavioral knobs without reallocating any buffer. The filter
    /// tail length is fixed at construction; a changed `filter_length_ms`
    /// is ignored (with a warning from the sanitizer path).
    pub fn set_config(&self, config: AecConfig) {
        let mut config = config.sanitized();
        let inner = &mut *self.inner.write();
        if config.filter_length_ms != inner.config.filter_length_ms {
            tracing::warn!(
                old = inner.config.filter_length_ms,
                new = config.filter_length_ms,
                "filter length cannot be changed after construction, keeping old value"
            );
            config.filter_length_ms = inner.config.filter_length_ms;
        }

        inner.filter.set_step_size(config.step_size);
        inner.filter.set_regularization(config.regularization);
        inner.filter.set_double_talk_threshold(config.double_talk_threshold);

        let was_enabled = inner.state != State::Disabled;
        if config.enabled && !was_enabled {
            inner.state = State::Active;
        } else if !config.enabled {
            inner.state = State::Disabled;
        }

        inner.config = config;
    }

    /// Return to the warm-up state: delay estimator, far history, stats and
    /// the filter's control state are cleared. The learned filter taps are
    /// deliberately kept: the acoustic path rarely changes between call
    /// segments and a converged filter is expensive to re-learn.
    pub fn reset(&self) {
        let inner = &mut *self.inner.write();
        debug!("echo canceller reset");
        inner.delay.reset();
        inner.far_ring.clear();
        inner.filter.soft_reset();
        inner.stats.reset();
        inner.stats.current_delay = inner.delay.current_delay();
        inner.state = initial_state(&inner.config);
    }

    /// Snapshot of the current telemetry.
    pub fn stats(&self) -> EchoStats {
        self.inner.read().stats
    }

    pub fn config(&self) -> AecConfig {
        self.inner.read().config.clone()
    }
}

impl Default for EchoCanceller {
    fn default() -> Self {
        Self::new()
    }
}

fn initial_state(config: &AecConfig) -> State {
    if !config.enabled {
        State::Disabled
    } else if config.initialization_frames == 0 {
        State::Active
    } else {
        State::Initializing(config.initialization_frames)
    }
}
