//! Acoustic echo cancellation (AEC) for the voice call path.
//!
//! Given the near-end microphone signal and the far-end (loudspeaker)
//! reference signal, removes the acoustic echo of the far end from the
//! microphone pickup while preserving near-end speech during double-talk.
//!
//! Processing chain (per 20ms frame):
//!   far-end PCM → ring buffer + delay history (`add_far_end`)
//!   near-end PCM → delay-aligned reference → NLMS adaptive filter
//!              → residual echo suppressor → output (`process_frame`)
//!
//! The engine is fully synchronous and owns no threads; it is meant to be
//! driven directly from the audio callbacks. `process_frame` (capture
//! thread) and `add_far_end` (playout thread) may be called concurrently;
//! a single lock per [`EchoCanceller`] serializes them.

pub mod canceller;
pub mod config;
pub mod delay;
pub mod nlms;
pub mod pcm;
pub mod ring_buffer;
pub mod stats;
pub mod suppressor;

pub use canceller::EchoCanceller;
pub use config::AecConfig;
pub use stats::EchoStats;

/// Sample rate the engine runs at, matching the rest of the voice pipeline.
pub const SAMPLE_RATE: u32 = 48_000;
/// Frame duration in milliseconds.
pub const FRAME_MS: u32 = 20;
/// Samples per frame: 48000 * 20 / 1000.
pub const FRAME_SIZE: usize = 960;
/// Maximum bulk echo delay the estimator searches over (500ms at 48kHz).
pub const MAX_DELAY: usize = 24_000;
