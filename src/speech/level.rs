//! Running sound-level classification for listening turns.
//!
//! Buckets incoming RMS samples into levels and commits a level only after
//! a configured number of consecutive samples agree, so a single noisy
//! sample cannot flip the classification.

use crate::config::ListenConfig;

/// Committed input level for a listening turn.
///
/// Ordering is by loudness: `Unknown < Quiet < Low < Normal`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum SoundLevel {
    /// No level has been committed yet.
    #[default]
    Unknown,
    /// Effectively no sound.
    Quiet,
    /// Audible but below the reliable range.
    Low,
    /// Within the reliable range.
    Normal,
}

/// Hysteresis classifier over a stream of RMS amplitude samples.
#[derive(Debug)]
pub struct AmplitudeClassifier {
    quiet_threshold: f32,
    low_threshold: f32,
    commit_samples: u32,
    run_level: SoundLevel,
    run_len: u32,
    /// Loudest level committed so far this turn.
    peak: SoundLevel,
}

impl AmplitudeClassifier {
    /// Create a classifier from the listening configuration.
    pub fn new(config: &ListenConfig) -> Self {
        Self {
            quiet_threshold: config.quiet_threshold,
            low_threshold: config.low_threshold,
            commit_samples: config.commit_samples.max(1),
            run_level: SoundLevel::Unknown,
            run_len: 0,
            peak: SoundLevel::Unknown,
        }
    }

    /// Feed one RMS sample.
    pub fn push(&mut self, rms: f32) {
        let level = if rms < self.quiet_threshold {
            SoundLevel::Quiet
        } else if rms < self.low_threshold {
            SoundLevel::Low
        } else {
            SoundLevel::Normal
        };

        if level == self.run_level {
            self.run_len += 1;
        } else {
            self.run_level = level;
            self.run_len = 1;
        }

        if self.run_len >= self.commit_samples && level > self.peak {
            tracing::debug!("sound level committed: {level:?}");
            self.peak = level;
        }
    }

    /// Loudest level committed so far, `Unknown` if nothing committed.
    pub fn peak_level(&self) -> SoundLevel {
        self.peak
    }

    /// Clear all state for a fresh listening turn.
    pub fn reset(&mut self) {
        self.run_level = SoundLevel::Unknown;
        self.run_len = 0;
        self.peak = SoundLevel::Unknown;
    }
}
