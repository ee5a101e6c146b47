//! VAD tuning parameters.

use serde::{Deserialize, Serialize};

/// Empirically tuned thresholds and frame counts for turn detection.
///
/// Energies are RMS values over decoded i16 samples (0..32767). Frame counts
/// assume the carrier's 20ms framing; at other frame sizes the durations
/// scale accordingly. Every knob is overridable through `VAD_*` environment
/// variables: the qualitative algorithm is the contract, the numbers are
/// per-deployment tuning.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VadTuning {
    /// Energy at or above which a non-speaking caller is considered to have
    /// started speaking. Must exceed `silence_threshold` (hysteresis).
    pub speech_threshold: f64,

    /// Energy below which a frame counts toward the consecutive-silence run
    /// while the caller is speaking.
    pub silence_threshold: f64,

    /// Consecutive sub-silence frames that end a segment (≈ trailing pause).
    pub silence_frame_limit: u32,

    /// Minimum active speech frames for a segment to commit.
    pub min_speech_frames: u32,

    /// Minimum average energy across the segment for it to commit.
    pub min_average_energy: f64,

    /// Hard ceiling on frames since the last commit; reaching it forces an
    /// evaluation even with no trailing silence.
    pub forced_commit_frames: u32,
}

impl Default for VadTuning {
    fn default() -> Self {
        Self {
            speech_threshold: 700.0,
            silence_threshold: 350.0,
            silence_frame_limit: 24,  // ~480ms trailing pause
            min_speech_frames: 8,     // ~160ms of actual speech
            min_average_energy: 400.0,
            forced_commit_frames: 250, // ~5s ceiling per turn
        }
    }
}

impl VadTuning {
    /// Validate invariants the detector relies on.
    pub fn validate(&self) -> Result<(), String> {
        if self.speech_threshold <= self.silence_threshold {
            return Err(format!(
                "speech_threshold ({}) must exceed silence_threshold ({})",
                self.speech_threshold, self.silence_threshold
            ));
        }
        if self.silence_frame_limit == 0 {
            return Err("silence_frame_limit must be at least 1".to_string());
        }
        if self.forced_commit_frames <= self.silence_frame_limit {
            return Err(format!(
                "forced_commit_frames ({}) must exceed silence_frame_limit ({})",
                self.forced_commit_frames, self.silence_frame_limit
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_tuning_is_valid() {
        assert!(VadTuning::default().validate().is_ok());
    }

    #[test]
    fn test_inverted_thresholds_rejected() {
        let tuning = VadTuning {
            speech_threshold: 100.0,
            silence_threshold: 200.0,
            ..Default::default()
        };
        assert!(tuning.validate().is_err());
    }

    #[test]
    fn test_ceiling_below_silence_limit_rejected() {
        let tuning = VadTuning {
            silence_frame_limit: 50,
            forced_commit_frames: 40,
            ..Default::default()
        };
        assert!(tuning.validate().is_err());
    }
}
